//! Decoding of directory-listing output into [`RemoteFile`] records.
//!
//! The board prints a Python list of `('name', st_mode, st_size)` tuples,
//! e.g. `[('main.py', 32768, 512), ('lib', 16384, 0)]`. The decoder walks
//! that text directly; malformed entries are skipped, never fatal.

use serde::Serialize;

/// `st_mode` flag for regular files.
pub const ST_FILE: u32 = 0x8000;

/// `st_mode` flag for directories.
pub const ST_DIR: u32 = 0x4000;

/// Whether a remote entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

impl FileKind {
    /// Maps a `st_mode` value onto a kind.
    pub fn from_mode(mode: u32) -> Self {
        if mode & 0xF000 == ST_DIR {
            FileKind::Directory
        } else {
            FileKind::File
        }
    }

    /// The `st_mode` flag this kind corresponds to.
    pub fn mode(self) -> u32 {
        match self {
            FileKind::File => ST_FILE,
            FileKind::Directory => ST_DIR,
        }
    }
}

/// One entry of a remote directory listing.
///
/// Derived transiently from command output; nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub name: String,
    /// Parent path the listing was taken under.
    pub path: String,
    pub kind: FileKind,
    pub size: u64,
}

impl RemoteFile {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Joins parent path and name, collapsing duplicate separators.
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name).replace("//", "/")
        }
    }

    /// True for Python sources, which the board can execute directly.
    pub fn can_run(&self) -> bool {
        self.is_file() && self.name.trim().ends_with(".py")
    }
}

/// Decodes raw listing text into [`RemoteFile`] records under `parent`.
///
/// Entries with fewer than three fields, or with unparseable mode/size
/// numbers, are skipped.
pub fn decode_listing(raw: &str, parent: &str) -> Vec<RemoteFile> {
    tuples(raw)
        .into_iter()
        .filter_map(|fields| decode_entry(&fields, parent))
        .collect()
}

fn decode_entry(fields: &[String], parent: &str) -> Option<RemoteFile> {
    if fields.len() < 3 {
        return None;
    }
    let name = unquote(&fields[0])?;
    let mode: u32 = fields[1].trim().parse().ok()?;
    let size: u64 = fields[2].trim().parse().ok()?;
    Some(RemoteFile {
        name,
        path: parent.to_string(),
        kind: FileKind::from_mode(mode),
        size,
    })
}

/// Splits the raw text into parenthesized tuples, each a list of raw fields.
/// Quote-aware, so names containing commas or parens survive.
fn tuples(raw: &str) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut depth = 0u32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in raw.chars() {
        if let Some(q) = quote {
            field.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => {
                quote = Some(c);
                field.push(c);
            }
            '(' => {
                depth += 1;
                if depth == 1 {
                    fields.clear();
                    field.clear();
                }
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if !field.trim().is_empty() {
                        fields.push(field.trim().to_string());
                    }
                    out.push(std::mem::take(&mut fields));
                    field.clear();
                }
            }
            ',' if depth == 1 => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            _ if depth > 0 => field.push(c),
            _ => {}
        }
    }
    out
}

/// Strips matching quotes from a field and resolves simple escapes.
fn unquote(field: &str) -> Option<String> {
    let trimmed = field.trim();
    let inner = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => break,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_matches_generated_listing() {
        // What the board prints for [("main.py", 0x8000, 512), ("lib", 0x4000, 0)].
        let raw = "[('main.py', 32768, 512), ('lib', 16384, 0)]";
        let files = decode_listing(raw, "/");

        assert_eq!(
            files,
            vec![
                RemoteFile {
                    name: "main.py".into(),
                    path: "/".into(),
                    kind: FileKind::File,
                    size: 512,
                },
                RemoteFile {
                    name: "lib".into(),
                    path: "/".into(),
                    kind: FileKind::Directory,
                    size: 0,
                },
            ]
        );
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let raw = "[('ok.py', 32768, 12), ('short', 16384), ('bad.py', x, 3), ('also-ok', 16384, 0)]";
        let files = decode_listing(raw, "");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "ok.py");
        assert_eq!(files[1].name, "also-ok");
    }

    #[test]
    fn quoted_names_with_commas_and_parens_survive() {
        let raw = "[('a,(b).py', 32768, 7)]";
        let files = decode_listing(raw, "/");
        assert_eq!(files[0].name, "a,(b).py");
        assert_eq!(files[0].size, 7);
    }

    #[test]
    fn tolerates_crlf_and_extra_fields() {
        let raw = "[('a.py', 32768, 1, 99),\r\n ('b', 16384, 0)]";
        let files = decode_listing(raw, "/");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].size, 1);
        assert_eq!(files[1].kind, FileKind::Directory);
    }

    #[test]
    fn full_path_collapses_separators() {
        let file = RemoteFile {
            name: "main.py".into(),
            path: "/".into(),
            kind: FileKind::File,
            size: 1,
        };
        assert_eq!(file.full_path(), "/main.py");
        assert!(file.can_run());
    }

    #[test]
    fn empty_listing_decodes_to_nothing() {
        assert!(decode_listing("[]", "/").is_empty());
        assert!(decode_listing("", "/").is_empty());
    }
}
