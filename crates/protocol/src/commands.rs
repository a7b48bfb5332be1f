//! Remote-executable command snippets and the execution sentinel.
//!
//! Every file/listing operation is a single line of MicroPython pushed at the
//! board's REPL. Each generated snippet ends with a statement that prints the
//! execution sentinel, so the session layer can tell "command output is
//! complete" apart from arbitrary program output.
//!
//! # Sentinel
//!
//! The sentinel is two EOT bytes (`"\x04\x04"`), produced on the board by
//! `print(end=chr(4)*2)`. EOT is a control character that ordinary textual
//! program output does not contain, so scanning the accumulated capture
//! buffer for the substring is collision-free. The scan is over the whole
//! buffer, which also makes it robust against the two bytes arriving in
//! separate read chunks.

/// CTRL-C: interrupt the running program.
pub const INTERRUPT: &[u8] = b"\x03";

/// CTRL-D: soft-reset the board (or execute, when the REPL is in raw mode).
pub const SOFT_RESET: &[u8] = b"\x04";

/// CTRL-A: enter the echo-suppressed (raw) REPL.
pub const ENTER_RAW_REPL: &[u8] = b"\x01";

/// CTRL-B: leave the raw REPL and return to the friendly prompt.
pub const EXIT_RAW_REPL: &[u8] = b"\x02";

/// Marker the board emits at the end of every generated snippet's output.
pub const EXECUTION_DONE: &str = "\u{4}\u{4}";

/// Appends the sentinel-printing statement to a snippet.
fn with_sentinel(code: String) -> String {
    format!("{code};print(end=chr(4)*2)")
}

/// Quotes `s` as a single-quoted MicroPython string literal.
///
/// Control characters are emitted as `\xNN` escapes so file content with
/// arbitrary bytes survives the trip through `write_file`.
fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Directory listing: prints a Python list of `(name, st_mode, st_size)`
/// tuples for the entries under `path`.
pub fn list_dir(path: &str) -> String {
    let dir = if path.trim_matches('/').is_empty() {
        "/".to_string()
    } else {
        path.trim_end_matches('/').to_string()
    };
    let prefix = if dir == "/" {
        "/".to_string()
    } else {
        format!("{dir}/")
    };
    let (d, b) = (py_str(&dir), py_str(&prefix));
    with_sentinel(format!(
        "import os;print([(n,os.stat({b}+n)[0],os.stat({b}+n)[6])for n in os.listdir({d})])"
    ))
}

/// Creates an empty file at `path`.
pub fn make_file(path: &str) -> String {
    with_sentinel(format!("f=open({},'w');f.close()", py_str(path)))
}

/// Creates a directory at `path`.
pub fn make_directory(path: &str) -> String {
    with_sentinel(format!("import os;os.mkdir({})", py_str(path)))
}

/// Removes the file at `path`.
pub fn remove_file(path: &str) -> String {
    with_sentinel(format!("import os;os.remove({})", py_str(path)))
}

/// Removes the (empty) directory at `path`.
pub fn remove_directory(path: &str) -> String {
    with_sentinel(format!("import os;os.rmdir({})", py_str(path)))
}

/// Renames `src` to `dst`. Works for files and directories alike.
pub fn rename(src: &str, dst: &str) -> String {
    with_sentinel(format!("import os;os.rename({},{})", py_str(src), py_str(dst)))
}

/// Prints the content of the file at `path`.
pub fn read_file(path: &str) -> String {
    with_sentinel(format!(
        "f=open({});print(f.read(),end='');f.close()",
        py_str(path)
    ))
}

/// Writes `content` to the file at `path`, replacing it.
pub fn write_file(path: &str, content: &str) -> String {
    with_sentinel(format!(
        "f=open({},'w');f.write({});f.close()",
        py_str(path),
        py_str(content)
    ))
}

/// Executes the script stored at `path` on the board.
pub fn execute_file(path: &str) -> String {
    with_sentinel(format!("exec(open({}).read())", py_str(path)))
}

/// Hard reset via the board's `machine` module. Sent as an interactive
/// command, so no sentinel.
pub fn machine_reset() -> String {
    "import machine;machine.reset()".to_string()
}

/// True once the accumulated capture buffer contains the sentinel.
pub fn is_silent_execution_done(buffer: &str) -> bool {
    buffer.contains(EXECUTION_DONE)
}

/// Cuts the capture buffer at the sentinel and strips REPL framing: leading
/// prompt echoes and surrounding line noise.
pub fn trim_silent_result(buffer: &str) -> String {
    let end = buffer.find(EXECUTION_DONE).unwrap_or(buffer.len());
    let mut result = buffer[..end].trim_matches(['\r', '\n', ' ']);
    loop {
        let stripped = result.strip_prefix(">>>").unwrap_or(result).trim_start();
        if stripped == result {
            break;
        }
        result = stripped;
    }
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_absent_from_plain_output() {
        let output = "line one\r\nline two\r\nline three";
        assert!(!is_silent_execution_done(output));
    }

    #[test]
    fn sentinel_detected_across_chunk_boundary() {
        let mut buffer = String::new();
        buffer.push_str("[('main.py', 32768, 512)]\u{4}");
        assert!(!is_silent_execution_done(&buffer));
        buffer.push_str("\u{4}");
        assert!(is_silent_execution_done(&buffer));
    }

    #[test]
    fn trim_cuts_at_sentinel_and_drops_framing() {
        let buffer = "\r\n>>> [('a.py', 32768, 1)]\r\n\u{4}\u{4}trailing";
        assert_eq!(trim_silent_result(buffer), "[('a.py', 32768, 1)]");
    }

    #[test]
    fn trim_without_sentinel_keeps_whole_buffer() {
        assert_eq!(trim_silent_result("partial output"), "partial output");
    }

    #[test]
    fn py_str_escapes_quotes_and_control_bytes() {
        assert_eq!(py_str("it's"), r"'it\'s'");
        assert_eq!(py_str("a\\b"), r"'a\\b'");
        assert_eq!(py_str("a\nb\x01"), r"'a\nb\x01'");
    }

    #[test]
    fn list_dir_normalizes_root_and_nested_paths() {
        let root = list_dir("/");
        assert!(root.contains("os.listdir('/')"));
        assert!(root.contains("os.stat('/'+n)"));
        assert!(root.ends_with(";print(end=chr(4)*2)"));

        let nested = list_dir("/lib/");
        assert!(nested.contains("os.listdir('/lib')"));
        assert!(nested.contains("os.stat('/lib/'+n)"));
    }

    #[test]
    fn write_file_embeds_content_as_literal() {
        let code = write_file("main.py", "print('hi')\n");
        assert!(code.contains(r"f.write('print(\'hi\')\n')"));
        assert!(code.ends_with(";print(end=chr(4)*2)"));
    }
}
