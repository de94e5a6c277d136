//! Composite remote command
//!
//! The remote side gets a single `exec` request whose command line never
//! contains the payload. The code is streamed over the channel's stdin and
//! written to the temp file by `cat`, so no byte of it is interpreted by the
//! remote shell and its size does not count against the argument limit.

use chrono::Utc;
use uuid::Uuid;

use super::language::Language;

/// Quote `s` as one POSIX shell word.
///
/// Wraps in single quotes and rewrites every `'` as `'\''`. Inside single
/// quotes the shell treats every other byte literally.
pub fn shell_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Collision-free temp file name: `shellgate-<unix-millis>-<uuid><ext>`.
pub fn temp_file_name(language: Language) -> String {
    format!(
        "shellgate-{}-{}{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        language.extension()
    )
}

/// `<dir>/<name>` without doubling the separator.
pub fn remote_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// POSIX script that copies stdin to `path`, runs it and cleans up.
///
/// The interpreter only runs if the write succeeded. The temp file is removed
/// whether or not the interpreter succeeded; `rm` failures are ignored and the
/// script exits with the interpreter's status.
pub fn build_script(language: Language, path: &str) -> String {
    let path = shell_quote(path);
    format!(
        "umask 077; \
         if cat > {path}; then {interp} {path}; status=$?; else status=$?; fi; \
         rm -f {path} 2>/dev/null; \
         exit $status",
        path = path,
        interp = language.interpreter(),
    )
}

/// The `exec` request: [`build_script`] run under `sh -c`, independent of
/// the account's login shell. The caller writes the code to stdin and then
/// sends EOF.
pub fn build_remote_command(language: Language, path: &str) -> String {
    format!("sh -c {}", shell_quote(&build_script(language, path)))
}
