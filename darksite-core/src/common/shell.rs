//! POSIX shell quoting for the few fragments that must run through a remote shell

/// Quote `value` for a POSIX shell.
///
/// Values made only of safe characters are returned unchanged; anything else
/// is wrapped in single quotes with embedded quotes escaped.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}
