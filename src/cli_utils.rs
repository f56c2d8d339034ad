/// CLI utilities for consistent output formatting
use std::io::IsTerminal;

/// Prefix for user-facing status lines on stderr
///
/// Bright cyan if stderr is a TTY, plain text otherwise.
pub fn actionkey_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[actionkey]\x1b[0m"
    } else {
        "[actionkey]"
    }
}
