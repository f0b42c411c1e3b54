use std::io::{self, Write};
use std::sync::Once;

/// ANSI escape codes for terminal control
const CURSOR_SHOW: &str = "\x1B[?25h";
const ATTR_RESET: &str = "\x1B[0m";
const CLEAR_LINE: &str = "\r\x1B[K";

static PANIC_HOOK_INSTALLED: Once = Once::new();

/// Restore the terminal to a clean state.
///
/// Leaves raw mode (if active), shows the cursor, resets attributes,
/// clears the current line, and flushes stdout. Call before exiting so
/// the user's shell never inherits a raw terminal.
pub fn cleanup_terminal() {
    // Ignore errors - we're cleaning up, best effort
    let _ = crossterm::terminal::disable_raw_mode();

    let mut stdout = io::stdout();
    let cleanup = format!("{CLEAR_LINE}{CURSOR_SHOW}{ATTR_RESET}\n");
    let _ = stdout.write_all(cleanup.as_bytes());
    let _ = stdout.flush();
}

/// Install a panic hook that restores terminal state before panicking.
///
/// Safe to call multiple times - only installs once.
pub fn install_terminal_panic_hook() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            cleanup_terminal();
            default_hook(panic_info);
        }));
    });
}
