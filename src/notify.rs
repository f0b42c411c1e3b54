//! Notification sink.
//!
//! The session calls the sink exactly once per detected trigger episode.
//! Delivery is best-effort: a missing `notify-send` must never disturb the
//! supervised session.

use std::process::Command;

use tracing::debug;

/// Capability for sending a user notification.
pub trait Notifier: Send {
    fn notify(&mut self, title: &str, message: &str);
}

/// Shells out to the platform notification tool, best-effort.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&mut self, title: &str, message: &str) {
        let result = if cfg!(target_os = "macos") {
            Command::new("osascript")
                .arg("-e")
                .arg(format!(
                    "display notification \"{}\" with title \"{}\"",
                    message.replace('"', "'"),
                    title.replace('"', "'")
                ))
                .output()
        } else {
            Command::new("notify-send").arg(title).arg(message).output()
        };

        if let Err(e) = result {
            debug!("Notification delivery failed: {e}");
        }
    }
}

/// Discards notifications (`--quiet` and tests).
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&mut self, _title: &str, _message: &str) {}
}
