pub mod commands;
pub mod config;
pub mod logtail;
pub mod notify;
pub mod process;
pub mod pty;
pub mod session;
pub mod trigger;
pub mod utils;
pub mod watcher;

/// ASCII art logo for tether CLI
pub const LOGO: &str = "\
   ╷
   ├─┐
   │ │ tether
   ╵ ╵";
