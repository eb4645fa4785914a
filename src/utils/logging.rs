//! Logging gated by a module-level `ENABLE_LOGS` const, plus helpers for
//! keeping chat text out of log lines.
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info, log_warn, log_error};
//!
//! log_info!("[engine] {} messages appended", count);
//! ```

/// Log at `level` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_gated {
    ($level:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::log!($level, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::log_gated!(log::Level::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log_gated!(log::Level::Info, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log_gated!(log::Level::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::log_gated!(log::Level::Error, $($arg)*) };
}

/// First `max_chars` chars of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("héllo wörld", 5), "héllo…");
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("", 3), "");
    }
}
