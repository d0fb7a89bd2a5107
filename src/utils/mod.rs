pub mod log_sanitizer;

pub use log_sanitizer::sanitize_for_log;
