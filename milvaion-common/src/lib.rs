pub mod config;
pub mod error;
pub mod model;
pub mod tracing_init;

/// Implemented by every config and error type that may end up in a log line so that
/// credentials never leak even when the full `Debug`/`Display` form is too revealing.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
