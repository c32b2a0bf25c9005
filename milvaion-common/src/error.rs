use crate::SafeDisplay;

/// Error taxonomy shared by every component. Variants map to the kinds fixed in the
/// error-handling design: transient infra is retried by the caller, policy/protocol
/// errors are logged and the offending message acked, fatal errors abort startup.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("coordination store error: {0}")]
    Coordination(String),
    #[error("bus error: {0}")]
    Bus(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("malformed message: {0}")]
    Protocol(String),
    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl SafeDisplay for CoreError {
    fn to_safe_string(&self) -> String {
        // None of these carry credentials; the full display form is always safe here.
        self.to_string()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
