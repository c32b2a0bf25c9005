use milvaion_common::SafeDisplay;

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("lock not held: {0}")]
    LockNotHeld(String),
    #[error("circuit open")]
    CircuitOpen,
}

impl SafeDisplay for CoordinationError {
    fn to_safe_string(&self) -> String {
        match self {
            CoordinationError::Redis(_) => "coordination store unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;
