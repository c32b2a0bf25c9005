use milvaion_common::SafeDisplay;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("malformed message: {0}")]
    Protocol(String),
}

impl SafeDisplay for BusError {
    fn to_safe_string(&self) -> String {
        match self {
            BusError::Amqp(_) => "message bus unavailable".to_string(),
            BusError::Protocol(msg) => format!("malformed message: {msg}"),
        }
    }
}

pub type BusResult<T> = Result<T, BusError>;
