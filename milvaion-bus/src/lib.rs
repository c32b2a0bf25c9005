pub mod bus;
pub mod error;
pub mod messages;

pub use bus::MessageBus;
pub use error::{BusError, BusResult};
pub use messages::{DispatchMessage, LogMessage, StatusUpdateMessage};
