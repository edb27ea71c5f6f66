// amotion-api: Async WebSocket client for the Atrea aMotion unit protocol

pub mod codec;
pub mod correlation;
pub mod error;
pub mod models;
pub mod transport;

pub use codec::{Endpoint, Message};
pub use correlation::CorrelationTable;
pub use error::Error;
pub use transport::{LinkState, ReconnectConfig, TransportChannel, TransportEvent};
