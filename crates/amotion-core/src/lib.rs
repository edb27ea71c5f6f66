//! Session layer between `amotion-api` and front-ends.
//!
//! - **[`Unit`]**: facade over one aMotion unit.
//!   [`connect()`](Unit::connect) starts the persistent WebSocket session
//!   (login, discovery, reconnects); commands and fetches wait for the
//!   session to authenticate and are correlated by request id.
//!
//! - **[`StatusSnapshot`]**: the projected device state, published through
//!   a `tokio::sync::watch` channel and readable without blocking.
//!
//! - **[`Command`]**: typed control writes (`temp_request`, fan power or
//!   air flow, `work_regime`).

pub mod command;
pub mod config;
pub mod error;
pub mod session;
pub mod status;
pub mod unit;

mod request;

pub use command::{Command, WorkRegime};
pub use config::{ConnectionPolicy, Credentials, UnitConfig};
pub use error::CoreError;
pub use session::{Identity, SessionState};
pub use status::{StatusSnapshot, StatusStream};
pub use unit::Unit;

pub use amotion_api::{LinkState, ReconnectConfig};
