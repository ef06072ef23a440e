//! # Chargelink
//!
//! OCPP-J (OCPP 1.6 over JSON-on-WebSocket) protocol engine for EV charging
//! infrastructure, usable from both sides of the link.
//!
//! ## Architecture
//!
//! - **protocol**: the OCPP-J array envelope, error codes and typed action
//!   payloads
//! - **session**: per-connection engine — correlation table, read loop,
//!   single-flight outbound calls, registry of live connections
//! - **router**: action name -> handler dispatch with error containment
//! - **charge_point**: connector/transaction state machine and the
//!   charge-point-side handler set
//! - **handlers**: central-system-side handlers with pluggable policy
//! - **server** / **client**: the WebSocket central system and charge point
//!   front ends
//! - **relay**: optional fan-out of raw traffic to all connected sessions

pub mod charge_point;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use charge_point::{ChargePointState, TransactionIdAllocator};
pub use client::{ChargePoint, ChargePointConfig};
pub use config::{default_config_path, AppConfig};
pub use error::{ActionError, CallFailure, TransportError};
pub use protocol::{ErrorCode, FrameError, OcppFrame};
pub use router::{ActionHandler, ActionRouter, SessionContext};
pub use server::CentralSystem;
pub use session::{Session, SessionConfig, SessionRegistry, SharedSessionRegistry};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use transport::{Transport, WsTransport};
