//! Charge point model
//!
//! The per-connection operational state of a charge point: one
//! [`state::ConnectorState`] per connector, mutated only through its
//! transition methods, plus the client-side handler set and driver used by
//! the charge point binary.

pub mod handlers;
pub mod state;

pub use state::{
    ChargePointState, ConnectorStatus, TransactionIdAllocator, TransactionRecord,
    TransitionRejected,
};
