//! Connector and transaction state machine
//!
//! Each connector owns one [`TransactionRecord`]; every mutation goes
//! through a transition method so the invariants stay in one place:
//!
//! - `transaction_id` is set iff a transaction is open (status `Charging`);
//! - an open transaction is never silently overwritten — a second start is
//!   rejected, not stomped;
//! - `Faulted` is only left via an explicit `Available` status report.
//!
//! The machine is plain synchronous state, so every transition is testable
//! without a socket.

use std::sync::atomic::{AtomicI32, Ordering};

use dashmap::DashMap;
use thiserror::Error;

use crate::protocol::messages::{
    AvailabilityStatus, AvailabilityType, ChargePointStatus, ResetStatus, ResetType,
};

// ── Status vocabulary ──────────────────────────────────────────

/// Operational status of a single connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    Unavailable,
    Reserved,
    Faulted,
}

impl ConnectorStatus {
    /// The wire status reported in `StatusNotification`.
    pub fn wire(&self) -> ChargePointStatus {
        match self {
            Self::Available => ChargePointStatus::Available,
            Self::Preparing => ChargePointStatus::Preparing,
            Self::Charging => ChargePointStatus::Charging,
            Self::Unavailable => ChargePointStatus::Unavailable,
            Self::Reserved => ChargePointStatus::Reserved,
            Self::Faulted => ChargePointStatus::Faulted,
        }
    }
}

impl From<ChargePointStatus> for ConnectorStatus {
    fn from(status: ChargePointStatus) -> Self {
        match status {
            ChargePointStatus::Available => Self::Available,
            ChargePointStatus::Preparing => Self::Preparing,
            // Suspended states keep the transaction open
            ChargePointStatus::Charging
            | ChargePointStatus::SuspendedEVSE
            | ChargePointStatus::SuspendedEV => Self::Charging,
            ChargePointStatus::Finishing => Self::Preparing,
            ChargePointStatus::Reserved => Self::Reserved,
            ChargePointStatus::Unavailable => Self::Unavailable,
            ChargePointStatus::Faulted => Self::Faulted,
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// An illegal state machine move. Surfaced to the peer as a `Rejected`
/// status inside a successful CallResult, never as a protocol error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionRejected {
    #[error("connector {connector_id} already has open transaction {transaction_id}")]
    TransactionInProgress {
        connector_id: u32,
        transaction_id: i32,
    },

    #[error("connector {connector_id} is {status}, cannot start a transaction")]
    NotReady {
        connector_id: u32,
        status: &'static str,
    },

    #[error("no open transaction with id {0}")]
    UnknownTransaction(i32),

    #[error("connector {connector_id} is faulted, only an Available status report clears it")]
    Faulted { connector_id: u32 },

    #[error("connector {connector_id} has an open transaction, stop it first")]
    TransactionStillOpen { connector_id: u32 },
}

// ── TransactionRecord ──────────────────────────────────────────

/// Snapshot of one connector's operational state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub connector_id: u32,
    pub status: ConnectorStatus,
    pub transaction_id: Option<i32>,
    pub meter_start: Option<i32>,
}

// ── ConnectorState ─────────────────────────────────────────────

/// The live state machine of a single connector.
#[derive(Debug)]
pub struct ConnectorState {
    record: TransactionRecord,
    /// Availability change deferred while a transaction is running;
    /// applied when the transaction ends.
    pending_availability: Option<AvailabilityType>,
}

impl ConnectorState {
    pub fn new(connector_id: u32) -> Self {
        Self {
            record: TransactionRecord {
                connector_id,
                status: ConnectorStatus::Available,
                transaction_id: None,
                meter_start: None,
            },
            pending_availability: None,
        }
    }

    pub fn record(&self) -> &TransactionRecord {
        &self.record
    }

    pub fn status(&self) -> ConnectorStatus {
        self.record.status
    }

    pub fn pending_availability(&self) -> Option<AvailabilityType> {
        self.pending_availability
    }

    /// Open a transaction. Allowed only from `Available` or `Preparing`.
    pub fn begin(&mut self, transaction_id: i32, meter_start: i32) -> Result<(), TransitionRejected> {
        match self.record.status {
            ConnectorStatus::Available | ConnectorStatus::Preparing => {
                self.record.status = ConnectorStatus::Charging;
                self.record.transaction_id = Some(transaction_id);
                self.record.meter_start = Some(meter_start);
                Ok(())
            }
            ConnectorStatus::Charging => Err(TransitionRejected::TransactionInProgress {
                connector_id: self.record.connector_id,
                transaction_id: self.record.transaction_id.unwrap_or_default(),
            }),
            ConnectorStatus::Unavailable => Err(TransitionRejected::NotReady {
                connector_id: self.record.connector_id,
                status: "Unavailable",
            }),
            ConnectorStatus::Reserved => Err(TransitionRejected::NotReady {
                connector_id: self.record.connector_id,
                status: "Reserved",
            }),
            ConnectorStatus::Faulted => Err(TransitionRejected::Faulted {
                connector_id: self.record.connector_id,
            }),
        }
    }

    /// Close the open transaction with a matching id. Returns the connector
    /// to `Available`, or applies a deferred availability change.
    pub fn end(&mut self, transaction_id: i32) -> Result<(), TransitionRejected> {
        if self.record.status != ConnectorStatus::Charging
            || self.record.transaction_id != Some(transaction_id)
        {
            return Err(TransitionRejected::UnknownTransaction(transaction_id));
        }

        self.record.transaction_id = None;
        self.record.meter_start = None;
        self.record.status = match self.pending_availability.take() {
            Some(AvailabilityType::Inoperative) => ConnectorStatus::Unavailable,
            Some(AvailabilityType::Operative) | None => ConnectorStatus::Available,
        };
        Ok(())
    }

    /// Change availability; deferred (Scheduled) while a transaction runs.
    pub fn change_availability(&mut self, kind: AvailabilityType) -> AvailabilityStatus {
        match self.record.status {
            ConnectorStatus::Charging => {
                self.pending_availability = Some(kind);
                AvailabilityStatus::Scheduled
            }
            ConnectorStatus::Faulted => AvailabilityStatus::Rejected,
            _ => {
                self.record.status = match kind {
                    AvailabilityType::Operative => ConnectorStatus::Available,
                    AvailabilityType::Inoperative => ConnectorStatus::Unavailable,
                };
                AvailabilityStatus::Accepted
            }
        }
    }

    /// Reset. Hard is unconditional and force-clears any open transaction;
    /// soft is a no-op while a transaction runs.
    pub fn reset(&mut self, kind: ResetType) -> ResetStatus {
        match kind {
            ResetType::Hard => {
                self.record.status = ConnectorStatus::Available;
                self.record.transaction_id = None;
                self.record.meter_start = None;
                self.pending_availability = None;
                ResetStatus::Accepted
            }
            ResetType::Soft => {
                if self.record.status == ConnectorStatus::Charging {
                    ResetStatus::Rejected
                } else {
                    self.record.status = ConnectorStatus::Available;
                    ResetStatus::Accepted
                }
            }
        }
    }

    /// Force the connector into `Faulted` on an irrecoverable error.
    /// Any open transaction is considered dead.
    pub fn set_faulted(&mut self) {
        self.record.status = ConnectorStatus::Faulted;
        self.record.transaction_id = None;
        self.record.meter_start = None;
    }

    /// Apply a status reported from the field.
    ///
    /// `Faulted` is only left via an `Available` report, and a report may
    /// never clear an open transaction (that is StopTransaction's job).
    pub fn report_status(&mut self, status: ConnectorStatus) -> Result<(), TransitionRejected> {
        if self.record.status == ConnectorStatus::Faulted && status != ConnectorStatus::Available {
            return Err(TransitionRejected::Faulted {
                connector_id: self.record.connector_id,
            });
        }
        if self.record.transaction_id.is_some()
            && !matches!(status, ConnectorStatus::Charging | ConnectorStatus::Faulted)
        {
            return Err(TransitionRejected::TransactionStillOpen {
                connector_id: self.record.connector_id,
            });
        }

        if status == ConnectorStatus::Faulted {
            self.set_faulted();
        } else {
            self.record.status = status;
        }
        Ok(())
    }
}

// ── TransactionIdAllocator ─────────────────────────────────────

/// Monotonic, collision-free transaction id source.
#[derive(Debug)]
pub struct TransactionIdAllocator {
    next: AtomicI32,
}

impl TransactionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }

    pub fn next_id(&self) -> i32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for TransactionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ── ChargePointState ───────────────────────────────────────────

/// All connectors of one charge point, created lazily on first use.
#[derive(Debug, Default)]
pub struct ChargePointState {
    connectors: DashMap<u32, ConnectorState>,
}

impl ChargePointState {
    pub fn new() -> Self {
        Self {
            connectors: DashMap::new(),
        }
    }

    /// Run `f` against the connector's state machine, creating the
    /// connector on first touch.
    pub fn with_connector<R>(&self, connector_id: u32, f: impl FnOnce(&mut ConnectorState) -> R) -> R {
        let mut entry = self
            .connectors
            .entry(connector_id)
            .or_insert_with(|| ConnectorState::new(connector_id));
        f(entry.value_mut())
    }

    /// Current record of a connector, if it has been touched.
    pub fn snapshot(&self, connector_id: u32) -> Option<TransactionRecord> {
        self.connectors.get(&connector_id).map(|c| c.record().clone())
    }

    /// Connector ids in use.
    pub fn connector_ids(&self) -> Vec<u32> {
        self.connectors.iter().map(|c| *c.key()).collect()
    }

    /// The connector currently running the given transaction.
    pub fn find_transaction(&self, transaction_id: i32) -> Option<u32> {
        self.connectors.iter().find_map(|c| {
            (c.record().transaction_id == Some(transaction_id)).then(|| *c.key())
        })
    }

    /// Open a transaction on a connector.
    pub fn begin_transaction(
        &self,
        connector_id: u32,
        transaction_id: i32,
        meter_start: i32,
    ) -> Result<(), TransitionRejected> {
        self.with_connector(connector_id, |c| c.begin(transaction_id, meter_start))
    }

    /// Close the transaction with the given id, wherever it runs.
    pub fn end_transaction(&self, transaction_id: i32) -> Result<u32, TransitionRejected> {
        let connector_id = self
            .find_transaction(transaction_id)
            .ok_or(TransitionRejected::UnknownTransaction(transaction_id))?;
        self.with_connector(connector_id, |c| c.end(transaction_id))?;
        Ok(connector_id)
    }

    /// Availability change for one connector, or all when `connector_id` is 0
    /// (the protocol's whole-charge-point address).
    pub fn change_availability(
        &self,
        connector_id: u32,
        kind: AvailabilityType,
    ) -> AvailabilityStatus {
        if connector_id == 0 {
            let mut overall = AvailabilityStatus::Accepted;
            for id in self.connector_ids() {
                match self.with_connector(id, |c| c.change_availability(kind)) {
                    AvailabilityStatus::Scheduled => overall = AvailabilityStatus::Scheduled,
                    AvailabilityStatus::Rejected if overall == AvailabilityStatus::Accepted => {
                        overall = AvailabilityStatus::Rejected
                    }
                    _ => {}
                }
            }
            overall
        } else {
            self.with_connector(connector_id, |c| c.change_availability(kind))
        }
    }

    /// Reset the whole charge point.
    pub fn reset(&self, kind: ResetType) -> ResetStatus {
        let mut overall = ResetStatus::Accepted;
        for id in self.connector_ids() {
            if self.with_connector(id, |c| c.reset(kind)) == ResetStatus::Rejected {
                overall = ResetStatus::Rejected;
            }
        }
        overall
    }

    /// Status reported from the field for one connector.
    pub fn report_status(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> Result<(), TransitionRejected> {
        self.with_connector(connector_id, |c| c.report_status(status))
    }
}

// ── Tests ──────────────────────────────────────────────────────
