//! Central-system action handlers
//!
//! One module per OCPP 1.6 action the central system answers. Handlers are
//! protocol plumbing plus policy seams: whether an id tag is actually
//! acceptable is the [`AuthorizationPolicy`]'s call, not the engine's.
//! The default policy accepts everything, which is what an unconfigured
//! central system should do in a lab.

use std::sync::Arc;

use async_trait::async_trait;

use crate::charge_point::TransactionIdAllocator;
use crate::protocol::action;
use crate::protocol::messages::AuthorizationStatus;
use crate::router::ActionRouter;

mod handle_authorize;
mod handle_boot_notification;
mod handle_data_transfer;
mod handle_diagnostics_status_notification;
mod handle_firmware_status_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

pub use handle_authorize::AuthorizeHandler;
pub use handle_boot_notification::BootNotificationHandler;
pub use handle_data_transfer::DataTransferHandler;
pub use handle_diagnostics_status_notification::DiagnosticsStatusNotificationHandler;
pub use handle_firmware_status_notification::FirmwareStatusNotificationHandler;
pub use handle_heartbeat::HeartbeatHandler;
pub use handle_meter_values::MeterValuesHandler;
pub use handle_start_transaction::StartTransactionHandler;
pub use handle_status_notification::StatusNotificationHandler;
pub use handle_stop_transaction::StopTransactionHandler;

// ── AuthorizationPolicy ────────────────────────────────────────

/// Business decision seam: is this id tag allowed to charge?
#[async_trait]
pub trait AuthorizationPolicy: Send + Sync {
    async fn authorize(&self, id_tag: &str) -> AuthorizationStatus;
}

/// Accepts every id tag.
pub struct AcceptAll;

#[async_trait]
impl AuthorizationPolicy for AcceptAll {
    async fn authorize(&self, _id_tag: &str) -> AuthorizationStatus {
        AuthorizationStatus::Accepted
    }
}

// ── Router assembly ────────────────────────────────────────────

/// Build the central-system router with every charge-point-initiated
/// action registered. Actions a charge point must not send (the CS->CP
/// command set) are deliberately absent and answer `NotImplemented`.
pub fn central_system_router(
    policy: Arc<dyn AuthorizationPolicy>,
    transactions: Arc<TransactionIdAllocator>,
    heartbeat_interval: u32,
) -> ActionRouter {
    let mut router = ActionRouter::new();

    router.register(
        action::AUTHORIZE,
        Arc::new(AuthorizeHandler::new(policy.clone())),
    );
    router.register(
        action::BOOT_NOTIFICATION,
        Arc::new(BootNotificationHandler::new(heartbeat_interval)),
    );
    router.register(action::DATA_TRANSFER, Arc::new(DataTransferHandler));
    router.register(
        action::DIAGNOSTICS_STATUS_NOTIFICATION,
        Arc::new(DiagnosticsStatusNotificationHandler),
    );
    router.register(
        action::FIRMWARE_STATUS_NOTIFICATION,
        Arc::new(FirmwareStatusNotificationHandler),
    );
    router.register(action::HEARTBEAT, Arc::new(HeartbeatHandler));
    router.register(action::METER_VALUES, Arc::new(MeterValuesHandler));
    router.register(
        action::START_TRANSACTION,
        Arc::new(StartTransactionHandler::new(policy.clone(), transactions)),
    );
    router.register(
        action::STATUS_NOTIFICATION,
        Arc::new(StatusNotificationHandler),
    );
    router.register(
        action::STOP_TRANSACTION,
        Arc::new(StopTransactionHandler::new(policy)),
    );

    router
}
