use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventSender;

pub mod cleanup;
pub mod debts;
pub mod requests;
pub mod stock_ledger;

/// Aggregated services shared by HTTP handlers and the scheduler.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: Arc<stock_ledger::StockLedger>,
    pub requests: Arc<requests::RequestService>,
    pub debts: Arc<debts::DebtService>,
    pub cleanup: Arc<cleanup::CleanupService>,
}

impl AppServices {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, cfg: &AppConfig) -> Self {
        Self {
            ledger: Arc::new(stock_ledger::StockLedger::new(db.clone())),
            requests: Arc::new(requests::RequestService::new(
                db.clone(),
                event_sender.clone(),
                cfg.pickup_grace_hours,
            )),
            debts: Arc::new(debts::DebtService::new(db.clone(), event_sender.clone())),
            cleanup: Arc::new(cleanup::CleanupService::new(
                db,
                event_sender,
                cfg.retention_days,
                cfg.expired_grace_days,
            )),
        }
    }
}
