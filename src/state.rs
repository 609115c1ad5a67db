use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Db;
use crate::services::access::BusinessOwnerPolicy;
use crate::services::bookings::BookingService;
use crate::services::expiry::ExpirySweeper;
use crate::services::notify::{Hooks, NotificationDispatcher, TracingAuditSink};
use crate::services::payments::PaymentService;
use crate::services::slots::SlotManager;

pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub slots: SlotManager,
    pub bookings: BookingService,
    pub payments: PaymentService,
    pub sweeper: ExpirySweeper,
}

impl AppState {
    pub fn new(db: Db, config: AppConfig, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        let engine = config.engine.clone();
        let hooks = Hooks::new(dispatcher, Arc::new(TracingAuditSink));

        let slots = SlotManager::new(db.clone(), engine.clone(), hooks.clone());
        let sweeper = ExpirySweeper::new(db.clone(), engine.clone(), hooks.clone(), slots.clone());
        let bookings = BookingService::new(
            db.clone(),
            engine.clone(),
            hooks.clone(),
            sweeper.clone(),
            Arc::new(BusinessOwnerPolicy),
        );
        let payments = PaymentService::new(db.clone(), engine, hooks);

        Self {
            db,
            config,
            slots,
            bookings,
            payments,
            sweeper,
        }
    }
}
