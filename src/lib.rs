//! Coupon Engine Library
//!
//! Issues redeemable coupon codes from organizer templates, validates them at
//! the counter and keeps an append-only usage trail.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod providers;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::CouponService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub coupons: CouponService,
}

impl AppState {
    /// Connects to the store, applies migrations when `auto_migrate` is set
    /// and wires the coupon service to a fresh event channel. The receiver is
    /// returned for the host to drain, e.g. with [`events::process_events`].
    pub async fn build(
        config: config::AppConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>), ServiceError> {
        let db = Arc::new(db::establish_connection_from_app_config(&config).await?);
        if config.auto_migrate {
            db::run_migrations(&db).await?;
        }

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(tx));
        let coupons = CouponService::new(db.clone(), config.coupons.clone())
            .with_event_sender(event_sender.clone());

        Ok((
            Self {
                db,
                config,
                event_sender,
                coupons,
            },
            rx,
        ))
    }

    pub fn coupon_service(&self) -> &CouponService {
        &self.coupons
    }
}

pub mod prelude {
    pub use crate::config::{AppConfig, CouponSettings};
    pub use crate::entities::{
        CouponTemplateModel, CouponUsageLogModel, IssuedCouponModel, IssuedCouponStatus,
        RedemptionMethod, RedemptionMethods, UserModel,
    };
    pub use crate::errors::ServiceError;
    pub use crate::services::coupons::{
        reasons, AssignCouponInput, Eligibility, IssueCouponInput, RedeemCouponInput,
        RedemptionResult,
    };
    pub use crate::services::CouponService;
}
