#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use coupon_engine::{
    config::AppConfig,
    entities::{
        coupon_template, issued_coupon, user, CouponTemplateModel, DiscountType, IssuedCoupon,
        IssuedCouponModel, UsageType, UserModel,
    },
    events::Event,
    services::coupons::{CodeSource, CouponService},
    AppState,
};
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Coupon service over a migrated SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub events: mpsc::Receiver<Event>,
    _dir: Option<TempDir>,
}

impl TestApp {
    /// In-memory database behind a single connection.
    pub async fn new() -> Self {
        // One connection: every in-memory SQLite connection is its own database.
        Self::build("sqlite::memory:".to_string(), 1, None).await
    }

    /// Database file in a temporary directory shared by `max_connections`
    /// pooled connections, so transactions really run side by side.
    pub async fn file_backed(max_connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("coupons.db").display());
        Self::build(url, max_connections, Some(dir)).await
    }

    async fn build(url: String, max_connections: u32, dir: Option<TempDir>) -> Self {
        let mut cfg = AppConfig::new(url, "test".to_string());
        cfg.auto_migrate = true;
        cfg.db_max_connections = max_connections;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;

        let (state, events) = AppState::build(cfg)
            .await
            .expect("failed to build test application");
        Self {
            state,
            events,
            _dir: dir,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn service(&self) -> &CouponService {
        &self.state.coupons
    }

    /// Service that draws codes from `codes` in order.
    pub fn service_with_codes(&self, codes: &[&str]) -> CouponService {
        self.state
            .coupons
            .clone()
            .with_code_source(Arc::new(ScriptedCodes::new(codes)))
    }

    pub async fn user(&self) -> UserModel {
        seed_user(self.db(), false, true).await
    }

    pub async fn admin(&self) -> UserModel {
        seed_user(self.db(), true, true).await
    }

    pub async fn issued_count(&self, template_id: Uuid) -> u64 {
        IssuedCoupon::find()
            .filter(issued_coupon::Column::TemplateId.eq(template_id))
            .count(self.db())
            .await
            .expect("count issued coupons")
    }

    pub async fn reload(&self, coupon: &IssuedCouponModel) -> IssuedCouponModel {
        IssuedCoupon::find_by_id(coupon.id)
            .one(self.db())
            .await
            .expect("reload coupon")
            .expect("coupon exists")
    }

    /// Moves a coupon's own expiry, as if it had been issued earlier.
    pub async fn set_coupon_expiry(
        &self,
        coupon: &IssuedCouponModel,
        expires_at: Option<DateTime<Utc>>,
    ) -> IssuedCouponModel {
        let mut active: issued_coupon::ActiveModel = coupon.clone().into();
        active.expires_at = Set(expires_at);
        active.update(self.db()).await.expect("update expiry")
    }

    /// All events emitted so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub async fn seed_user(db: &DatabaseConnection, is_admin: bool, is_active: bool) -> UserModel {
    let id = Uuid::new_v4();
    user::ActiveModel {
        id: Set(id),
        email: Set(format!("{}@example.test", id.simple())),
        display_name: Set(if is_admin { "Admin" } else { "Member" }.to_string()),
        is_admin: Set(is_admin),
        is_active: Set(is_active),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed user")
}

/// Builder for template rows; defaults to an active, open-ended multi-use
/// template redeemable by QR.
pub struct TemplateBuilder {
    usage_type: UsageType,
    max_issuance: Option<i32>,
    valid_from: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    redemption_methods: String,
    merchant_pin: Option<String>,
    is_active: bool,
}

impl TemplateBuilder {
    pub fn multi_use() -> Self {
        Self {
            usage_type: UsageType::MultiUse,
            max_issuance: None,
            valid_from: None,
            expires_at: None,
            redemption_methods: "qr".to_string(),
            merchant_pin: None,
            is_active: true,
        }
    }

    pub fn single_use() -> Self {
        Self {
            usage_type: UsageType::SingleUse,
            ..Self::multi_use()
        }
    }

    pub fn max_issuance(mut self, max: i32) -> Self {
        self.max_issuance = Some(max);
        self
    }

    pub fn valid_from(mut self, at: DateTime<Utc>) -> Self {
        self.valid_from = Some(at);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn methods(mut self, methods: &str) -> Self {
        self.redemption_methods = methods.to_string();
        self
    }

    pub fn pin(mut self, pin: &str) -> Self {
        self.merchant_pin = Some(pin.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub async fn insert(self, db: &DatabaseConnection) -> CouponTemplateModel {
        let id = Uuid::new_v4();
        let now = Utc::now();
        coupon_template::ActiveModel {
            id: Set(id),
            code: Set(format!("T{}", &id.simple().to_string()[..10]).to_uppercase()),
            name: Set("Test template".to_string()),
            organizer_id: Set(None),
            discount_type: Set(DiscountType::Percentage),
            discount_value: Set(dec!(10)),
            usage_type: Set(self.usage_type),
            max_issuance: Set(self.max_issuance),
            valid_from: Set(self.valid_from),
            expires_at: Set(self.expires_at),
            redemption_methods: Set(self.redemption_methods),
            merchant_pin: Set(self.merchant_pin),
            is_active: Set(self.is_active),
            created_at: Set(now - Duration::days(30)),
            updated_at: Set(now - Duration::days(30)),
        }
        .insert(db)
        .await
        .expect("seed template")
    }
}

/// Hands out a fixed list of codes, then repeats the last one forever.
#[derive(Debug)]
pub struct ScriptedCodes {
    codes: Mutex<VecDeque<String>>,
}

impl ScriptedCodes {
    pub fn new(codes: &[&str]) -> Self {
        Self {
            codes: Mutex::new(codes.iter().map(|c| c.to_string()).collect()),
        }
    }
}

impl CodeSource for ScriptedCodes {
    fn next_code(&self, _length: usize) -> String {
        let mut codes = self.codes.lock().expect("code script lock");
        if codes.len() > 1 {
            codes.pop_front().unwrap_or_default()
        } else {
            codes.front().cloned().unwrap_or_default()
        }
    }
}
