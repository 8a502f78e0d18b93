//! Coupon issuance and redemption.
//!
//! [`CouponService`] is the entry point. Templates and users come from the
//! [`TemplateRegistry`] and [`IdentityProvider`] collaborators; every
//! mutation runs in a single sea-orm transaction against the store.

pub mod assignment;
pub mod code_generator;
pub mod dto;
pub mod eligibility;
pub mod issuer;
pub mod redemption;
pub mod redemption_validator;
pub mod usage_ledger;

use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::CouponSettings;
use crate::entities::{
    coupon_usage_log, issued_coupon, CouponTemplateModel, CouponUsageLog, CouponUsageLogModel,
    IssuedCoupon, IssuedCouponModel, UserModel,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::providers::{DbIdentityProvider, DbTemplateRegistry, IdentityProvider, TemplateRegistry};

pub use code_generator::{CodeGenerator, CodeSource, RandomCodeSource, CODE_ALPHABET};
pub use dto::{AssignCouponInput, IssueCouponInput, RedeemCouponInput};
pub use eligibility::Eligibility;
pub use redemption::RedemptionResult;
pub use redemption_validator::RedemptionCheck;

/// Human-readable rejection reasons surfaced to callers.
pub mod reasons {
    pub const NOT_ACTIVE: &str = "coupon is not active";
    pub const NOT_YET_VALID: &str = "not yet valid";
    pub const EXPIRED: &str = "expired";
    pub const ISSUANCE_LIMIT_REACHED: &str = "issuance limit reached";
    pub const ALREADY_HOLDS_SINGLE_USE: &str = "already has this single-use coupon";
    pub const MULTIPLE_SINGLE_USE: &str = "cannot issue multiple single-use coupons to same user";
    pub const BULK_EXCEEDS_LIMIT: &str = "bulk issuance would exceed maximum limit";
    pub const USER_INACTIVE: &str = "user account is not active";

    pub const SELF_ASSIGNMENT: &str = "cannot assign a coupon to yourself";
    pub const DUPLICATE_ASSIGNMENT: &str =
        "coupon already assigned to this user by this administrator";

    pub const COUPON_EXPIRED: &str = "coupon has expired";
    pub const FULLY_USED: &str = "coupon has been fully used";
    pub const USAGE_LIMIT_REACHED: &str = "usage limit reached";

    pub const PIN_NOT_ENABLED: &str = "PIN redemption is not enabled for this coupon";
    pub const PIN_NOT_CONFIGURED: &str = "merchant PIN is not configured for this coupon";
    pub const PIN_REQUIRED: &str = "PIN is required";
    pub const INVALID_PIN: &str = "invalid PIN";
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    templates: Arc<dyn TemplateRegistry>,
    identity: Arc<dyn IdentityProvider>,
    codes: CodeGenerator,
    settings: CouponSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl CouponService {
    /// Service backed entirely by `db`: templates and users are read from
    /// their tables and codes come from [`RandomCodeSource`].
    pub fn new(db: Arc<DatabaseConnection>, settings: CouponSettings) -> Self {
        let codes = CodeGenerator::new(
            Arc::new(RandomCodeSource),
            settings.code_length,
            settings.max_code_attempts,
        );
        Self {
            templates: Arc::new(DbTemplateRegistry::new(db.clone())),
            identity: Arc::new(DbIdentityProvider::new(db.clone())),
            db,
            codes,
            settings,
            event_sender: None,
        }
    }

    pub fn with_providers(
        mut self,
        templates: Arc<dyn TemplateRegistry>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        self.templates = templates;
        self.identity = identity;
        self
    }

    pub fn with_event_sender(mut self, sender: Arc<EventSender>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn with_code_source(mut self, source: Arc<dyn CodeSource>) -> Self {
        self.codes = CodeGenerator::new(
            source,
            self.settings.code_length,
            self.settings.max_code_attempts,
        );
        self
    }

    /// Pre-flight eligibility for UIs. Never writes.
    #[instrument(skip(self), err)]
    pub async fn check_eligibility(
        &self,
        template_id: Uuid,
        user_id: Uuid,
    ) -> Result<Eligibility, ServiceError> {
        let template = self.template(template_id).await?;
        let user = self.user(user_id).await?;
        if !user.is_active {
            return Ok(Eligibility::rejected(reasons::USER_INACTIVE));
        }
        eligibility::check_eligibility(&*self.db, &template, user_id, Utc::now()).await
    }

    /// A fresh code not used by any issued coupon.
    pub async fn generate_code(&self) -> Result<String, ServiceError> {
        self.codes.generate(&*self.db).await
    }

    /// Exact, case-sensitive lookup. Blank input never reaches the store.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<IssuedCouponModel>, ServiceError> {
        if code.trim().is_empty() {
            return Ok(None);
        }
        Ok(IssuedCoupon::find()
            .filter(issued_coupon::Column::UniqueCode.eq(code))
            .one(&*self.db)
            .await?)
    }

    /// Coupons owned by `user_id`, newest first.
    pub async fn list_user_coupons(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<IssuedCouponModel>, ServiceError> {
        Ok(IssuedCoupon::find()
            .filter(issued_coupon::Column::UserId.eq(user_id))
            .order_by_desc(issued_coupon::Column::IssuedAt)
            .all(&*self.db)
            .await?)
    }

    /// Usage log of one coupon, oldest first.
    pub async fn usage_history(
        &self,
        issued_coupon_id: Uuid,
    ) -> Result<Vec<CouponUsageLogModel>, ServiceError> {
        Ok(CouponUsageLog::find()
            .filter(coupon_usage_log::Column::IssuedCouponId.eq(issued_coupon_id))
            .order_by_asc(coupon_usage_log::Column::UsedAt)
            .all(&*self.db)
            .await?)
    }

    async fn template(&self, id: Uuid) -> Result<CouponTemplateModel, ServiceError> {
        self.templates
            .find_template(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon template {} not found", id)))
    }

    async fn user(&self, id: Uuid) -> Result<UserModel, ServiceError> {
        self.identity
            .find_user(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", id)))
    }

    fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event);
        }
    }
}
