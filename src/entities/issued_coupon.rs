use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A redeemable coupon instance owned by exactly one user.
///
/// Rows are never deleted. `times_used` only moves through the usage ledger,
/// and `status` only moves forward.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "issued_coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub unique_code: String,
    pub template_id: Uuid,
    pub user_id: Uuid,
    pub status: IssuedCouponStatus,
    pub times_can_be_used: i32,
    pub times_used: i32,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub assigned_by: Option<Uuid>,
    pub assignment_method: AssignmentMethod,
    #[sea_orm(nullable)]
    pub assignment_reason: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub assignment_notes: Option<String>,
    pub quantity: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::coupon_template::Entity",
        from = "Column::TemplateId",
        to = "super::coupon_template::Column::Id"
    )]
    Template,
    #[sea_orm(has_many = "super::coupon_usage_log::Entity")]
    UsageLogs,
}

impl Related<super::coupon_template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Template.def()
    }
}

impl Related<super::coupon_usage_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum IssuedCouponStatus {
    /// Granted by an administrator, not yet used.
    #[sea_orm(string_value = "available")]
    Available,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "fully_used")]
    FullyUsed,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl IssuedCouponStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FullyUsed | Self::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    #[sea_orm(string_value = "auto")]
    Auto,
    #[sea_orm(string_value = "manual")]
    Manual,
}

impl Model {
    pub fn remaining_uses(&self) -> i32 {
        (self.times_can_be_used - self.times_used).max(0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.times_used >= self.times_can_be_used
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp < now).unwrap_or(false)
    }

    /// Status as observed at `now`. Expiry is derived here and never written
    /// back, so the usage ledger stays the only writer of this row.
    pub fn effective_status(&self, now: DateTime<Utc>) -> IssuedCouponStatus {
        if self.status.is_terminal() {
            self.status
        } else if self.is_past_expiry(now) {
            IssuedCouponStatus::Expired
        } else {
            self.status
        }
    }
}
