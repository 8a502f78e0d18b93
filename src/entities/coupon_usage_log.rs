use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only redemption audit record. One row per successful redemption.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupon_usage_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub issued_coupon_id: Uuid,
    pub redeemed_by_user_id: Uuid,
    pub used_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub location: Option<String>,
    /// Device, channel, campaign and so on. Opaque to the engine.
    #[sea_orm(column_type = "Json", nullable)]
    pub details: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::issued_coupon::Entity",
        from = "Column::IssuedCouponId",
        to = "super::issued_coupon::Column::Id"
    )]
    IssuedCoupon,
}

impl Related<super::issued_coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IssuedCoupon.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
