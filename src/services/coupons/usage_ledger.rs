use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, Set};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::entities::{
    coupon_usage_log, issued_coupon, CouponUsageLogModel, IssuedCoupon, IssuedCouponModel,
    IssuedCouponStatus,
};
use crate::errors::ServiceError;

/// Who redeemed, where, and with what opaque context.
#[derive(Debug, Clone)]
pub struct UsageContext {
    pub redeemed_by: Uuid,
    pub location: Option<String>,
    pub details: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    Recorded {
        coupon: IssuedCouponModel,
        entry: CouponUsageLogModel,
    },
    /// No use was left to consume; nothing was written.
    Exhausted,
}

/// Consumes one use of `coupon` and appends its usage log entry.
///
/// Must run inside the caller's transaction. The increment is a conditional
/// update guarded by `times_used < times_can_be_used`, so concurrent callers
/// can never push the counter past the cap. Zero affected rows means the last
/// use went elsewhere and [`LedgerOutcome::Exhausted`] is returned. Lock
/// errors propagate; the caller retries the whole transaction.
pub async fn record_usage(
    txn: &DatabaseTransaction,
    coupon: &IssuedCouponModel,
    ctx: &UsageContext,
    now: DateTime<Utc>,
) -> Result<LedgerOutcome, ServiceError> {
    if coupon.is_exhausted() {
        warn!(coupon_id = %coupon.id, "Usage ledger called on an exhausted coupon");
        return Ok(LedgerOutcome::Exhausted);
    }

    let rows_affected = IssuedCoupon::update_many()
        .col_expr(
            issued_coupon::Column::TimesUsed,
            Expr::col(issued_coupon::Column::TimesUsed).add(1),
        )
        .col_expr(issued_coupon::Column::UpdatedAt, Expr::value(now))
        .filter(issued_coupon::Column::Id.eq(coupon.id))
        .filter(
            Expr::col(issued_coupon::Column::TimesUsed)
                .lt(Expr::col(issued_coupon::Column::TimesCanBeUsed)),
        )
        .exec(txn)
        .await?
        .rows_affected;

    if rows_affected == 0 {
        return Ok(LedgerOutcome::Exhausted);
    }

    let mut updated = IssuedCoupon::find_by_id(coupon.id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Issued coupon {} not found", coupon.id)))?;

    if updated.is_exhausted() && updated.status != IssuedCouponStatus::FullyUsed {
        let mut active: issued_coupon::ActiveModel = updated.into();
        active.status = Set(IssuedCouponStatus::FullyUsed);
        updated = active.update(txn).await?;
    }

    let entry = coupon_usage_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        issued_coupon_id: Set(updated.id),
        redeemed_by_user_id: Set(ctx.redeemed_by),
        used_at: Set(now),
        location: Set(ctx.location.clone()),
        details: Set(ctx.details.clone()),
    }
    .insert(txn)
    .await?;

    Ok(LedgerOutcome::Recorded {
        coupon: updated,
        entry,
    })
}
