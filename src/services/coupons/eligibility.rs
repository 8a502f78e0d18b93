use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reasons;
use crate::db::supports_row_locks;
use crate::entities::{
    coupon_template, issued_coupon, CouponTemplate, CouponTemplateModel, IssuedCoupon,
};
use crate::errors::ServiceError;

/// Whether a template may be issued to a user right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Eligibility {
    pub fn eligible() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: Some(reason.into()),
        }
    }

    /// Turns a negative answer into [`ServiceError::Rejected`].
    pub fn into_result(self) -> Result<(), ServiceError> {
        match self.reason {
            Some(reason) if !self.eligible => Err(ServiceError::Rejected(reason)),
            _ => Ok(()),
        }
    }
}

/// Template-level checks: active flag, then the validity window.
pub fn check_template_window(
    template: &CouponTemplateModel,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    if !template.is_active {
        return Some(reasons::NOT_ACTIVE);
    }
    if template.valid_from.map(|from| now < from).unwrap_or(false) {
        return Some(reasons::NOT_YET_VALID);
    }
    if template.expires_at.map(|exp| exp < now).unwrap_or(false) {
        return Some(reasons::EXPIRED);
    }
    None
}

/// Full eligibility rules, first failure wins.
pub async fn check_eligibility<C: ConnectionTrait>(
    conn: &C,
    template: &CouponTemplateModel,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Eligibility, ServiceError> {
    if let Some(reason) = check_template_window(template, now) {
        return Ok(Eligibility::rejected(reason));
    }

    if let Some(cap) = template.issuance_cap() {
        if issued_count(conn, template.id).await? >= cap {
            return Ok(Eligibility::rejected(reasons::ISSUANCE_LIMIT_REACHED));
        }
    }

    if template.is_single_use() && user_holds_template(conn, template.id, user_id).await? {
        return Ok(Eligibility::rejected(reasons::ALREADY_HOLDS_SINGLE_USE));
    }

    Ok(Eligibility::eligible())
}

/// Fails when adding `quantity` rows would push the template past its cap.
pub async fn check_projected_cap<C: ConnectionTrait>(
    conn: &C,
    template: &CouponTemplateModel,
    quantity: u32,
) -> Result<(), ServiceError> {
    if let Some(cap) = template.issuance_cap() {
        let projected = issued_count(conn, template.id).await? + u64::from(quantity);
        if projected > cap {
            return Err(ServiceError::rejected(reasons::BULK_EXCEEDS_LIMIT));
        }
    }
    Ok(())
}

pub async fn issued_count<C: ConnectionTrait>(
    conn: &C,
    template_id: Uuid,
) -> Result<u64, ServiceError> {
    Ok(IssuedCoupon::find()
        .filter(issued_coupon::Column::TemplateId.eq(template_id))
        .count(conn)
        .await?)
}

pub async fn user_holds_template<C: ConnectionTrait>(
    conn: &C,
    template_id: Uuid,
    user_id: Uuid,
) -> Result<bool, ServiceError> {
    let held = IssuedCoupon::find()
        .filter(issued_coupon::Column::TemplateId.eq(template_id))
        .filter(issued_coupon::Column::UserId.eq(user_id))
        .count(conn)
        .await?;
    Ok(held > 0)
}

/// Serialises issuance per template for the rest of the transaction. Must run
/// before the transaction reads anything.
pub async fn lock_template<C: ConnectionTrait>(
    conn: &C,
    template_id: Uuid,
) -> Result<(), ServiceError> {
    if supports_row_locks(conn) {
        CouponTemplate::find_by_id(template_id)
            .lock_exclusive()
            .one(conn)
            .await?;
    } else {
        // No-op write; SQLite hands out its single write lock here.
        CouponTemplate::update_many()
            .col_expr(
                coupon_template::Column::UpdatedAt,
                Expr::col(coupon_template::Column::UpdatedAt).into(),
            )
            .filter(coupon_template::Column::Id.eq(template_id))
            .exec(conn)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DiscountType, UsageType};
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn template() -> CouponTemplateModel {
        let now = Utc::now();
        CouponTemplateModel {
            id: Uuid::new_v4(),
            code: "WELCOME".to_string(),
            name: "Welcome".to_string(),
            organizer_id: None,
            discount_type: DiscountType::FixedAmount,
            discount_value: Decimal::from(5),
            usage_type: UsageType::SingleUse,
            max_issuance: None,
            valid_from: None,
            expires_at: None,
            redemption_methods: "qr".to_string(),
            merchant_pin: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn open_window_passes() {
        assert_eq!(check_template_window(&template(), Utc::now()), None);
    }

    #[test]
    fn window_rules_apply_in_order() {
        let now = Utc::now();
        let mut t = template();
        t.valid_from = Some(now + Duration::days(1));
        t.expires_at = Some(now - Duration::days(1));
        assert_eq!(check_template_window(&t, now), Some(reasons::NOT_YET_VALID));

        t.valid_from = None;
        assert_eq!(check_template_window(&t, now), Some(reasons::EXPIRED));

        t.is_active = false;
        assert_eq!(check_template_window(&t, now), Some(reasons::NOT_ACTIVE));
    }

    #[test]
    fn eligibility_into_result() {
        assert!(Eligibility::eligible().into_result().is_ok());
        let err = Eligibility::rejected(reasons::EXPIRED).into_result().unwrap_err();
        assert_eq!(err.rejection_reason(), Some(reasons::EXPIRED));
    }
}
