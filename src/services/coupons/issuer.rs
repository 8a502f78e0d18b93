use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{DatabaseTransaction, Set, TransactionTrait};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::code_generator::CodeGenerator;
use super::dto::IssueCouponInput;
use super::eligibility::{check_eligibility, check_projected_cap, lock_template};
use super::{reasons, CouponService};
use crate::db::retry_on_lock;
use crate::entities::{
    issued_coupon, AssignmentMethod, CouponTemplateModel, IssuedCouponModel, IssuedCouponStatus,
};
use crate::errors::ServiceError;
use crate::events::Event;

impl CouponService {
    /// Issues coupons from a template. One coupon when `quantity` is absent
    /// or 1, otherwise the bulk path.
    #[instrument(skip(self), err)]
    pub async fn issue(&self, input: IssueCouponInput) -> Result<Vec<IssuedCouponModel>, ServiceError> {
        input.validate()?;
        match input.quantity() {
            1 => self
                .issue_one(input.template_id, input.user_id, input.times_can_be_used)
                .await
                .map(|coupon| vec![coupon]),
            quantity => {
                self.issue_many(
                    input.template_id,
                    input.user_id,
                    input.times_can_be_used,
                    quantity,
                )
                .await
            }
        }
    }

    #[instrument(skip(self), err)]
    pub async fn issue_one(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        times_can_be_used: i32,
    ) -> Result<IssuedCouponModel, ServiceError> {
        ensure_positive_uses(times_can_be_used)?;
        let template = self.issuable_template(template_id, user_id).await?;
        let now = Utc::now();

        let template_ref = &template;
        let issued = retry_on_lock("issue_one", move || {
            self.issue_once(template_ref, user_id, times_can_be_used, 1, now)
        });
        let coupon = match issued.await {
            Ok(coupons) => coupons.into_iter().next().ok_or_else(|| {
                ServiceError::InternalError("issuance produced no coupon".to_string())
            })?,
            Err(err) => {
                warn!(
                    template_id = %template.id,
                    user_id = %user_id,
                    error = %err,
                    "Coupon issuance rejected"
                );
                return Err(err);
            }
        };

        counter!("coupon_engine.issued", 1);
        info!(
            coupon_id = %coupon.id,
            template_id = %template.id,
            user_id = %user_id,
            "Coupon issued"
        );
        self.emit(Event::CouponIssued {
            template_id: template.id,
            user_id,
            coupon_ids: vec![coupon.id],
        });

        Ok(coupon)
    }

    /// Issues `quantity` coupons in one transaction. Either all rows are
    /// created or none are.
    #[instrument(skip(self), err)]
    pub async fn issue_many(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        times_can_be_used: i32,
        quantity: u32,
    ) -> Result<Vec<IssuedCouponModel>, ServiceError> {
        ensure_positive_uses(times_can_be_used)?;
        if quantity == 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let template = self.issuable_template(template_id, user_id).await?;
        let now = Utc::now();

        let template_ref = &template;
        let issued = retry_on_lock("issue_many", move || {
            self.issue_once(template_ref, user_id, times_can_be_used, quantity, now)
        });
        let coupons = match issued.await {
            Ok(coupons) => coupons,
            Err(err) => {
                warn!(
                    template_id = %template.id,
                    user_id = %user_id,
                    quantity,
                    error = %err,
                    "Bulk coupon issuance rejected"
                );
                return Err(err);
            }
        };

        counter!("coupon_engine.issued", coupons.len() as u64);
        info!(
            template_id = %template.id,
            user_id = %user_id,
            quantity,
            "Coupons issued in bulk"
        );
        self.emit(Event::CouponIssued {
            template_id: template.id,
            user_id,
            coupon_ids: coupons.iter().map(|c| c.id).collect(),
        });

        Ok(coupons)
    }

    /// One issuance transaction, committed only if every row went in.
    async fn issue_once(
        &self,
        template: &CouponTemplateModel,
        user_id: Uuid,
        times_can_be_used: i32,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<IssuedCouponModel>, ServiceError> {
        let txn = self.db.begin().await?;
        let issued = issue_in_txn(
            &txn,
            &self.codes,
            template,
            user_id,
            times_can_be_used,
            quantity,
            now,
        );
        match issued.await {
            Ok(coupons) => {
                txn.commit().await?;
                Ok(coupons)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    /// Template lookup plus the identity rules for automatic issuance.
    async fn issuable_template(
        &self,
        template_id: Uuid,
        user_id: Uuid,
    ) -> Result<CouponTemplateModel, ServiceError> {
        let template = self.template(template_id).await?;
        let user = self.user(user_id).await?;
        if !user.is_active {
            return Err(ServiceError::rejected(reasons::USER_INACTIVE));
        }
        Ok(template)
    }
}

fn ensure_positive_uses(times_can_be_used: i32) -> Result<(), ServiceError> {
    if times_can_be_used < 1 {
        return Err(ServiceError::ValidationError(
            "times_can_be_used must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Single-use templates always yield exactly one use per coupon.
pub(crate) fn uses_for(template: &CouponTemplateModel, requested: i32) -> i32 {
    if template.is_single_use() {
        1
    } else {
        requested
    }
}

/// Eligibility, bulk rules and inserts, all against one locked snapshot of
/// the template's issued rows.
async fn issue_in_txn(
    txn: &DatabaseTransaction,
    codes: &CodeGenerator,
    template: &CouponTemplateModel,
    user_id: Uuid,
    times_can_be_used: i32,
    quantity: u32,
    now: DateTime<Utc>,
) -> Result<Vec<IssuedCouponModel>, ServiceError> {
    lock_template(txn, template.id).await?;
    check_eligibility(txn, template, user_id, now)
        .await?
        .into_result()?;
    if quantity > 1 {
        if template.is_single_use() {
            return Err(ServiceError::rejected(reasons::MULTIPLE_SINGLE_USE));
        }
        check_projected_cap(txn, template, quantity).await?;
    }

    let mut coupons = Vec::with_capacity(quantity as usize);
    for _ in 0..quantity {
        coupons.push(insert_issued(txn, codes, template, user_id, times_can_be_used, now).await?);
    }
    Ok(coupons)
}

async fn insert_issued(
    txn: &DatabaseTransaction,
    codes: &CodeGenerator,
    template: &CouponTemplateModel,
    user_id: Uuid,
    times_can_be_used: i32,
    now: DateTime<Utc>,
) -> Result<IssuedCouponModel, ServiceError> {
    let times_can_be_used = uses_for(template, times_can_be_used);
    codes
        .insert_unique(txn, |code| issued_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            unique_code: Set(code),
            template_id: Set(template.id),
            user_id: Set(user_id),
            status: Set(IssuedCouponStatus::Active),
            times_can_be_used: Set(times_can_be_used),
            times_used: Set(0),
            expires_at: Set(template.expires_at),
            issued_at: Set(now),
            assigned_by: Set(None),
            assignment_method: Set(AssignmentMethod::Auto),
            assignment_reason: Set(None),
            assignment_notes: Set(None),
            quantity: Set(1),
            updated_at: Set(now),
        })
        .await
}
