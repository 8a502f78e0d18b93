use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::dto::AssignCouponInput;
use super::eligibility::{check_projected_cap, check_template_window, lock_template};
use super::issuer::uses_for;
use super::{reasons, CouponService};
use crate::db::{retry_on_lock, unique_violation_message};
use crate::entities::{
    issued_coupon, AssignmentMethod, CouponTemplateModel, IssuedCoupon, IssuedCouponModel,
    IssuedCouponStatus, UserModel,
};
use crate::errors::ServiceError;
use crate::events::Event;

impl CouponService {
    /// Administrator-driven issuance with an audit trail.
    ///
    /// Duplicates are keyed on (template, user, admin), so two administrators
    /// may each grant the same template to the same user. The resulting coupon
    /// starts out `available`.
    #[instrument(skip(self, input), fields(
        template_id = %input.template_id,
        target_user_id = %input.target_user_id,
        assigned_by = %input.assigned_by,
    ), err)]
    pub async fn assign(&self, input: AssignCouponInput) -> Result<IssuedCouponModel, ServiceError> {
        input.validate()?;

        if input.target_user_id == input.assigned_by {
            warn!("Administrator attempted to assign a coupon to themselves");
            return Err(ServiceError::rejected(reasons::SELF_ASSIGNMENT));
        }

        let admin = self.user(input.assigned_by).await?;
        if !admin.is_admin {
            return Err(ServiceError::Forbidden(format!(
                "User {} is not an administrator",
                admin.id
            )));
        }
        self.user(input.target_user_id).await?;
        let template = self.template(input.template_id).await?;
        let now = Utc::now();

        let (template_ref, admin_ref, input_ref) = (&template, &admin, &input);
        let assigned = retry_on_lock("assign", move || {
            self.assign_once(template_ref, admin_ref, input_ref, now)
        });
        let coupon = match assigned.await {
            Ok(coupon) => coupon,
            Err(err) => {
                warn!(error = %err, "Coupon assignment rejected");
                return Err(err);
            }
        };

        counter!("coupon_engine.assigned", 1);
        info!(coupon_id = %coupon.id, "Coupon assigned manually");
        self.emit(Event::CouponAssigned {
            coupon_id: coupon.id,
            template_id: template.id,
            user_id: coupon.user_id,
            assigned_by: admin.id,
        });

        Ok(coupon)
    }

    async fn assign_once(
        &self,
        template: &CouponTemplateModel,
        admin: &UserModel,
        input: &AssignCouponInput,
        now: DateTime<Utc>,
    ) -> Result<IssuedCouponModel, ServiceError> {
        let txn = self.db.begin().await?;
        match assign_in_txn(&txn, self, template, admin, input, now).await {
            Ok(coupon) => {
                txn.commit().await?;
                Ok(coupon)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }
}

async fn assign_in_txn(
    txn: &DatabaseTransaction,
    service: &CouponService,
    template: &CouponTemplateModel,
    admin: &UserModel,
    input: &AssignCouponInput,
    now: DateTime<Utc>,
) -> Result<IssuedCouponModel, ServiceError> {
    lock_template(txn, template.id).await?;
    if let Some(reason) = check_template_window(template, now) {
        return Err(ServiceError::rejected(reason));
    }
    check_projected_cap(txn, template, input.quantity).await?;

    let existing = IssuedCoupon::find()
        .filter(issued_coupon::Column::TemplateId.eq(template.id))
        .filter(issued_coupon::Column::UserId.eq(input.target_user_id))
        .filter(issued_coupon::Column::AssignedBy.eq(admin.id))
        .count(txn)
        .await?;
    if existing > 0 {
        return Err(ServiceError::rejected(reasons::DUPLICATE_ASSIGNMENT));
    }

    let quantity = i32::try_from(input.quantity)
        .map_err(|_| ServiceError::ValidationError("quantity is too large".to_string()))?;
    let times_can_be_used = uses_for(template, input.times_can_be_used);
    let inserted = service
        .codes
        .insert_unique(txn, |code| issued_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            unique_code: Set(code),
            template_id: Set(template.id),
            user_id: Set(input.target_user_id),
            status: Set(IssuedCouponStatus::Available),
            times_can_be_used: Set(times_can_be_used),
            times_used: Set(0),
            expires_at: Set(template.expires_at),
            issued_at: Set(now),
            assigned_by: Set(Some(admin.id)),
            assignment_method: Set(AssignmentMethod::Manual),
            assignment_reason: Set(Some(input.reason.trim().to_string())),
            assignment_notes: Set(input.notes.clone()),
            quantity: Set(quantity),
            updated_at: Set(now),
        })
        .await;

    match inserted {
        // A concurrent request from the same administrator got there first.
        Err(ServiceError::DatabaseError(err)) if unique_violation_message(&err).is_some() => {
            Err(ServiceError::rejected(reasons::DUPLICATE_ASSIGNMENT))
        }
        other => other,
    }
}
