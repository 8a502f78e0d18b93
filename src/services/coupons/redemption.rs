use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::dto::RedeemCouponInput;
use super::redemption_validator::{validate, validate_pin};
use super::usage_ledger::{record_usage, LedgerOutcome, UsageContext};
use super::{reasons, CouponService};
use crate::db::{is_lock_conflict, retry_on_lock, supports_row_locks};
use crate::entities::{
    issued_coupon, CouponTemplateModel, CouponUsageLogModel, IssuedCoupon, IssuedCouponModel,
};
use crate::errors::ServiceError;
use crate::events::Event;

/// Business outcome of a redemption attempt. Infrastructure failures are
/// reported separately as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RedemptionResult {
    NotFound,
    ValidationFailed {
        reasons: Vec<String>,
    },
    Success {
        coupon: IssuedCouponModel,
        log_entry: CouponUsageLogModel,
    },
}

impl RedemptionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            Self::ValidationFailed { reasons } => reasons,
            _ => &[],
        }
    }
}

impl CouponService {
    /// Redeems one use of the coupon identified by `input.code`.
    ///
    /// The code must match exactly. Validation and the ledger update share
    /// one transaction; a rejected attempt writes nothing. A transaction that
    /// keeps losing lock races is reported as a usage-limit rejection.
    #[instrument(skip(self, input), fields(code = %input.code), err)]
    pub async fn redeem(&self, input: RedeemCouponInput) -> Result<RedemptionResult, ServiceError> {
        input.validate()?;

        let Some(found) = self.find_by_code(&input.code).await? else {
            info!("Redemption attempted with unknown code");
            return Ok(RedemptionResult::NotFound);
        };
        let template = self.template(found.template_id).await?;
        let problems = template.check_invariants(self.settings.pin_length);
        if !problems.is_empty() {
            warn!(template_id = %template.id, ?problems, "Template has an invalid PIN configuration");
        }

        let now = Utc::now();
        let (found_ref, template_ref, input_ref) = (&found, &template, &input);
        let attempt = match retry_on_lock("redeem", move || {
            self.redeem_once(found_ref, template_ref, input_ref, now)
        })
        .await
        {
            Ok(attempt) => attempt,
            Err(err) if is_lock_conflict(&err) => {
                warn!(coupon_id = %found.id, error = %err, "Redemption still contended after retries");
                Attempt::RaceLost
            }
            Err(err) => return Err(err),
        };

        match attempt {
            Attempt::Recorded { coupon, entry } => {
                let fully_used = coupon.is_exhausted();
                counter!("coupon_engine.redemption.success", 1);
                info!(
                    coupon_id = %coupon.id,
                    times_used = coupon.times_used,
                    fully_used,
                    "Coupon redeemed"
                );
                self.emit(Event::CouponRedeemed {
                    coupon_id: coupon.id,
                    usage_log_id: entry.id,
                    times_used: coupon.times_used,
                    fully_used,
                });

                Ok(RedemptionResult::Success {
                    coupon,
                    log_entry: entry,
                })
            }
            Attempt::Rejected(reasons) => {
                counter!("coupon_engine.redemption.rejected", 1);
                warn!(coupon_id = %found.id, ?reasons, "Redemption rejected");
                Ok(RedemptionResult::ValidationFailed { reasons })
            }
            Attempt::RaceLost => {
                counter!("coupon_engine.redemption.race_lost", 1);
                warn!(coupon_id = %found.id, "Lost the race for the last remaining use");
                Ok(RedemptionResult::ValidationFailed {
                    reasons: self.reasons_after_conflict(found.id).await?,
                })
            }
        }
    }

    /// One transaction: committed when a use was recorded, rolled back
    /// otherwise.
    async fn redeem_once(
        &self,
        found: &IssuedCouponModel,
        template: &CouponTemplateModel,
        input: &RedeemCouponInput,
        now: DateTime<Utc>,
    ) -> Result<Attempt, ServiceError> {
        let txn = self.db.begin().await?;
        match redeem_in_txn(&txn, found, template, input, now).await {
            Ok(Attempt::Recorded { coupon, entry }) => {
                txn.commit().await?;
                Ok(Attempt::Recorded { coupon, entry })
            }
            Ok(other) => {
                txn.rollback().await?;
                Ok(other)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    /// Re-reads the coupon once the competing transaction has committed, so
    /// the reasons describe the state that actually won.
    async fn reasons_after_conflict(&self, coupon_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let mut found = match IssuedCoupon::find_by_id(coupon_id).one(&*self.db).await? {
            Some(latest) => validate(&latest, Utc::now()).reasons,
            None => Vec::new(),
        };
        if !found.iter().any(|r| r == reasons::USAGE_LIMIT_REACHED) {
            found.push(reasons::USAGE_LIMIT_REACHED.to_string());
        }
        Ok(found)
    }
}

enum Attempt {
    Recorded {
        coupon: IssuedCouponModel,
        entry: CouponUsageLogModel,
    },
    Rejected(Vec<String>),
    RaceLost,
}

/// Validate and apply the ledger update against the locked row.
async fn redeem_in_txn(
    txn: &DatabaseTransaction,
    found: &IssuedCouponModel,
    template: &CouponTemplateModel,
    input: &RedeemCouponInput,
    now: DateTime<Utc>,
) -> Result<Attempt, ServiceError> {
    let coupon = lock_coupon(txn, found.id).await?;

    let mut check = validate(&coupon, now);
    if input.pin.is_some() || template.redemption_methods().requires_pin() {
        check = check.merge(validate_pin(template, input.pin.as_deref()));
    }
    if !check.valid {
        return Ok(Attempt::Rejected(check.reasons));
    }

    let ctx = UsageContext {
        redeemed_by: input.redeemed_by.unwrap_or(coupon.user_id),
        location: input.location.clone(),
        details: input.details.clone(),
    };
    Ok(match record_usage(txn, &coupon, &ctx, now).await? {
        LedgerOutcome::Recorded { coupon, entry } => Attempt::Recorded { coupon, entry },
        LedgerOutcome::Exhausted => Attempt::RaceLost,
    })
}

/// Re-reads the coupon inside the transaction, holding its row lock where the
/// backend has one and the database write lock on SQLite.
async fn lock_coupon(txn: &DatabaseTransaction, id: Uuid) -> Result<IssuedCouponModel, ServiceError> {
    let query = IssuedCoupon::find_by_id(id);
    let query = if supports_row_locks(txn) {
        query.lock_exclusive()
    } else {
        // Write before reading so the read below sees the latest commit.
        IssuedCoupon::update_many()
            .col_expr(
                issued_coupon::Column::UpdatedAt,
                Expr::col(issued_coupon::Column::UpdatedAt).into(),
            )
            .filter(issued_coupon::Column::Id.eq(id))
            .exec(txn)
            .await?;
        query
    };
    query
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Issued coupon {} not found", id)))
}
