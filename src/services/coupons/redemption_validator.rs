use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reasons;
use crate::entities::{CouponTemplateModel, IssuedCouponModel, IssuedCouponStatus, RedemptionMethod};

/// Outcome of a redemption check. Every applicable failure is listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionCheck {
    pub valid: bool,
    pub reasons: Vec<String>,
}

impl RedemptionCheck {
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            valid: reasons.is_empty(),
            reasons,
        }
    }

    pub fn merge(mut self, other: RedemptionCheck) -> Self {
        self.reasons.extend(other.reasons);
        Self::from_reasons(self.reasons)
    }
}

/// Whether `coupon` may be redeemed at `now`. Expiry is derived from the
/// timestamp, never written.
pub fn validate(coupon: &IssuedCouponModel, now: DateTime<Utc>) -> RedemptionCheck {
    let mut found = Vec::new();

    if coupon.status == IssuedCouponStatus::Expired || coupon.is_past_expiry(now) {
        found.push(reasons::COUPON_EXPIRED.to_string());
    }
    if coupon.status == IssuedCouponStatus::FullyUsed {
        found.push(reasons::FULLY_USED.to_string());
    }
    if coupon.is_exhausted() {
        found.push(reasons::USAGE_LIMIT_REACHED.to_string());
    }

    RedemptionCheck::from_reasons(found)
}

/// PIN gate for templates that accept PIN redemption.
///
/// Surrounding whitespace on either side is ignored; the comparison is
/// otherwise exact.
pub fn validate_pin(template: &CouponTemplateModel, supplied: Option<&str>) -> RedemptionCheck {
    let reason = if !template.redemption_methods().contains(RedemptionMethod::Pin) {
        Some(reasons::PIN_NOT_ENABLED)
    } else {
        match (template.merchant_pin.as_deref(), supplied.map(str::trim)) {
            (None, _) => Some(reasons::PIN_NOT_CONFIGURED),
            (Some(_), None) | (Some(_), Some("")) => Some(reasons::PIN_REQUIRED),
            (Some(expected), Some(pin)) if expected.trim() != pin => Some(reasons::INVALID_PIN),
            _ => None,
        }
    };

    RedemptionCheck::from_reasons(reason.map(|r| vec![r.to_string()]).unwrap_or_default())
}
