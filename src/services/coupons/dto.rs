use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IssueCouponInput {
    pub template_id: Uuid,
    pub user_id: Uuid,
    #[validate(range(min = 1))]
    pub times_can_be_used: i32,
    /// `None` and `Some(1)` both take the single-issue path.
    #[validate(range(min = 1, max = 1000))]
    pub quantity: Option<u32>,
}

impl IssueCouponInput {
    pub fn new(template_id: Uuid, user_id: Uuid, times_can_be_used: i32) -> Self {
        Self {
            template_id,
            user_id,
            times_can_be_used,
            quantity: None,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn quantity(&self) -> u32 {
        self.quantity.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AssignCouponInput {
    pub template_id: Uuid,
    pub target_user_id: Uuid,
    pub assigned_by: Uuid,
    #[validate(length(max = 500), custom = "validate_not_blank")]
    pub reason: String,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(range(min = 1))]
    pub times_can_be_used: i32,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
}

impl AssignCouponInput {
    pub fn new(
        template_id: Uuid,
        target_user_id: Uuid,
        assigned_by: Uuid,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            template_id,
            target_user_id,
            assigned_by,
            reason: reason.into(),
            notes: None,
            times_can_be_used: 1,
            quantity: 1,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_times_can_be_used(mut self, times: i32) -> Self {
        self.times_can_be_used = times;
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RedeemCouponInput {
    pub code: String,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    pub details: Option<JsonValue>,
    /// Presence of a PIN means the caller is redeeming by PIN.
    pub pin: Option<String>,
    /// Defaults to the coupon owner.
    pub redeemed_by: Option<Uuid>,
}

impl RedeemCouponInput {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn redeemed_by(mut self, user_id: Uuid) -> Self {
        self.redeemed_by = Some(user_id);
        self
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issue_quantity_defaults_to_one() {
        let input = IssueCouponInput::new(Uuid::new_v4(), Uuid::new_v4(), 1);
        assert_eq!(input.quantity(), 1);
        assert!(input.validate().is_ok());
        assert_eq!(input.with_quantity(4).quantity(), 4);
    }

    #[test]
    fn issue_rejects_zero_counts() {
        let input = IssueCouponInput::new(Uuid::new_v4(), Uuid::new_v4(), 0);
        assert!(input.validate().is_err());

        let input = IssueCouponInput::new(Uuid::new_v4(), Uuid::new_v4(), 1).with_quantity(0);
        assert!(input.validate().is_err());
    }

    #[test]
    fn assign_requires_non_blank_reason() {
        let ids = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let blank = AssignCouponInput::new(ids.0, ids.1, ids.2, "   \t");
        let errors = blank.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("reason"));

        let ok = AssignCouponInput::new(ids.0, ids.1, ids.2, "customer goodwill")
            .with_notes("called support twice");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn assign_limits_text_lengths() {
        let ids = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let long_reason = AssignCouponInput::new(ids.0, ids.1, ids.2, "x".repeat(501));
        assert!(long_reason.validate().is_err());

        let long_notes =
            AssignCouponInput::new(ids.0, ids.1, ids.2, "ok").with_notes("n".repeat(2001));
        assert!(long_notes.validate().is_err());
    }

    #[test]
    fn redeem_builder_collects_context() {
        let owner = Uuid::new_v4();
        let input = RedeemCouponInput::new("ABCDEFGH2345")
            .with_location("Front desk")
            .with_details(json!({"device": "ios"}))
            .with_pin("123456")
            .redeemed_by(owner);
        assert_eq!(input.location.as_deref(), Some("Front desk"));
        assert_eq!(input.pin.as_deref(), Some("123456"));
        assert_eq!(input.redeemed_by, Some(owner));
        assert!(input.validate().is_ok());
    }
}
