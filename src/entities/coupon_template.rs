use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Immutable coupon definition supplied by organizer tooling.
///
/// The engine never writes this table; it only reads templates and locks
/// their rows to serialise issuance against `max_issuance`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupon_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    #[sea_orm(nullable)]
    pub organizer_id: Option<Uuid>,
    pub discount_type: DiscountType,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub discount_value: Decimal,
    pub usage_type: UsageType,
    #[sea_orm(nullable)]
    pub max_issuance: Option<i32>,
    #[sea_orm(nullable)]
    pub valid_from: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Comma separated [`RedemptionMethods`], e.g. `"qr,pin"`.
    pub redemption_methods: String,
    #[sea_orm(nullable)]
    pub merchant_pin: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::issued_coupon::Entity")]
    IssuedCoupons,
}

impl Related<super::issued_coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IssuedCoupons.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "fixed_amount")]
    FixedAmount,
    #[sea_orm(string_value = "percentage")]
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    #[sea_orm(string_value = "single_use")]
    SingleUse,
    #[sea_orm(string_value = "multi_use")]
    MultiUse,
}

/// A way a coupon can be presented at the counter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RedemptionMethod {
    Qr,
    Pin,
}

/// Closed set of [`RedemptionMethod`]s allowed by a template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionMethods {
    qr: bool,
    pin: bool,
}

impl RedemptionMethods {
    pub const QR_ONLY: Self = Self {
        qr: true,
        pin: false,
    };
    pub const PIN_ONLY: Self = Self {
        qr: false,
        pin: true,
    };
    pub const ALL: Self = Self { qr: true, pin: true };

    pub fn contains(&self, method: RedemptionMethod) -> bool {
        match method {
            RedemptionMethod::Qr => self.qr,
            RedemptionMethod::Pin => self.pin,
        }
    }

    pub fn with(mut self, method: RedemptionMethod) -> Self {
        match method {
            RedemptionMethod::Qr => self.qr = true,
            RedemptionMethod::Pin => self.pin = true,
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.qr && !self.pin
    }

    /// PIN is the only way to redeem.
    pub fn requires_pin(&self) -> bool {
        self.pin && !self.qr
    }
}

impl FromStr for RedemptionMethods {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .try_fold(Self::default(), |set, token| {
                RedemptionMethod::from_str(&token.to_ascii_lowercase()).map(|m| set.with(m))
            })
    }
}

impl fmt::Display for RedemptionMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(2);
        if self.qr {
            parts.push(RedemptionMethod::Qr.to_string());
        }
        if self.pin {
            parts.push(RedemptionMethod::Pin.to_string());
        }
        f.write_str(&parts.join(","))
    }
}

impl Model {
    /// Parsed redemption methods; an unparseable column yields the empty set
    /// so that no redemption path is granted by accident.
    pub fn redemption_methods(&self) -> RedemptionMethods {
        self.redemption_methods.parse().unwrap_or_default()
    }

    pub fn is_single_use(&self) -> bool {
        self.usage_type == UsageType::SingleUse
    }

    /// Issuance cap as a count. A negative stored cap allows nothing.
    pub fn issuance_cap(&self) -> Option<u64> {
        self.max_issuance.map(|max| u64::try_from(max).unwrap_or(0))
    }

    /// Problems with this template's PIN configuration. Empty when the
    /// template is well formed.
    pub fn check_invariants(&self, pin_length: usize) -> Vec<String> {
        let mut problems = Vec::new();
        if self.redemption_methods.parse::<RedemptionMethods>().is_err() {
            problems.push(format!(
                "unknown redemption method in '{}'",
                self.redemption_methods
            ));
        }
        if self.redemption_methods().contains(RedemptionMethod::Pin) {
            match self.merchant_pin.as_deref() {
                None => problems.push("PIN redemption enabled without a merchant PIN".to_string()),
                Some(pin) if !is_numeric_pin(pin, pin_length) => problems.push(format!(
                    "merchant PIN must be exactly {} digits",
                    pin_length
                )),
                Some(_) => {}
            }
        }
        problems
    }
}

pub fn is_numeric_pin(pin: &str, pin_length: usize) -> bool {
    pin.len() == pin_length && pin.chars().all(|c| c.is_ascii_digit())
}
