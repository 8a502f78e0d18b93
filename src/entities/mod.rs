pub mod coupon_template;
pub mod coupon_usage_log;
pub mod issued_coupon;
pub mod user;

pub use coupon_template::{
    DiscountType, Entity as CouponTemplate, Model as CouponTemplateModel, RedemptionMethod,
    RedemptionMethods, UsageType,
};
pub use coupon_usage_log::{Entity as CouponUsageLog, Model as CouponUsageLogModel};
pub use issued_coupon::{
    AssignmentMethod, Entity as IssuedCoupon, IssuedCouponStatus, Model as IssuedCouponModel,
};
pub use user::{Entity as User, Model as UserModel};
