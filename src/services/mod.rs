// Coupon issuance and redemption engine
pub mod coupons;

pub use coupons::CouponService;
