pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_coupon_tables;

/// Unique index over generated coupon codes.
pub const ISSUED_COUPON_CODE_INDEX: &str = "idx_issued_coupons_unique_code";

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20250301_000001_create_coupon_tables::Migration)]
    }
}
