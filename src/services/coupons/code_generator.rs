use metrics::counter;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, TransactionTrait,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::is_code_collision;
use crate::entities::{issued_coupon, IssuedCoupon, IssuedCouponModel};
use crate::errors::ServiceError;

/// Uppercase letters and digits minus the look-alikes `0`, `O`, `1` and `I`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Produces candidate codes. Uniqueness is checked by [`CodeGenerator`].
pub trait CodeSource: Send + Sync + fmt::Debug {
    fn next_code(&self, length: usize) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn next_code(&self, length: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

pub fn is_valid_code(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[derive(Debug, Clone)]
pub struct CodeGenerator {
    source: Arc<dyn CodeSource>,
    length: usize,
    max_attempts: u32,
}

impl CodeGenerator {
    pub fn new(source: Arc<dyn CodeSource>, length: usize, max_attempts: u32) -> Self {
        Self {
            source,
            length,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns a code that no issued coupon currently uses.
    ///
    /// The check is advisory; the unique index on `unique_code` has the last
    /// word, see [`CodeGenerator::insert_unique`].
    pub async fn generate<C: ConnectionTrait>(&self, conn: &C) -> Result<String, ServiceError> {
        for attempt in 1..=self.max_attempts {
            let code = self.source.next_code(self.length);
            if !code_exists(conn, &code).await? {
                return Ok(code);
            }
            counter!("coupon_engine.code.collision", 1);
            debug!(attempt, "Generated coupon code already in use");
        }

        warn!(attempts = self.max_attempts, "Coupon code generation exhausted");
        Err(ServiceError::CodeGenerationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Inserts the row produced by `build` under a freshly generated code.
    ///
    /// Each insert runs in its own savepoint. A unique violation on the code
    /// rolls back just that savepoint and retries with a new code; any other
    /// error is returned untouched so callers can classify it.
    pub async fn insert_unique<F>(
        &self,
        txn: &DatabaseTransaction,
        build: F,
    ) -> Result<IssuedCouponModel, ServiceError>
    where
        F: Fn(String) -> issued_coupon::ActiveModel,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.source.next_code(self.length);
            if code_exists(txn, &code).await? {
                counter!("coupon_engine.code.collision", 1);
                debug!(attempt, "Generated coupon code already in use");
                continue;
            }

            let savepoint = txn.begin().await?;
            match build(code).insert(&savepoint).await {
                Ok(model) => {
                    savepoint.commit().await?;
                    return Ok(model);
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    if !is_code_collision(&err) {
                        return Err(err.into());
                    }
                    counter!("coupon_engine.code.collision", 1);
                    debug!(attempt, "Coupon code taken by a concurrent insert");
                }
            }
        }

        warn!(attempts = self.max_attempts, "Coupon code generation exhausted");
        Err(ServiceError::CodeGenerationExhausted {
            attempts: self.max_attempts,
        })
    }
}

async fn code_exists<C: ConnectionTrait>(conn: &C, code: &str) -> Result<bool, ServiceError> {
    let count = IssuedCoupon::find()
        .filter(issued_coupon::Column::UniqueCode.eq(code))
        .count(conn)
        .await?;
    Ok(count > 0)
}
