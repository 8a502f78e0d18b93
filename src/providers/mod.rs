//! Collaborators the coupon engine reads from but never writes.
//!
//! Templates are owned by organizer tooling and users by the identity
//! layer. The engine only needs lookups, so both are narrow async traits
//! with database-backed defaults.

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{coupon_template, CouponTemplate, CouponTemplateModel, User, UserModel};
use crate::errors::ServiceError;

#[async_trait]
pub trait TemplateRegistry: Send + Sync {
    async fn find_template(&self, id: Uuid) -> Result<Option<CouponTemplateModel>, ServiceError>;

    /// Lookup by the human-entered template code.
    async fn find_template_by_code(
        &self,
        code: &str,
    ) -> Result<Option<CouponTemplateModel>, ServiceError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserModel>, ServiceError>;
}

#[derive(Clone)]
pub struct DbTemplateRegistry {
    db: Arc<DatabaseConnection>,
}

impl DbTemplateRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TemplateRegistry for DbTemplateRegistry {
    async fn find_template(&self, id: Uuid) -> Result<Option<CouponTemplateModel>, ServiceError> {
        Ok(CouponTemplate::find_by_id(id).one(&*self.db).await?)
    }

    async fn find_template_by_code(
        &self,
        code: &str,
    ) -> Result<Option<CouponTemplateModel>, ServiceError> {
        Ok(CouponTemplate::find()
            .filter(coupon_template::Column::Code.eq(code))
            .one(&*self.db)
            .await?)
    }
}

#[derive(Clone)]
pub struct DbIdentityProvider {
    db: Arc<DatabaseConnection>,
}

impl DbIdentityProvider {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityProvider for DbIdentityProvider {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserModel>, ServiceError> {
        Ok(User::find_by_id(id).one(&*self.db).await?)
    }
}
