mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{TemplateBuilder, TestApp};
use coupon_engine::{
    entities::UserModel,
    errors::ServiceError,
    providers::{DbTemplateRegistry, IdentityProvider, TemplateRegistry},
    services::coupons::reasons,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Identity layer that knows only a fixed set of users.
struct StaticDirectory {
    users: HashMap<Uuid, UserModel>,
}

#[async_trait]
impl IdentityProvider for StaticDirectory {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserModel>, ServiceError> {
        Ok(self.users.get(&id).cloned())
    }
}

fn directory_user(is_active: bool) -> UserModel {
    let id = Uuid::new_v4();
    UserModel {
        id,
        email: format!("{}@directory.test", id.simple()),
        display_name: "Directory user".to_string(),
        is_admin: false,
        is_active,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn template_registry_finds_by_code() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;
    let registry = DbTemplateRegistry::new(app.state.db.clone());

    let found = registry
        .find_template_by_code(&template.code)
        .await
        .expect("lookup");
    assert_eq!(found.map(|t| t.id), Some(template.id));

    let missing = registry
        .find_template_by_code("NO-SUCH-TEMPLATE")
        .await
        .expect("lookup");
    assert!(missing.is_none());
}

#[tokio::test]
async fn service_consults_injected_identity_provider() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;

    // Users exist only in the directory; the local users table is empty.
    let dormant = directory_user(false);
    let known_elsewhere = app.user().await;
    let directory = StaticDirectory {
        users: HashMap::from([(dormant.id, dormant.clone())]),
    };
    let service = app.service().clone().with_providers(
        Arc::new(DbTemplateRegistry::new(app.state.db.clone())),
        Arc::new(directory),
    );

    let eligibility = service
        .check_eligibility(template.id, dormant.id)
        .await
        .expect("preflight");
    assert_eq!(eligibility.reason.as_deref(), Some(reasons::USER_INACTIVE));

    let err = service
        .check_eligibility(template.id, known_elsewhere.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}
