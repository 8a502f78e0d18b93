mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{TemplateBuilder, TestApp};
use coupon_engine::{
    entities::IssuedCouponStatus,
    errors::ServiceError,
    events::Event,
    services::coupons::{reasons, AssignCouponInput, RedeemCouponInput, RedemptionResult},
};
use serde_json::json;

#[tokio::test]
async fn multi_use_coupon_redeems_until_exhausted() {
    let mut app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;
    let user = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, user.id, 3)
        .await
        .expect("issue");
    app.drain_events();

    for expected_used in 1..=2 {
        let result = app
            .service()
            .redeem(RedeemCouponInput::new(&coupon.unique_code))
            .await
            .expect("redeem");
        assert_matches!(result, RedemptionResult::Success { coupon: updated, .. } => {
            assert_eq!(updated.times_used, expected_used);
            assert_eq!(updated.status, IssuedCouponStatus::Active);
        });
    }

    let third = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code))
        .await
        .expect("redeem");
    assert_matches!(third, RedemptionResult::Success { coupon: updated, .. } => {
        assert_eq!(updated.times_used, 3);
        assert_eq!(updated.status, IssuedCouponStatus::FullyUsed);
    });

    let fourth = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code))
        .await
        .expect("redeem");
    assert_matches!(fourth, RedemptionResult::ValidationFailed { reasons: ref found } => {
        assert!(found.iter().any(|r| r == reasons::USAGE_LIMIT_REACHED));
        assert!(found.iter().any(|r| r == reasons::FULLY_USED));
    });

    let stored = app.reload(&coupon).await;
    assert_eq!(stored.times_used, 3);
    assert_eq!(stored.status, IssuedCouponStatus::FullyUsed);

    let history = app
        .service()
        .usage_history(coupon.id)
        .await
        .expect("history");
    assert_eq!(history.len(), 3, "one log entry per successful redemption");

    let redeemed: Vec<_> = app
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            Event::CouponRedeemed {
                times_used,
                fully_used,
                ..
            } => Some((times_used, fully_used)),
            _ => None,
        })
        .collect();
    assert_eq!(redeemed, vec![(1, false), (2, false), (3, true)]);
}

#[tokio::test]
async fn fully_used_coupon_is_rejected_without_increment() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::single_use().insert(app.db()).await;
    let user = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, user.id, 1)
        .await
        .expect("issue");

    let first = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code))
        .await
        .expect("redeem");
    assert!(first.is_success());

    for _ in 0..3 {
        let again = app
            .service()
            .redeem(RedeemCouponInput::new(&coupon.unique_code))
            .await
            .expect("redeem");
        assert!(again.reasons().iter().any(|r| r.contains("fully used")));
        assert!(again.reasons().iter().any(|r| r == reasons::USAGE_LIMIT_REACHED));
    }

    assert_eq!(app.reload(&coupon).await.times_used, 1);
    assert_eq!(app.service().usage_history(coupon.id).await.expect("history").len(), 1);
}

#[tokio::test]
async fn expired_coupon_is_rejected() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;
    let user = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, user.id, 2)
        .await
        .expect("issue");
    let coupon = app
        .set_coupon_expiry(&coupon, Some(Utc::now() - Duration::days(1)))
        .await;
    assert_eq!(coupon.status, IssuedCouponStatus::Active);
    assert_eq!(coupon.effective_status(Utc::now()), IssuedCouponStatus::Expired);

    let result = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code))
        .await
        .expect("redeem");
    assert_eq!(
        result,
        RedemptionResult::ValidationFailed {
            reasons: vec![reasons::COUPON_EXPIRED.to_string()],
        }
    );

    let stored = app.reload(&coupon).await;
    assert_eq!(stored.times_used, 0);
    assert_eq!(stored.status, IssuedCouponStatus::Active, "expiry is never written");
}

#[tokio::test]
async fn pin_only_template_checks_pin() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use()
        .methods("pin")
        .pin("123456")
        .insert(app.db())
        .await;
    let user = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, user.id, 5)
        .await
        .expect("issue");

    let wrong = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code).with_pin("000000"))
        .await
        .expect("redeem");
    assert_eq!(wrong.reasons(), [reasons::INVALID_PIN.to_string()]);

    let missing = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code))
        .await
        .expect("redeem");
    assert_eq!(missing.reasons(), [reasons::PIN_REQUIRED.to_string()]);
    assert_eq!(app.reload(&coupon).await.times_used, 0);

    let right = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code).with_pin(" 123456 "))
        .await
        .expect("redeem");
    assert!(right.is_success());
    assert_eq!(app.reload(&coupon).await.times_used, 1);
}

#[tokio::test]
async fn pin_on_qr_only_template_is_refused() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;
    let user = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, user.id, 1)
        .await
        .expect("issue");

    let result = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code).with_pin("123456"))
        .await
        .expect("redeem");
    assert_eq!(result.reasons(), [reasons::PIN_NOT_ENABLED.to_string()]);
}

#[tokio::test]
async fn pin_and_validity_reasons_are_merged() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use()
        .methods("qr,pin")
        .pin("654321")
        .insert(app.db())
        .await;
    let user = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, user.id, 1)
        .await
        .expect("issue");
    let coupon = app
        .set_coupon_expiry(&coupon, Some(Utc::now() - Duration::hours(1)))
        .await;

    let result = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code).with_pin("111111"))
        .await
        .expect("redeem");
    assert_eq!(
        result.reasons(),
        [
            reasons::COUPON_EXPIRED.to_string(),
            reasons::INVALID_PIN.to_string()
        ]
    );

    // QR redemption on a mixed template needs no PIN.
    let fresh = app
        .service()
        .issue_one(template.id, user.id, 1)
        .await
        .expect("issue");
    let qr = app
        .service()
        .redeem(RedeemCouponInput::new(&fresh.unique_code))
        .await
        .expect("redeem");
    assert!(qr.is_success());
}

#[tokio::test]
async fn unknown_blank_and_miscased_codes_are_not_found() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;
    let user = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, user.id, 1)
        .await
        .expect("issue");

    for code in [
        String::new(),
        "   ".to_string(),
        "ZZZZZZZZZZZZ".to_string(),
        coupon.unique_code.to_lowercase(),
        format!(" {}", coupon.unique_code),
    ] {
        let result = app
            .service()
            .redeem(RedeemCouponInput::new(code))
            .await
            .expect("redeem");
        assert_eq!(result, RedemptionResult::NotFound);
    }
    assert_eq!(app.reload(&coupon).await.times_used, 0);
}

#[tokio::test]
async fn usage_log_records_context() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;
    let owner = app.user().await;
    let cashier = app.user().await;
    let coupon = app
        .service()
        .issue_one(template.id, owner.id, 2)
        .await
        .expect("issue");

    let first = app
        .service()
        .redeem(
            RedeemCouponInput::new(&coupon.unique_code)
                .with_location("Hall B")
                .with_details(json!({"device": "kiosk-3", "channel": "onsite"})),
        )
        .await
        .expect("redeem");
    let first_entry = match first {
        RedemptionResult::Success { log_entry, .. } => log_entry,
        other => panic!("expected success, got {:?}", other),
    };
    assert_eq!(first_entry.issued_coupon_id, coupon.id);
    assert_eq!(first_entry.redeemed_by_user_id, owner.id);
    assert_eq!(first_entry.location.as_deref(), Some("Hall B"));
    assert_eq!(
        first_entry.details,
        Some(json!({"device": "kiosk-3", "channel": "onsite"}))
    );

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    app.service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code).redeemed_by(cashier.id))
        .await
        .expect("redeem");

    let history = app
        .service()
        .usage_history(coupon.id)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first_entry.id, "oldest first");
    assert_eq!(history[1].redeemed_by_user_id, cashier.id);
    assert_eq!(history[1].location, None);
}

#[tokio::test]
async fn assigned_coupon_starts_available_and_finishes_fully_used() {
    let app = TestApp::new().await;
    let template = TemplateBuilder::multi_use().insert(app.db()).await;
    let admin = app.admin().await;
    let user = app.user().await;
    let coupon = app
        .service()
        .assign(
            AssignCouponInput::new(template.id, user.id, admin.id, "Service recovery")
                .with_times_can_be_used(2),
        )
        .await
        .expect("assign");
    assert_eq!(coupon.status, IssuedCouponStatus::Available);

    let first = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code))
        .await
        .expect("redeem");
    assert_matches!(first, RedemptionResult::Success { coupon: updated, .. } => {
        assert_eq!(updated.status, IssuedCouponStatus::Available);
        assert_eq!(updated.times_used, 1);
    });

    let second = app
        .service()
        .redeem(RedeemCouponInput::new(&coupon.unique_code))
        .await
        .expect("redeem");
    assert_matches!(second, RedemptionResult::Success { coupon: updated, .. } => {
        assert_eq!(updated.status, IssuedCouponStatus::FullyUsed);
        assert_eq!(updated.times_used, updated.times_can_be_used);
    });
}

#[tokio::test]
async fn oversized_location_is_an_input_error() {
    let app = TestApp::new().await;
    let err = app
        .service()
        .redeem(RedeemCouponInput::new("ABCDEFGH2345").with_location("x".repeat(256)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn redemption_result_serialises_with_outcome_tag() {
    let app = TestApp::new().await;
    let result = app
        .service()
        .redeem(RedeemCouponInput::new("NOSUCHCODE22"))
        .await
        .expect("redeem");
    assert_eq!(
        serde_json::to_value(&result).expect("serialise"),
        json!({"outcome": "not_found"})
    );

    let failed = RedemptionResult::ValidationFailed {
        reasons: vec![reasons::COUPON_EXPIRED.to_string()],
    };
    assert_eq!(
        serde_json::to_value(&failed).expect("serialise"),
        json!({"outcome": "validation_failed", "reasons": ["coupon has expired"]})
    );
}
