//! Commander claim challenges: issue, supersession, redemption races and
//! expiry.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p identity-service -- --ignored

mod common;

use chrono::{DateTime, Duration, Utc};
use common::setup;
use identity_service::config::{PasswordPolicy, RegistrationConfig};
use identity_service::models::{
    ChallengeSelector, ChallengeStatus, NewAccount, NewRegistrationChallenge,
    RegistrationChallenge,
};
use identity_service::utils::password::Password;
use identity_service::{Database, IdentityError, RegistrationService, ROLE_PLAYER};
use serial_test::serial;
use uuid::Uuid;

fn challenge(commander_id: u32, pin: &str, expires_utc: DateTime<Utc>) -> NewRegistrationChallenge {
    NewRegistrationChallenge {
        commander_id,
        pin: pin.to_string(),
        password_hash: "$argon2id$staged".to_string(),
        password_algo: "argon2id".to_string(),
        expires_utc,
    }
}

async fn issue(db: &Database, commander_id: u32, pin: &str, now: DateTime<Utc>) -> RegistrationChallenge {
    db.issue_registration_challenge(&challenge(commander_id, pin, now + Duration::minutes(5)), now)
        .await
        .expect("Failed to issue challenge")
}

#[tokio::test]
#[ignore] // Requires database
async fn second_issue_supersedes_pending_challenge() {
    let ctx = setup().await;
    let now = Utc::now();

    let first = issue(&ctx.db, 2001, "111111", now).await;
    let second = issue(&ctx.db, 2001, "222222", now).await;

    assert_ne!(first.id, second.id);
    assert_eq!(
        ctx.db.get_registration_challenge(first.id).await.unwrap().status,
        ChallengeStatus::Expired
    );
    assert_eq!(second.status, ChallengeStatus::Pending);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn issue_rejects_live_pin_and_existing_account() {
    let ctx = setup().await;
    let now = Utc::now();

    issue(&ctx.db, 3001, "333333", now).await;
    let err = ctx
        .db
        .issue_registration_challenge(&challenge(3002, "333333", now + Duration::minutes(5)), now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::PinExists));

    // Same PIN is free again once the holder's deadline has passed.
    let later = now + Duration::minutes(6);
    issue(&ctx.db, 3002, "333333", later).await;

    ctx.db
        .create_account(&NewAccount {
            commander_id: Some(3003),
            password_hash: "h".to_string(),
            password_algo: "argon2id".to_string(),
            ..NewAccount::default()
        })
        .await
        .unwrap();
    let err = ctx
        .db
        .issue_registration_challenge(&challenge(3003, "444444", now + Duration::minutes(5)), now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::AccountExists));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn consume_creates_player_account_and_stamps_challenge() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 4001, "123456", now).await;

    let account = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Id(issued.id), "123456", now)
        .await
        .unwrap();

    assert_eq!(account.commander_id, Some(4001));
    assert_eq!(account.password_hash, "$argon2id$staged");
    assert_eq!(ctx.db.list_account_role_names(account.id).await.unwrap(), vec![ROLE_PLAYER]);

    let stored = ctx.db.get_registration_challenge(issued.id).await.unwrap();
    assert_eq!(stored.status, ChallengeStatus::Consumed);
    assert!(stored.consumed_utc.is_some());

    let again = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Id(issued.id), "123456", now)
        .await
        .unwrap_err();
    assert!(matches!(again, IdentityError::ChallengeConsumed));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn concurrent_redemptions_create_exactly_one_account() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 5001, "654321", now).await;

    let (a, b) = tokio::join!(
        ctx.db.consume_registration_challenge(ChallengeSelector::Id(issued.id), "654321", now),
        ctx.db.consume_registration_challenge(ChallengeSelector::Commander(5001), "654321", now),
    );

    let (wins, losses): (Vec<_>, Vec<_>) = [a, b].into_iter().partition(|r| r.is_ok());
    assert_eq!(wins.len(), 1);
    assert_eq!(losses.len(), 1);
    let loser = losses.into_iter().next().unwrap().unwrap_err();
    assert!(
        matches!(loser, IdentityError::ChallengeConsumed | IdentityError::ChallengeExpired),
        "loser saw {loser:?}"
    );

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE commander_id = $1")
        .bind(5001_i64)
        .fetch_one(ctx.db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn consume_after_deadline_expires_challenge() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 6001, "246810", now).await;

    let err = ctx
        .db
        .consume_registration_challenge(
            ChallengeSelector::Id(issued.id),
            "246810",
            issued.expires_utc,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ChallengeExpired));

    let stored = ctx.db.get_registration_challenge(issued.id).await.unwrap();
    assert_eq!(stored.status, ChallengeStatus::Expired);
    assert!(matches!(
        ctx.db.get_account_by_commander_id(6001).await,
        Err(IdentityError::NotFound)
    ));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn mismatches_fail_without_mutation() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 7001, "135790", now).await;

    let err = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Id(issued.id), "000000", now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ChallengePinMismatch));

    let err = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Commander(7002), "135790", now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ChallengeMismatch));

    let err = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Commander(7001), "999999", now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ChallengeNotFound));

    let err = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Id(Uuid::new_v4()), "135790", now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::ChallengeNotFound));

    let stored = ctx.db.get_registration_challenge(issued.id).await.unwrap();
    assert_eq!(stored.status, ChallengeStatus::Pending);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn consume_refuses_when_commander_already_has_account() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 8001, "112233", now).await;

    ctx.db
        .create_account(&NewAccount {
            commander_id: Some(8001),
            password_hash: "h".to_string(),
            password_algo: "argon2id".to_string(),
            ..NewAccount::default()
        })
        .await
        .unwrap();

    let err = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Commander(8001), "112233", now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::AccountExists));
    assert_eq!(
        ctx.db.get_registration_challenge(issued.id).await.unwrap().status,
        ChallengeStatus::Pending
    );

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn status_updates_preserve_consumed_stamp() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 9001, "998877", now).await;

    ctx.db
        .update_registration_challenge_status(issued.id, ChallengeStatus::Consumed, now)
        .await
        .unwrap();
    let consumed = ctx.db.get_registration_challenge(issued.id).await.unwrap();
    let stamp = consumed.consumed_utc.expect("consumed stamp");

    ctx.db
        .update_registration_challenge_status(
            issued.id,
            ChallengeStatus::Expired,
            now + Duration::minutes(1),
        )
        .await
        .unwrap();
    ctx.db
        .update_registration_challenge_status(
            issued.id,
            ChallengeStatus::Consumed,
            now + Duration::minutes(2),
        )
        .await
        .unwrap();

    let stored = ctx.db.get_registration_challenge(issued.id).await.unwrap();
    assert_eq!(stored.status, ChallengeStatus::Consumed);
    assert_eq!(stored.consumed_utc, Some(stamp));

    assert!(matches!(
        ctx.db
            .update_registration_challenge_status(Uuid::new_v4(), ChallengeStatus::Expired, now)
            .await,
        Err(IdentityError::NotFound)
    ));

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn status_lookup_expires_overdue_challenge() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 9101, "101010", now).await;

    let fresh = ctx.db.registration_challenge_status(issued.id, now).await.unwrap();
    assert_eq!(fresh.status, ChallengeStatus::Pending);

    let late = ctx
        .db
        .registration_challenge_status(issued.id, now + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(late.status, ChallengeStatus::Expired);
    assert!(late.consumed_utc.is_none());

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn registration_service_issues_and_claims_with_display_pin() {
    let ctx = setup().await;
    let now = Utc::now();
    let service = RegistrationService::new(
        ctx.db.clone(),
        RegistrationConfig::default(),
        PasswordPolicy::default(),
    );

    let short = service
        .begin(9201, &Password::new("short".to_string()), now)
        .await
        .unwrap_err();
    assert!(matches!(short, IdentityError::PasswordPolicy(_)));

    let issued = service
        .begin(9201, &Password::new("a long enough passphrase".to_string()), now)
        .await
        .unwrap();
    assert!(issued.display_pin.starts_with("B-"));
    let drift = issued.challenge.expires_utc - (now + Duration::seconds(300));
    assert!(drift.num_milliseconds().abs() < 1);
    assert_eq!(issued.challenge.password_algo, "argon2id");

    let account = service
        .claim(issued.challenge.id, &format!(" {} ", issued.display_pin), now)
        .await
        .unwrap();
    assert_eq!(account.commander_id, Some(9201));
    assert!(account.password_hash.starts_with("$argon2id$"));

    let status = service.status(issued.challenge.id, now).await.unwrap();
    assert_eq!(status.status, ChallengeStatus::Consumed);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn concurrent_issues_never_share_a_live_pin() {
    let ctx = setup().await;
    let now = Utc::now();

    let handles: Vec<_> = (10_000u32..10_008)
        .map(|commander_id| {
            let db = ctx.db.clone();
            tokio::spawn(async move {
                db.issue_registration_challenge(
                    &challenge(commander_id, "777777", now + Duration::minutes(5)),
                    now,
                )
                .await
            })
        })
        .collect();

    let mut issued = 0;
    for handle in handles {
        match handle.await.expect("issue task panicked") {
            Ok(_) => issued += 1,
            Err(IdentityError::PinExists) => {}
            Err(other) => panic!("unexpected issue failure: {other:?}"),
        }
    }
    assert_eq!(issued, 1);

    let live: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_registration_challenges WHERE pin = $1 AND status = 'pending'",
    )
    .bind("777777")
    .fetch_one(ctx.db.pool())
    .await
    .unwrap();
    assert_eq!(live, 1);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn commander_uniqueness_stops_claim_racing_a_direct_insert() {
    let ctx = setup().await;
    let now = Utc::now();
    let issued = issue(&ctx.db, 10_100, "484848", now).await;

    // Account for the same commander, written but not yet committed.
    let mut rival = ctx.db.pool().begin().await.unwrap();
    sqlx::query(
        r#"
        INSERT INTO accounts (id, commander_id, password_hash, password_algo, password_updated_utc)
        VALUES ($1, $2, 'h', 'argon2id', NOW())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(10_100_i64)
    .execute(&mut *rival)
    .await
    .unwrap();

    // The claim passes its account pre-check and then waits on the commander
    // index behind the open insert.
    let db = ctx.db.clone();
    let claim = tokio::spawn(async move {
        db.consume_registration_challenge(ChallengeSelector::Id(issued.id), "484848", now)
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    rival.commit().await.unwrap();

    let err = claim.await.expect("claim task panicked").unwrap_err();
    assert!(matches!(err, IdentityError::AccountExists), "claim saw {err:?}");

    assert_eq!(
        ctx.db.get_registration_challenge(issued.id).await.unwrap().status,
        ChallengeStatus::Pending
    );
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE commander_id = $1")
        .bind(10_100_i64)
        .fetch_one(ctx.db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    ctx.teardown().await;
}

#[tokio::test]
#[ignore] // Requires database
async fn commander_claim_prefers_pending_over_superseded_twin() {
    let ctx = setup().await;
    let now = Utc::now();

    let superseded = issue(&ctx.db, 10_200, "565656", now).await;
    let live = issue(&ctx.db, 10_200, "565656", now).await;
    assert_eq!(superseded.created_utc, live.created_utc);

    let account = ctx
        .db
        .consume_registration_challenge(ChallengeSelector::Commander(10_200), "565656", now)
        .await
        .unwrap();
    assert_eq!(account.commander_id, Some(10_200));

    assert_eq!(
        ctx.db.get_registration_challenge(live.id).await.unwrap().status,
        ChallengeStatus::Consumed
    );
    assert_eq!(
        ctx.db.get_registration_challenge(superseded.id).await.unwrap().status,
        ChallengeStatus::Expired
    );

    ctx.teardown().await;
}
