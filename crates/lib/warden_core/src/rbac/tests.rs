use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;

use super::bootstrap::{SeedConfig, seed};
use super::engine::{CreateUser, RoleEngine};
use super::{ForbiddenReason, RbacError};
use crate::auth::accounts::{Accounts, LoginMeta};
use crate::auth::password::BcryptHasher;
use crate::ids::new_id;
use crate::models::auth::ADMIN_ROLE;
use crate::store::RoleStore;
use crate::store::memory::MemoryStore;

struct Fixture {
    store: Arc<MemoryStore>,
    engine: RoleEngine,
    accounts: Accounts,
    /// The seeded administrator.
    admin: Uuid,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let hasher = Arc::new(BcryptHasher::with_cost(4));
    seed(store.as_ref(), hasher.as_ref(), &SeedConfig::default())
        .await
        .expect("seed");
    let engine = RoleEngine::new(store.clone(), hasher.clone());
    let accounts = Accounts::new(store.clone(), hasher);
    let admin = engine.list_users().await.unwrap()[0].user.id;
    Fixture {
        store,
        engine,
        accounts,
        admin,
    }
}

impl Fixture {
    async fn create(&self, name: &str) -> Uuid {
        self.engine
            .create_user(CreateUser::new(name, format!("{name}@x.com"), "pw"))
            .await
            .expect("create user")
            .user
            .id
    }

    async fn create_admin(&self, name: &str) -> Uuid {
        let id = self.create(name).await;
        self.engine
            .grant_role(self.admin, id, ADMIN_ROLE)
            .await
            .expect("grant admin");
        id
    }
}

fn assert_forbidden<T: std::fmt::Debug>(result: Result<T, RbacError>, reason: ForbiddenReason) {
    match result {
        Err(RbacError::Forbidden(r)) => assert_eq!(r, reason),
        other => panic!("expected Forbidden({reason:?}), got {other:?}"),
    }
}

// -- seed ----------------------------------------------------------------

#[tokio::test]
async fn seed_creates_roles_and_single_admin() {
    let f = fixture().await;
    let roles: Vec<String> = f
        .engine
        .list_roles()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(roles, vec!["admin", "user"]);

    let users = f.engine.list_users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user.username, "admin");
    assert_eq!(users[0].roles, vec!["admin"]);
    assert_eq!(f.engine.admin_count().await.unwrap(), 1);
}

#[tokio::test]
async fn seed_is_idempotent() {
    let f = fixture().await;
    let hasher = BcryptHasher::with_cost(4);
    let report = seed(f.store.as_ref(), &hasher, &SeedConfig::default())
        .await
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(f.engine.list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn seed_promotes_existing_account_when_no_admin() {
    let store = Arc::new(MemoryStore::new());
    let hasher = Arc::new(BcryptHasher::with_cost(4));
    let engine = RoleEngine::new(store.clone(), hasher.clone());
    engine
        .create_user(CreateUser::new("admin", "someone@x.com", "pw"))
        .await
        .unwrap();

    let report = seed(store.as_ref(), hasher.as_ref(), &SeedConfig::default())
        .await
        .unwrap();
    assert!(report.admin_promoted);
    assert!(!report.admin_created);
    assert_eq!(report.roles_created, vec!["admin", "user"]);
    assert_eq!(engine.admin_count().await.unwrap(), 1);
}

#[tokio::test]
async fn seed_reports_taken_email_by_variable() {
    let store = Arc::new(MemoryStore::new());
    let hasher = Arc::new(BcryptHasher::with_cost(4));
    let engine = RoleEngine::new(store.clone(), hasher.clone());
    engine
        .create_user(CreateUser::new("carol", "admin@local", "pw"))
        .await
        .unwrap();

    let err = seed(store.as_ref(), hasher.as_ref(), &SeedConfig::default())
        .await
        .unwrap_err();
    match err {
        RbacError::Conflict(msg) => assert!(msg.contains("WARDEN_ADMIN_EMAIL"), "{msg}"),
        other => panic!("expected Conflict, got {other:?}"),
    }
    // Nothing from the failed run is kept.
    assert!(engine.list_roles().await.unwrap().is_empty());
    assert_eq!(engine.list_users().await.unwrap().len(), 1);

    let fixed = SeedConfig {
        admin_email: "root@local".into(),
        ..SeedConfig::default()
    };
    let report = seed(store.as_ref(), hasher.as_ref(), &fixed).await.unwrap();
    assert!(report.admin_created);
    assert_eq!(engine.admin_count().await.unwrap(), 1);
}

#[tokio::test]
async fn seed_rejects_invalid_config_before_writing() {
    let store = Arc::new(MemoryStore::new());
    let hasher = BcryptHasher::with_cost(4);
    let cases = [
        (
            SeedConfig {
                admin_username: "  ".into(),
                ..SeedConfig::default()
            },
            "WARDEN_ADMIN_USERNAME",
        ),
        (
            SeedConfig {
                admin_username: "a".repeat(33),
                ..SeedConfig::default()
            },
            "WARDEN_ADMIN_USERNAME",
        ),
        (
            SeedConfig {
                admin_email: format!("{}@x.com", "e".repeat(250)),
                ..SeedConfig::default()
            },
            "WARDEN_ADMIN_EMAIL",
        ),
        (
            SeedConfig {
                admin_password: String::new(),
                ..SeedConfig::default()
            },
            "WARDEN_ADMIN_PASSWORD",
        ),
    ];
    for (config, var) in cases {
        match seed(store.as_ref(), &hasher, &config).await {
            Err(RbacError::Validation(msg)) => assert!(msg.contains(var), "{msg}"),
            other => panic!("expected Validation for {var}, got {other:?}"),
        }
    }
    let mut tx = store.begin().await.unwrap();
    assert!(tx.list_roles().await.unwrap().is_empty());
}

// -- create --------------------------------------------------------------

#[tokio::test]
async fn create_user_attaches_default_role() {
    let f = fixture().await;
    let alice = f
        .engine
        .create_user(CreateUser::new(" alice ", "alice@x.com", "pw"))
        .await
        .unwrap();
    assert_eq!(alice.user.username, "alice");
    assert_eq!(alice.roles, vec!["user"]);
    assert!(alice.user.is_active);
}

#[tokio::test]
async fn create_user_with_missing_default_role_has_no_roles() {
    let f = fixture().await;
    let bob = f
        .engine
        .create_user(CreateUser::new("bob", "bob@x.com", "pw").with_default_role("auditor"))
        .await
        .unwrap();
    assert!(bob.roles.is_empty());
}

#[tokio::test]
async fn create_user_requires_username_and_email() {
    let f = fixture().await;
    for req in [
        CreateUser::new("  ", "a@x.com", "pw"),
        CreateUser::new("a", "", "pw"),
        CreateUser::new("a", "a@x.com", " "),
        CreateUser::new("x".repeat(33), "a@x.com", "pw"),
    ] {
        let err = f.engine.create_user(req).await.unwrap_err();
        assert!(matches!(err, RbacError::Validation(_)), "{err:?}");
    }
    assert_eq!(f.engine.list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_user_conflicts_on_username_or_email() {
    let f = fixture().await;
    f.create("alice").await;

    let same_name = f
        .engine
        .create_user(CreateUser::new("alice", "other@x.com", "pw"))
        .await
        .unwrap_err();
    let same_email = f
        .engine
        .create_user(CreateUser::new("alicia", "alice@x.com", "pw"))
        .await
        .unwrap_err();
    match (&same_name, &same_email) {
        (RbacError::Conflict(a), RbacError::Conflict(b)) => assert_eq!(a, b),
        other => panic!("expected two conflicts, got {other:?}"),
    }
    assert_eq!(f.engine.list_users().await.unwrap().len(), 2);
}

// -- grant / revoke ------------------------------------------------------

#[tokio::test]
async fn grant_is_idempotent() {
    let f = fixture().await;
    let alice = f.create("alice").await;
    let once = f.engine.grant_role(f.admin, alice, "admin").await.unwrap();
    let twice = f.engine.grant_role(f.admin, alice, "admin").await.unwrap();
    assert_eq!(once, vec!["admin", "user"]);
    assert_eq!(once, twice);
    assert_eq!(f.engine.admin_count().await.unwrap(), 2);
}

#[tokio::test]
async fn grant_to_self_is_allowed() {
    let f = fixture().await;
    let roles = f.engine.grant_role(f.admin, f.admin, "user").await.unwrap();
    assert_eq!(roles, vec!["admin", "user"]);
}

#[tokio::test]
async fn grant_reports_missing_user_or_role() {
    let f = fixture().await;
    let alice = f.create("alice").await;
    let err = f.engine.grant_role(f.admin, new_id(), "user").await.unwrap_err();
    assert!(matches!(err, RbacError::NotFound(_)));
    let err = f.engine.grant_role(f.admin, alice, "root").await.unwrap_err();
    assert!(matches!(err, RbacError::NotFound(_)));
}

#[tokio::test]
async fn revoke_unheld_role_is_noop() {
    let f = fixture().await;
    let alice = f.create("alice").await;
    let roles = f.engine.revoke_role(f.admin, alice, "admin").await.unwrap();
    assert_eq!(roles, vec!["user"]);
}

#[tokio::test]
async fn revoke_removes_role() {
    let f = fixture().await;
    let alice = f.create("alice").await;
    let roles = f.engine.revoke_role(f.admin, alice, "user").await.unwrap();
    assert!(roles.is_empty());
}

#[tokio::test]
async fn revoke_not_found_takes_precedence_over_self_check() {
    let f = fixture().await;
    let err = f
        .engine
        .revoke_role(f.admin, f.admin, "root")
        .await
        .unwrap_err();
    assert!(matches!(err, RbacError::NotFound(_)));
}

#[tokio::test]
async fn self_revoke_is_forbidden_regardless_of_admin_count() {
    let f = fixture().await;
    let alice = f.create_admin("alice").await;

    assert_forbidden(
        f.engine.revoke_role(f.admin, f.admin, "admin").await,
        ForbiddenReason::SelfRevoke,
    );
    assert_forbidden(
        f.engine.revoke_role(alice, alice, "user").await,
        ForbiddenReason::SelfRevoke,
    );
    assert_eq!(f.engine.admin_count().await.unwrap(), 2);
}

#[tokio::test]
async fn last_admin_cannot_be_revoked_or_deleted() {
    let f = fixture().await;
    // The actor does not hold admin; checking that is left to the caller.
    let alice = f.create("alice").await;

    assert_forbidden(
        f.engine.revoke_role(alice, f.admin, "admin").await,
        ForbiddenReason::AdminFloor,
    );
    assert_forbidden(
        f.engine.delete_user(alice, f.admin).await,
        ForbiddenReason::AdminFloor,
    );
    assert_eq!(f.engine.admin_count().await.unwrap(), 1);
    assert_eq!(f.engine.user_roles(f.admin).await.unwrap(), vec!["admin"]);
}

#[tokio::test]
async fn last_admin_may_lose_other_roles() {
    let f = fixture().await;
    let alice = f.create("alice").await;
    f.engine.grant_role(f.admin, f.admin, "user").await.unwrap();
    let roles = f.engine.revoke_role(alice, f.admin, "user").await.unwrap();
    assert_eq!(roles, vec!["admin"]);
}

// -- delete --------------------------------------------------------------

#[tokio::test]
async fn self_delete_is_forbidden() {
    let f = fixture().await;
    f.create_admin("alice").await;
    assert_forbidden(
        f.engine.delete_user(f.admin, f.admin).await,
        ForbiddenReason::SelfDelete,
    );
}

#[tokio::test]
async fn delete_missing_user_is_not_found() {
    let f = fixture().await;
    let err = f.engine.delete_user(f.admin, new_id()).await.unwrap_err();
    assert!(matches!(err, RbacError::NotFound(_)));
}

#[tokio::test]
async fn delete_cascades_to_dependents() {
    let f = fixture().await;
    let bob = f.create("bob").await;
    f.engine.grant_role(f.admin, bob, "admin").await.unwrap();
    f.accounts
        .authenticate("bob", "pw", LoginMeta::default())
        .await
        .unwrap();
    f.accounts
        .authenticate("bob", "wrong", LoginMeta::default())
        .await
        .unwrap_err();
    f.accounts
        .issue_reset_token(bob, Duration::hours(1))
        .await
        .unwrap();

    let deleted = f.engine.delete_user(f.admin, bob).await.unwrap();
    assert_eq!(deleted.id, bob);
    assert_eq!(deleted.username, "bob");

    assert!(matches!(
        f.engine.get_user(bob).await,
        Err(RbacError::NotFound(_))
    ));
    assert!(f.accounts.login_history(bob).await.is_err());

    let mut tx = f.store.begin().await.unwrap();
    assert!(tx.find_user(bob).await.unwrap().is_none());
    assert!(tx.user_role_names(bob).await.unwrap().is_empty());
    assert!(tx.reset_tokens_for(bob).await.unwrap().is_empty());
    assert!(tx.login_logs_for(bob).await.unwrap().is_empty());
    assert_eq!(tx.count_role_holders(ADMIN_ROLE).await.unwrap(), 1);
}

// -- reset password ------------------------------------------------------

#[tokio::test]
async fn reset_password_replaces_credential() {
    let f = fixture().await;
    let bob = f.create("bob").await;
    f.engine.reset_password(bob, " s3cret ").await.unwrap();
    assert!(
        f.accounts
            .authenticate("bob", "s3cret", LoginMeta::default())
            .await
            .is_ok()
    );
    assert!(
        f.accounts
            .authenticate("bob", "pw", LoginMeta::default())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn reset_password_errors() {
    let f = fixture().await;
    let bob = f.create("bob").await;
    let err = f.engine.reset_password(new_id(), "x").await.unwrap_err();
    assert!(matches!(err, RbacError::NotFound(_)));
    let err = f.engine.reset_password(bob, "   ").await.unwrap_err();
    assert!(matches!(err, RbacError::Validation(_)));
}

// -- concurrency ---------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cross_revokes_keep_one_admin() {
    for _ in 0..25 {
        let f = fixture().await;
        let a = f.admin;
        let b = f.create_admin("bea").await;
        let barrier = Arc::new(Barrier::new(2));

        let t1 = tokio::spawn({
            let engine = f.engine.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                engine.revoke_role(b, a, ADMIN_ROLE).await
            }
        });
        let t2 = tokio::spawn({
            let engine = f.engine.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                engine.revoke_role(a, b, ADMIN_ROLE).await
            }
        });
        let results = [t1.await.unwrap(), t2.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let floor = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(RbacError::Forbidden(ForbiddenReason::AdminFloor))
                )
            })
            .count();
        assert_eq!((ok, floor), (1, 1), "{results:?}");
        assert_eq!(f.engine.admin_count().await.unwrap(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cross_deletes_keep_one_admin() {
    for _ in 0..25 {
        let f = fixture().await;
        let a = f.admin;
        let b = f.create_admin("bea").await;
        let barrier = Arc::new(Barrier::new(2));

        let t1 = tokio::spawn({
            let engine = f.engine.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                engine.delete_user(b, a).await
            }
        });
        let t2 = tokio::spawn({
            let engine = f.engine.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                engine.delete_user(a, b).await
            }
        });
        let results = [t1.await.unwrap(), t2.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let floor = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(RbacError::Forbidden(ForbiddenReason::AdminFloor))
                )
            })
            .count();
        assert_eq!((ok, floor), (1, 1), "{results:?}");
        assert_eq!(f.engine.admin_count().await.unwrap(), 1);
        assert_eq!(f.engine.list_users().await.unwrap().len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn grant_racing_delete_is_ok_or_not_found() {
    for _ in 0..25 {
        let f = fixture().await;
        let a = f.admin;
        let carl = f.create("carl").await;
        let barrier = Arc::new(Barrier::new(2));

        let grant = tokio::spawn({
            let engine = f.engine.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                engine.grant_role(a, carl, ADMIN_ROLE).await
            }
        });
        let delete = tokio::spawn({
            let engine = f.engine.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                engine.delete_user(a, carl).await
            }
        });
        let granted = grant.await.unwrap();
        let deleted = delete.await.unwrap();

        assert!(
            matches!(granted, Ok(_) | Err(RbacError::NotFound(_))),
            "{granted:?}"
        );
        assert!(deleted.is_ok(), "{deleted:?}");
        let err = f.engine.get_user(carl).await.unwrap_err();
        assert!(matches!(err, RbacError::NotFound(_)));
        assert_eq!(f.engine.admin_count().await.unwrap(), 1);
    }
}

// -- end to end ----------------------------------------------------------

#[tokio::test]
async fn admin_handover_scenario() {
    let f = fixture().await;

    let alice = f
        .engine
        .create_user(CreateUser::new("alice", "alice@x.com", "pw"))
        .await
        .unwrap();
    assert_eq!(alice.roles, vec!["user"]);
    let alice = alice.user.id;

    let roles = f.engine.grant_role(f.admin, alice, "admin").await.unwrap();
    assert_eq!(roles, vec!["admin", "user"]);

    assert_forbidden(
        f.engine.revoke_role(f.admin, f.admin, "admin").await,
        ForbiddenReason::SelfRevoke,
    );

    let roles = f.engine.revoke_role(alice, f.admin, "admin").await.unwrap();
    assert!(roles.is_empty());

    assert_eq!(f.engine.admin_count().await.unwrap(), 1);
    assert_eq!(
        f.engine.user_roles(alice).await.unwrap(),
        vec!["admin", "user"]
    );

    // alice is now the last admin.
    assert_forbidden(
        f.engine.revoke_role(f.admin, alice, "admin").await,
        ForbiddenReason::AdminFloor,
    );
}
