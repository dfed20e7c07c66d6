#![cfg(feature = "pg-tests")]

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{Barrier, Mutex};
use warden_core::auth::accounts::{Accounts, LoginMeta};
use warden_core::auth::password::BcryptHasher;
use warden_core::models::auth::ADMIN_ROLE;
use warden_core::rbac::bootstrap::{SeedConfig, seed};
use warden_core::rbac::engine::{CreateUser, RoleEngine};
use warden_core::rbac::{ForbiddenReason, RbacError};
use warden_core::store::{RoleStore, StoreError};
use warden_core::store::postgres::{PostgresStore, migrate};

// Tests share one database; run them one at a time.
static DB_LOCK: Mutex<()> = Mutex::const_new(());

async fn connect(url: &str) -> Result<PgPool, sqlx::Error> {
    match tokio::time::timeout(
        Duration::from_secs(2),
        PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(2))
            .connect(url),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(sqlx::Error::PoolTimedOut),
    }
}

async fn pg_engine() -> Option<(Arc<PostgresStore>, RoleEngine, Accounts)> {
    let url = match std::env::var("WARDEN_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping pg-tests: set WARDEN_TEST_DATABASE_URL or DATABASE_URL");
            return None;
        }
    };
    let pool = match connect(&url).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("skipping pg-tests: cannot connect to postgres: {err}");
            return None;
        }
    };
    migrate(&pool).await.expect("migrate");
    sqlx::query("TRUNCATE user_roles, reset_tokens, login_logs, users, roles")
        .execute(&pool)
        .await
        .expect("truncate");

    let store = Arc::new(PostgresStore::new(pool));
    let hasher = Arc::new(BcryptHasher::with_cost(4));
    seed(store.as_ref(), hasher.as_ref(), &SeedConfig::default())
        .await
        .expect("seed");
    let engine = RoleEngine::new(store.clone(), hasher.clone());
    let accounts = Accounts::new(store.clone(), hasher);
    Some((store, engine, accounts))
}

async fn seeded_admin(engine: &RoleEngine) -> uuid::Uuid {
    engine.list_users().await.expect("list")[0].user.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cross_revokes_leave_one_admin() {
    let _guard = DB_LOCK.lock().await;
    let Some((_, engine, _)) = pg_engine().await else {
        return;
    };
    let a = seeded_admin(&engine).await;
    let b = engine
        .create_user(CreateUser::new("bea", "bea@x.com", "pw"))
        .await
        .unwrap()
        .user
        .id;
    engine.grant_role(a, b, ADMIN_ROLE).await.unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let t1 = tokio::spawn({
        let (engine, barrier) = (engine.clone(), barrier.clone());
        async move {
            barrier.wait().await;
            engine.revoke_role(b, a, ADMIN_ROLE).await
        }
    });
    let t2 = tokio::spawn({
        let (engine, barrier) = (engine.clone(), barrier.clone());
        async move {
            barrier.wait().await;
            engine.revoke_role(a, b, ADMIN_ROLE).await
        }
    });
    let results = [t1.await.unwrap(), t2.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{results:?}");
    assert!(results.iter().any(|r| matches!(
        r,
        Err(RbacError::Forbidden(ForbiddenReason::AdminFloor))
    )));
    assert_eq!(engine.admin_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cross_deletes_leave_one_admin() {
    let _guard = DB_LOCK.lock().await;
    let Some((_, engine, _)) = pg_engine().await else {
        return;
    };
    let a = seeded_admin(&engine).await;
    let b = engine
        .create_user(CreateUser::new("bea", "bea@x.com", "pw"))
        .await
        .unwrap()
        .user
        .id;
    engine.grant_role(a, b, ADMIN_ROLE).await.unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let t1 = tokio::spawn({
        let (engine, barrier) = (engine.clone(), barrier.clone());
        async move {
            barrier.wait().await;
            engine.delete_user(b, a).await
        }
    });
    let t2 = tokio::spawn({
        let (engine, barrier) = (engine.clone(), barrier.clone());
        async move {
            barrier.wait().await;
            engine.delete_user(a, b).await
        }
    });
    let results = [t1.await.unwrap(), t2.await.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let floor = results
        .iter()
        .filter(|r| matches!(r, Err(RbacError::Forbidden(ForbiddenReason::AdminFloor))))
        .count();
    assert_eq!((ok, floor), (1, 1), "{results:?}");
    assert_eq!(engine.admin_count().await.unwrap(), 1);
    assert_eq!(engine.list_users().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn grant_racing_delete_is_ok_or_not_found() {
    let _guard = DB_LOCK.lock().await;
    let Some((_, engine, _)) = pg_engine().await else {
        return;
    };
    let a = seeded_admin(&engine).await;
    for i in 0..10 {
        let carl = engine
            .create_user(CreateUser::new(format!("carl{i}"), format!("carl{i}@x.com"), "pw"))
            .await
            .unwrap()
            .user
            .id;

        let barrier = Arc::new(Barrier::new(2));
        let grant = tokio::spawn({
            let (engine, barrier) = (engine.clone(), barrier.clone());
            async move {
                barrier.wait().await;
                engine.grant_role(a, carl, ADMIN_ROLE).await
            }
        });
        let delete = tokio::spawn({
            let (engine, barrier) = (engine.clone(), barrier.clone());
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
        assert!(matches!(
            engine.get_user(carl).await,
            Err(RbacError::NotFound(_))
        ));
    }
    assert_eq!(engine.admin_count().await.unwrap(), 1);
}

#[tokio::test]
async fn writes_referencing_missing_user_are_not_found() {
    let _guard = DB_LOCK.lock().await;
    let Some((store, engine, _)) = pg_engine().await else {
        return;
    };
    let admin_role = engine
        .list_roles()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.name == ADMIN_ROLE)
        .unwrap();
    let ghost = warden_core::ids::new_id();

    let mut tx = store.begin().await.unwrap();
    let err = tx.add_assignment(ghost, admin_role.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn delete_removes_dependents() {
    let _guard = DB_LOCK.lock().await;
    let Some((store, engine, accounts)) = pg_engine().await else {
        return;
    };
    let admin = seeded_admin(&engine).await;
    let bob = engine
        .create_user(CreateUser::new("bob", "bob@x.com", "pw"))
        .await
        .unwrap()
        .user
        .id;
    accounts
        .authenticate("bob", "pw", LoginMeta::default())
        .await
        .unwrap();
    accounts
        .issue_reset_token(bob, chrono::Duration::hours(1))
        .await
        .unwrap();

    engine.delete_user(admin, bob).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(tx.find_user(bob).await.unwrap().is_none());
    assert!(tx.user_role_names(bob).await.unwrap().is_empty());
    assert!(tx.reset_tokens_for(bob).await.unwrap().is_empty());
    assert!(tx.login_logs_for(bob).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_username_is_conflict() {
    let _guard = DB_LOCK.lock().await;
    let Some((_, engine, _)) = pg_engine().await else {
        return;
    };
    engine
        .create_user(CreateUser::new("carol", "carol@x.com", "pw"))
        .await
        .unwrap();
    let err = engine
        .create_user(CreateUser::new("carol", "c2@x.com", "pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, RbacError::Conflict(_)));
    assert_eq!(engine.list_users().await.unwrap().len(), 2);
}

#[tokio::test]
async fn seed_is_idempotent() {
    let _guard = DB_LOCK.lock().await;
    let Some((store, engine, _)) = pg_engine().await else {
        return;
    };
    let hasher = BcryptHasher::with_cost(4);
    let report = seed(store.as_ref(), &hasher, &SeedConfig::default())
        .await
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(engine.admin_count().await.unwrap(), 1);
}
