//! Tenants never see each other's data, sessions, or handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tenement::prelude::*;
use tenement::tenement_tenancy::{PoolConfig, TenantError};

async fn resolver(tenants: &[&str]) -> Arc<TenantResolver> {
    let store = Arc::new(InMemoryTenantStore::new());
    for id in tenants {
        store
            .create(&TenantRecord::new(*id, *id).with_subdomain(*id))
            .await
            .unwrap();
    }
    Arc::new(TenantResolver::new(
        StrategyChain::new()
            .with_strategy(HeaderStrategy::new("X-Tenant-ID"))
            .with_strategy(DomainStrategy::new("example.com")),
        store,
        &CacheConfig::default(),
    ))
}

#[tokio::test]
async fn test_tenant_stores_are_separate_files() {
    let dir = TempDir::new().unwrap();
    let pools = TenantPoolRegistry::new(PoolConfig::tenant());

    let mut tenants = Vec::new();
    for id in ["acme", "globex"] {
        let locator = format!("sqlite://{}/{}.db?mode=rwc", dir.path().display(), id);
        let handle = TenantStoreHandle::open(&locator, &PoolConfig::tenant(), true)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE notes (body TEXT NOT NULL)")
            .execute(handle.pool())
            .await
            .unwrap();
        handle.close().await;
        tenants.push(TenantRecord::new(id, id).with_store_locator(locator));
    }

    let acme = pools.get(&tenants[0]).await.unwrap();
    sqlx::query("INSERT INTO notes (body) VALUES ('acme secret')")
        .execute(acme.pool())
        .await
        .unwrap();

    let globex = pools.get(&tenants[1]).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
        .fetch_one(globex.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);

    // Same tenant, same pool.
    let again = pools.get(&tenants[0]).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
        .fetch_one(again.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(pools.opened(), 2);

    pools.close_all().await;
}

#[tokio::test]
async fn test_shared_session_cookie_is_rejected_at_startup() {
    let app = || TenantApp::from_fn(|_req: HttpRequest| async { Ok(HttpResponse::ok()) });

    let result = MultiTenantRouter::builder(resolver(&["acme", "globex"]).await)
        .handler("acme", app().with_session_cookie("sid"))
        .handler("globex", app().with_session_cookie("sid"))
        .build();
    assert!(matches!(result, Err(TenantError::Configuration(_))));

    let router = MultiTenantRouter::builder(resolver(&["acme", "globex"]).await)
        .handler("acme", app().with_session_cookie("acme_sid"))
        .handler("globex", app().with_session_cookie("globex_sid"))
        .build()
        .unwrap();
    assert_eq!(router.registered_tenants(), vec!["acme", "globex"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_traffic_across_tenants_builds_each_once() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let router = Arc::new(
        MultiTenantRouter::builder(resolver(&["acme", "globex", "initech"]).await)
            .factory(move |tenant: TenantRecord| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    let id = tenant.id.clone();
                    let app = TenantApp::from_fn(move |req: HttpRequest| {
                        let id = id.clone();
                        async move {
                            let seen = current_tenant_id(&req).unwrap_or_default();
                            Ok(HttpResponse::text(format!("{}/{}", id, seen)))
                        }
                    });
                    Ok::<Arc<dyn TenantHandler>, TenantError>(Arc::new(app))
                }
            })
            .build()
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for i in 0..60 {
        let tenant = ["acme", "globex", "initech"][i % 3];
        let router = router.clone();
        tasks.push(tokio::spawn(async move {
            let response = router
                .dispatch(HttpRequest::get("/").with_host(format!("{}.example.com", tenant)))
                .await;
            (tenant, response.body_text())
        }));
    }

    for task in tasks {
        let (tenant, body) = task.await.unwrap();
        assert_eq!(body, format!("{}/{}", tenant, tenant));
    }
    assert_eq!(builds.load(Ordering::SeqCst), 3);
    assert_eq!(router.stats().builds, 3);
}
