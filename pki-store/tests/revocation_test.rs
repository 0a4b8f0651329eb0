mod common;

use common::{build_pki, test_logger, MockFetcher, Reply, BACKUP_CRL_URL, CRL_URL};
use pki_store::revocation::{check_crl_time, crl_path, get_crl_dist_points, get_crl_local};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pki_store::{
    Category, Crl, Filter, ItemType, MemoryKeyStore, NativeProvider, PkiStore, ProviderKind, RevocationResolver,
    StoreConfig, StoreError, SystemProvider,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SYSTEM: &str = "SYSTEM";

fn resolver(fetcher: Arc<MockFetcher>) -> RevocationResolver {
    RevocationResolver::new(fetcher, &test_logger())
}

fn system_store(dir: &std::path::Path) -> PkiStore {
    let store = PkiStore::new(&test_logger());
    let provider = SystemProvider::new(dir, &test_logger()).expect("system provider");
    store.add_provider(Arc::new(provider)).expect("add provider");
    store
}

#[test]
fn test_dist_points_and_freshness() {
    let pki = build_pki();
    assert_eq!(
        get_crl_dist_points(&pki.leaf),
        vec![CRL_URL.to_string(), BACKUP_CRL_URL.to_string()]
    );
    assert!(get_crl_dist_points(&pki.root).is_empty());

    assert!(check_crl_time(&pki.crl_empty));
    assert!(!check_crl_time(&pki.crl_stale));
}

#[tokio::test]
async fn test_download_falls_back_to_next_point() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let fetcher = Arc::new(
        MockFetcher::default()
            .reply(CRL_URL, Reply::Fail)
            .reply(BACKUP_CRL_URL, Reply::Body(pki.crl_empty.der().to_vec())),
    );
    let destination = dir.path().join("intermediate.crl");

    let crl = resolver(fetcher.clone())
        .download_crl(&get_crl_dist_points(&pki.leaf), &destination)
        .await
        .expect("download");
    assert_eq!(crl.thumbprint(), pki.crl_empty.thumbprint());
    assert_eq!(fetcher.requests(), vec![CRL_URL.to_string(), BACKUP_CRL_URL.to_string()]);
    assert_eq!(Crl::load(&destination).expect("written").thumbprint(), pki.crl_empty.thumbprint());
}

#[tokio::test]
async fn test_download_reports_when_every_point_fails() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let fetcher = Arc::new(
        MockFetcher::default()
            .reply(CRL_URL, Reply::Body(b"<html>not a crl</html>".to_vec()))
            .reply(BACKUP_CRL_URL, Reply::Fail),
    );
    let destination = dir.path().join("intermediate.crl");

    let result = resolver(fetcher)
        .download_crl(&get_crl_dist_points(&pki.leaf), &destination)
        .await;
    match result {
        Err(StoreError::AllDistPointsUnreachable(failures)) => assert_eq!(failures.len(), 2),
        other => panic!("expected AllDistPointsUnreachable, got {other:?}"),
    }
    assert!(!destination.exists());

    let empty = resolver(Arc::new(MockFetcher::default()))
        .download_crl(&[], &destination)
        .await;
    assert!(matches!(empty, Err(StoreError::AllDistPointsUnreachable(f)) if f.is_empty()));
}

#[tokio::test]
async fn test_deadline_reports_timeout_once() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let fetcher = Arc::new(MockFetcher::default().reply(CRL_URL, Reply::Hang));
    let destination = dir.path().join("intermediate.crl");
    let outcomes: Arc<Mutex<Vec<pki_store::Result<Crl>>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = outcomes.clone();
    resolver(fetcher)
        .download_crl_with(
            &get_crl_dist_points(&pki.leaf),
            &destination,
            Some(Duration::from_millis(50)),
            move |result| sink.lock().expect("sink").push(result),
        )
        .await;

    let outcomes = outcomes.lock().expect("outcomes");
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Err(StoreError::Timeout(_))));
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_completion_receives_success() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let fetcher = Arc::new(MockFetcher::default().reply(CRL_URL, Reply::Body(pki.crl_empty.der().to_vec())));
    let destination = dir.path().join("intermediate.crl");
    let calls = Arc::new(Mutex::new(0usize));

    let counter = calls.clone();
    resolver(fetcher)
        .download_crl_with(&get_crl_dist_points(&pki.leaf), &destination, None, move |result| {
            assert!(result.is_ok());
            *counter.lock().expect("counter") += 1;
        })
        .await;
    assert_eq!(*calls.lock().expect("calls"), 1);
}

#[test]
fn test_local_lookup_prefers_fresh_crl() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let store = system_store(dir.path());

    assert!(get_crl_local(&pki.leaf, &store).expect("lookup").is_none());

    store.add_crl(SYSTEM, &pki.crl_stale).expect("stale");
    let found = get_crl_local(&pki.leaf, &store).expect("lookup").expect("some");
    assert_eq!(found.thumbprint(), pki.crl_stale.thumbprint());

    store.add_crl(SYSTEM, &pki.crl_empty).expect("fresh");
    let found = get_crl_local(&pki.leaf, &store).expect("lookup").expect("some");
    assert_eq!(found.thumbprint(), pki.crl_empty.thumbprint());

    // Certificates from other issuers are not covered
    assert!(get_crl_local(&pki.intermediate, &store).expect("lookup").is_none());
}

#[tokio::test]
async fn test_refresh_downloads_only_when_stale() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let store = system_store(&dir.path().join("store"));
    store.add_cert(SYSTEM, Category::Trust, &pki.root).expect("root");
    store.add_crl(SYSTEM, &pki.crl_stale).expect("stale");

    let crl_dir = dir.path().join("crl");
    std::fs::create_dir_all(&crl_dir).expect("crl dir");
    let fetcher = Arc::new(
        MockFetcher::default().reply(CRL_URL, Reply::Body(pki.crl_revoking_leaf.der().to_vec())),
    );
    let resolver = resolver(fetcher.clone());

    let refreshed = resolver
        .refresh_crl(&pki.leaf, &store, SYSTEM, &crl_dir)
        .await
        .expect("refresh");
    assert_eq!(refreshed.thumbprint(), pki.crl_revoking_leaf.thumbprint());
    assert!(crl_path(&crl_dir, &pki.leaf).exists());
    assert_eq!(store.get_crls(None).expect("crls").len(), 2);
    assert_eq!(fetcher.requests().len(), 1);

    // Now fresh locally: no further network access
    let again = resolver
        .refresh_crl(&pki.leaf, &store, SYSTEM, &crl_dir)
        .await
        .expect("refresh again");
    assert_eq!(again.thumbprint(), pki.crl_revoking_leaf.thumbprint());
    assert_eq!(fetcher.requests().len(), 1);

    // Nothing to download from
    assert!(matches!(
        resolver.refresh_crl(&pki.root, &store, SYSTEM, &crl_dir).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_refresh_skips_crl_from_another_issuer() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let store = system_store(&dir.path().join("store"));
    let crl_dir = dir.path().join("crl");
    std::fs::create_dir_all(&crl_dir).expect("crl dir");
    let fetcher = Arc::new(
        MockFetcher::default()
            .reply(CRL_URL, Reply::Body(pki.crl_from_root.der().to_vec()))
            .reply(BACKUP_CRL_URL, Reply::Body(pki.crl_empty.der().to_vec())),
    );

    let crl = resolver(fetcher.clone())
        .refresh_crl(&pki.leaf, &store, SYSTEM, &crl_dir)
        .await
        .expect("refresh");
    assert!(crl.equals(&pki.crl_empty));
    assert_eq!(fetcher.requests().len(), 2);
    let stored = store.get_crls(None).expect("crls");
    assert_eq!(stored.len(), 1);
    assert!(stored[0].equals(&pki.crl_empty));
    assert!(Crl::load(&crl_path(&crl_dir, &pki.leaf)).expect("written").equals(&pki.crl_empty));
}

#[tokio::test]
async fn test_refresh_rejects_when_only_foreign_crls_are_served() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let store = system_store(&dir.path().join("store"));
    let fetcher = Arc::new(
        MockFetcher::default()
            .reply(CRL_URL, Reply::Body(pki.crl_from_root.der().to_vec()))
            .reply(BACKUP_CRL_URL, Reply::Body(pki.crl_from_root.der().to_vec())),
    );

    let result = resolver(fetcher)
        .refresh_crl(&pki.leaf, &store, SYSTEM, dir.path())
        .await;
    assert!(matches!(result, Err(StoreError::AllDistPointsUnreachable(f)) if f.len() == 2));
    assert!(store.get_crls(None).expect("crls").is_empty());
    assert!(!crl_path(dir.path(), &pki.leaf).exists());
}

#[tokio::test]
async fn test_refresh_downloads_when_local_file_vanished() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let root_dir = dir.path().join("store");
    let store = system_store(&root_dir);
    store.add_crl(SYSTEM, &pki.crl_empty).expect("crl");
    let record = store
        .find(Some(&Filter::new().item_type(ItemType::Crl)))
        .expect("find")
        .remove(0);
    std::fs::remove_file(root_dir.join(&record.uri)).expect("delete");

    assert!(get_crl_local(&pki.leaf, &store).expect("lookup").is_none());

    let fetcher = Arc::new(MockFetcher::default().reply(CRL_URL, Reply::Body(pki.crl_empty.der().to_vec())));
    let crl = resolver(fetcher.clone())
        .refresh_crl(&pki.leaf, &store, SYSTEM, dir.path())
        .await
        .expect("refresh");
    assert!(crl.equals(&pki.crl_empty));
    assert_eq!(fetcher.requests().len(), 1);
}

#[tokio::test]
async fn test_refresh_ignores_records_of_unregistered_providers() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let cache_path = dir.path().join("cache.json");
    {
        let elsewhere = system_store(&dir.path().join("elsewhere"));
        elsewhere.add_crl(SYSTEM, &pki.crl_empty).expect("crl");
        elsewhere.save_cache(&cache_path).expect("save");
    }

    let backend = Arc::new(MemoryKeyStore::new());
    let native = NativeProvider::new(ProviderKind::Microsoft, backend, &test_logger()).expect("native");
    let store = PkiStore::new(&test_logger());
    store.add_provider(Arc::new(native)).expect("add");
    assert_eq!(store.load_cache(&cache_path).expect("load"), 1);

    assert!(get_crl_local(&pki.leaf, &store).expect("lookup").is_none());

    let fetcher = Arc::new(MockFetcher::default().reply(CRL_URL, Reply::Body(pki.crl_empty.der().to_vec())));
    let crl = resolver(fetcher)
        .refresh_crl(&pki.leaf, &store, "MICROSOFT", dir.path())
        .await
        .expect("refresh");
    assert!(crl.equals(&pki.crl_empty));
    let found = get_crl_local(&pki.leaf, &store).expect("lookup").expect("stored");
    assert!(found.equals(&pki.crl_empty));
}

#[tokio::test]
async fn test_refresh_into_configured_folder() {
    let pki = build_pki();
    let dir = tempfile::tempdir().expect("tmpdir");
    let config = StoreConfig::in_dir(dir.path());
    let crl_dir = config.crl_dir.clone().expect("crl dir");

    let configured = RevocationResolver::from_config(&config, &test_logger()).expect("from config");
    assert_eq!(configured.crl_dir(), Some(crl_dir.as_path()));

    let store = system_store(&dir.path().join("store"));
    let fetcher = Arc::new(MockFetcher::default().reply(CRL_URL, Reply::Body(pki.crl_empty.der().to_vec())));

    let unconfigured = resolver(fetcher.clone());
    assert!(matches!(
        unconfigured.refresh(&pki.leaf, &store, SYSTEM).await,
        Err(StoreError::NotFound(_))
    ));

    let crl = resolver(fetcher)
        .with_crl_dir(&crl_dir)
        .refresh(&pki.leaf, &store, SYSTEM)
        .await
        .expect("refresh");
    assert!(crl.equals(&pki.crl_empty));
    assert!(crl_path(&crl_dir, &pki.leaf).exists());
}

#[tokio::test]
async fn test_trust_lists_load_per_url() {
    let pki = build_pki();
    let good = "https://tsl.test.invalid/good.xml";
    let bad = "https://tsl.test.invalid/missing.xml";
    let xml = format!(
        "<TrustServiceStatusList><X509Certificate>{}</X509Certificate></TrustServiceStatusList>",
        STANDARD.encode(pki.root.der())
    );
    let fetcher = MockFetcher::default().reply(good, Reply::Body(xml.into_bytes()));

    let store = PkiStore::new(&test_logger());
    let reports = store
        .load_trust_lists(&[good.to_string(), bad.to_string()], &fetcher)
        .await;
    assert_eq!(reports.len(), 2);
    assert!(reports[0].is_ok());
    assert_eq!(reports[0].provider, format!("TSL:{good}"));
    assert_eq!(reports[0].items, 1);
    assert!(matches!(reports[1].error, Some(StoreError::Unreachable(_))));

    let certs = store.get_certs(None).expect("certs");
    assert_eq!(certs.len(), 1);
    assert!(certs[0].equals(&pki.root));
}
