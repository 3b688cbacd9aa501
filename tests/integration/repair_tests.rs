use super::*;
use drift_harvester::extractor::placeholders;
use drift_harvester::{AppError, ConfigRepair, Extractor, RepairOutcome, SelectorRule};
use tokio_test::{assert_err, assert_ok};

fn store_with_price_class(workspace: &Workspace, class: &str) -> Arc<SelectorStore> {
    let mut config = SelectorConfig::default_template();
    config.insert("price", SelectorRule::new("span", Some(class)));
    workspace.store_with(config)
}

#[tokio::test]
async fn test_price_drift_is_repaired() {
    let workspace = Workspace::new();
    let store = store_with_price_class(&workspace, "p-old");
    let repair = ConfigRepair::new(store.clone(), workspace.reference()).with_audit_log(workspace.audit_log());

    let reference = product_page("p-old");
    let candidate = product_page("p-new");
    assert_ok!(repair.set_baseline(&reference).await);

    let stale_config = store.snapshot().await;
    let stale = Extractor::parse(&candidate, "item", &stale_config).unwrap();
    assert_eq!(stale.price, placeholders::PRICE);

    let outcome = repair.run(&candidate).await.unwrap();
    let (version, patches) = match outcome {
        RepairOutcome::Patched { version, patches, .. } => (version, patches),
        other => panic!("expected a patched outcome, got {:?}", other),
    };
    assert_eq!(version, 2);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].field, "price");

    let live = store.snapshot().await;
    assert_eq!(live.resolve("price").and_then(|r| r.class.as_deref()), Some("p-new"));
    let fresh = Extractor::parse(&candidate, "item", &live).unwrap();
    assert_eq!(fresh.price, "1 299,00 BYN");

    let on_disk = SelectorConfig::load(&workspace.selectors()).unwrap();
    assert_eq!(on_disk.resolve("price").and_then(|r| r.class.as_deref()), Some("p-new"));
    assert_eq!(on_disk.version, 2);

    assert_eq!(std::fs::read_to_string(workspace.reference()).unwrap(), candidate);
    let audit = std::fs::read_to_string(workspace.audit_log()).unwrap();
    assert!(audit.lines().count() >= 1);
    assert!(audit.contains("p-new"));
}

#[tokio::test]
async fn test_repair_twice_reports_no_change() {
    let workspace = Workspace::new();
    let store = store_with_price_class(&workspace, "p-old");
    let repair = ConfigRepair::new(store.clone(), workspace.reference());

    repair.set_baseline(&product_page("p-old")).await.unwrap();
    let candidate = product_page("p-new");

    assert!(repair.run(&candidate).await.unwrap().is_patched());
    let second = repair.run(&candidate).await.unwrap();
    assert_eq!(second, RepairOutcome::NoChange { drift: vec![] });
    assert_eq!(store.snapshot().await.version, 2);
}

#[tokio::test]
async fn test_added_nodes_are_not_drift() {
    let workspace = Workspace::new();
    let store = workspace.store();
    let repair = ConfigRepair::new(store.clone(), workspace.reference());

    let reference = product_page("lz_28 zl_28 lz4_28");
    let candidate = reference.replace("</body>", "<section class=\"promo-banner\">Sale</section></body>");
    repair.set_baseline(&reference).await.unwrap();

    let outcome = repair.run(&candidate).await.unwrap();

    assert_eq!(outcome, RepairOutcome::NoChange { drift: vec![] });
    assert_eq!(store.snapshot().await.version, 1);
    assert_eq!(std::fs::read_to_string(workspace.reference()).unwrap(), reference);
}

#[tokio::test]
async fn test_missing_reference_is_fatal() {
    let workspace = Workspace::new();
    let repair = ConfigRepair::new(workspace.store(), workspace.reference());

    let err = assert_err!(repair.run(&product_page("p-new")).await);
    assert!(matches!(err, AppError::DriftBaselineMissing { .. }));
}

#[tokio::test]
async fn test_repair_visible_to_running_pipeline() {
    let workspace = Workspace::new();
    let store = store_with_price_class(&workspace, "p-old");
    let repair = ConfigRepair::new(store.clone(), workspace.reference());
    repair.set_baseline(&product_page("p-old")).await.unwrap();

    let ids = identities(1);
    let fetcher = Arc::new(ScriptedFetcher::serving(&ids, &product_page("p-new")));
    let pipeline = workspace.pipeline(fetcher, store.clone());

    repair.run(&product_page("p-new")).await.unwrap();
    let summary = pipeline.process(&ids, None).await;
    assert!(summary.success);

    let record = RecordStore::new(workspace.records()).load(&ids[0]).unwrap().unwrap();
    assert_eq!(record.price, "1 299,00 BYN");
}

#[tokio::test]
async fn test_repair_from_url_then_process_single_identity() {
    let workspace = Workspace::new();
    let store = store_with_price_class(&workspace, "p-old");
    let repair = ConfigRepair::new(store.clone(), workspace.reference());
    repair.set_baseline(&product_page("p-old")).await.unwrap();

    let url = identities(1).remove(0);
    let fetcher = Arc::new(ScriptedFetcher::serving(&[url.clone()], &product_page("p-new")));

    let outcome = repair.repair_from(fetcher.as_ref(), &url).await.unwrap();
    assert!(outcome.is_patched());
    assert_eq!(std::fs::read_to_string(workspace.reference()).unwrap(), product_page("p-new"));

    let pipeline = workspace.pipeline(fetcher.clone(), store);
    let first = pipeline.process_one(&url).await;
    let second = pipeline.process_one(&url).await;
    assert_eq!(first.status, second.status);

    let record = RecordStore::new(workspace.records()).load(&url).unwrap().expect("record written");
    assert_eq!(record.price, "1 299,00 BYN");
    assert_eq!(fetcher.calls(), vec![url.clone(), url.clone(), url.clone()]);
    assert_eq!(workspace.ledger_entries(), vec![url]);
}

#[tokio::test]
async fn test_repair_from_unreachable_url_is_fetch_error() {
    let workspace = Workspace::new();
    let store = store_with_price_class(&workspace, "p-old");
    let repair = ConfigRepair::new(store.clone(), workspace.reference());
    repair.set_baseline(&product_page("p-old")).await.unwrap();

    let url = identities(1).remove(0);
    let fetcher = ScriptedFetcher::default().failing(&url);

    let err = assert_err!(repair.repair_from(&fetcher, &url).await);
    assert!(matches!(err, AppError::Fetch(_)));
    assert_eq!(store.snapshot().await.version, 1);
}
