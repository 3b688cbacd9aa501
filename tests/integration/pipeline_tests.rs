use super::*;
use drift_harvester::pipeline::ItemStatus;
use rstest::rstest;

fn page() -> String {
    product_page("lz_28 zl_28 lz4_28")
}

#[tokio::test]
async fn test_second_of_five_fails() {
    let workspace = Workspace::new();
    let ids = identities(5);
    let fetcher = Arc::new(ScriptedFetcher::serving(&ids, &page()).failing(&ids[1]));

    let summary = workspace.pipeline(fetcher, workspace.store()).process(&ids, None).await;

    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.total, 5);
    assert!(!summary.success);
    assert!(matches!(summary.results[1].status, ItemStatus::Failed { .. }));

    let mut expected: Vec<String> = ids.clone();
    expected.remove(1);
    assert_eq!(workspace.ledger_entries(), expected);
}

#[tokio::test]
async fn test_ledger_monotonic_across_restarts() {
    let workspace = Workspace::new();
    let ids = identities(4);

    let flaky = Arc::new(ScriptedFetcher::serving(&ids, &page()).failing(&ids[2]));
    workspace.pipeline(flaky.clone(), workspace.store()).process(&ids, None).await;
    assert_eq!(flaky.calls().len(), 4);

    let healthy = Arc::new(ScriptedFetcher::serving(&ids, &page()));
    let summary = workspace.pipeline(healthy.clone(), workspace.store()).process(&ids, None).await;

    assert_eq!(healthy.calls(), vec![ids[2].clone()]);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(workspace.ledger_entries().len(), 4);

    let third = Arc::new(ScriptedFetcher::serving(&ids, &page()));
    workspace.pipeline(third.clone(), workspace.store()).process(&ids, None).await;
    assert!(third.calls().is_empty());
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[tokio::test]
async fn test_limit_attempts_first_k_unprocessed(#[case] limit: usize) {
    let workspace = Workspace::new();
    let ids = identities(6);
    let mut ledger = Ledger::open(workspace.ledger()).unwrap();
    ledger.append(&ids[0]).await.unwrap();
    ledger.append(&ids[2]).await.unwrap();

    let fetcher = Arc::new(ScriptedFetcher::serving(&ids, &page()));
    let summary = workspace.pipeline(fetcher.clone(), workspace.store()).process(&ids, Some(limit)).await;

    let unprocessed: Vec<String> = vec![ids[1].clone(), ids[3].clone(), ids[4].clone(), ids[5].clone()];
    assert_eq!(fetcher.calls(), unprocessed[..limit].to_vec());
    assert_eq!(summary.attempted, limit);
}

#[tokio::test]
async fn test_records_written_per_identity() {
    let workspace = Workspace::new();
    let ids = identities(2);
    let fetcher = Arc::new(ScriptedFetcher::serving(&ids, &page()));

    let summary = workspace.pipeline(fetcher, workspace.store()).process(&ids, None).await;

    for (id, outcome) in ids.iter().zip(&summary.results) {
        let ItemStatus::Succeeded { output } = &outcome.status else {
            panic!("expected success for {}", id);
        };
        let raw = std::fs::read_to_string(output).unwrap();
        assert!(raw.contains("Кроссовки Lexsan"));
        assert!(raw.find("\"title\"").unwrap() < raw.find("\"source\"").unwrap());
    }
    let store = RecordStore::new(workspace.records());
    assert!(store.path_for(&ids[0]).exists());
    assert!(store.path_for(&ids[1]).exists());
}

#[tokio::test]
async fn test_query_variants_keep_separate_records() {
    let workspace = Workspace::new();
    let red = "https://shop.example/product/shoe-1/?color=red".to_string();
    let blue = "https://shop.example/product/shoe-1/?color=blue".to_string();

    let mut fetcher = ScriptedFetcher::serving(&[red.clone()], &page().replace("Кроссовки Lexsan", "Red shoe"));
    fetcher.serve(&blue, &page().replace("Кроссовки Lexsan", "Blue shoe"));

    let summary = workspace
        .pipeline(Arc::new(fetcher), workspace.store())
        .process(&[red.clone(), blue.clone()], None)
        .await;
    assert_eq!(summary.succeeded, 2);

    let files = std::fs::read_dir(workspace.records()).unwrap().count();
    assert_eq!(files, 2);

    let store = RecordStore::new(workspace.records());
    let red_record = store.load(&red).unwrap().unwrap();
    assert_eq!(red_record.title, "Red shoe");
    assert_eq!(red_record.source, red);
    assert_eq!(store.load(&blue).unwrap().unwrap().title, "Blue shoe");
}
