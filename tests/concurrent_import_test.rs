// ==========================================
// Concurrent import tests
// ==========================================
// Several files imported at once: latest flag and content dedup
// must hold across concurrent attempts.
// ==========================================


use ratebook_ingest::api::RatebookImportApi;
use ratebook_ingest::domain::ImportStatus;
use ratebook_ingest::logging;
use std::time::Instant;

#[tokio::test]
async fn test_batch_import_multiple_files() {
    logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let api = RatebookImportApi::new(&db_path).expect("Failed to create api");

    let files: Vec<(String, Vec<u8>)> = (1..=4)
        .map(|n| {
            let quotes = test_helpers::quote_lines(n * 10);
            let refs: Vec<&str> = quotes.iter().map(String::as_str).collect();
            (format!("file_{}.csv", n), test_helpers::flat_csv(&refs))
        })
        .collect();

    let start = Instant::now();
    let outcomes = api.import_files("ALD", "BCH", files).await;
    let elapsed = start.elapsed();

    assert_eq!(outcomes.len(), 4);
    assert!(
        outcomes.iter().all(|o| o.success),
        "all imports should succeed: {:?}",
        outcomes.iter().map(|o| &o.errors).collect::<Vec<_>>()
    );
    let imported: i64 = outcomes.iter().map(|o| o.success_rows).sum();
    assert_eq!(imported, 10 + 20 + 30 + 40);
    assert_eq!(api.count_rate_records(None).await.unwrap(), imported);

    // exactly one latest batch whatever the interleaving
    let batches = api.list_imports(Some("ALD"), Some("BCH")).await.unwrap();
    assert_eq!(batches.len(), 4);
    assert_eq!(batches.iter().filter(|b| b.is_latest).count(), 1);
    assert!(batches.iter().all(|b| b.status == ImportStatus::Completed));

    println!("batch import of 4 files took {:?}", elapsed);
}

#[tokio::test]
async fn test_concurrent_identical_files_import_once() {
    logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let api = RatebookImportApi::new(&db_path).expect("Failed to create api");

    let quotes = test_helpers::quote_lines(50);
    let refs: Vec<&str> = quotes.iter().map(String::as_str).collect();
    let bytes = test_helpers::flat_csv(&refs);

    let files = (0..3)
        .map(|n| (format!("copy_{}.csv", n), bytes.clone()))
        .collect();
    let outcomes = api.import_files("ALD", "BCH", files).await;

    let succeeded: Vec<_> = outcomes.iter().filter(|o| o.success).collect();
    assert_eq!(succeeded.len(), 1);
    assert!(outcomes
        .iter()
        .filter(|o| !o.success)
        .all(|o| o.errors[0].contains("Duplicate file")));
    assert_eq!(api.count_rate_records(None).await.unwrap(), 50);
}

#[tokio::test]
async fn test_separate_connections_share_latest_flag() {
    logging::init_test();
    let (_temp_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let api_a = RatebookImportApi::new(&db_path).expect("Failed to create api");
    let api_b = RatebookImportApi::new(&db_path).expect("Failed to create api");

    let first = test_helpers::quote_lines(5);
    let second = test_helpers::quote_lines(6);
    let (a, b) = tokio::join!(
        api_a.import_bytes(
            "ALD",
            "BCH",
            "a.csv",
            test_helpers::flat_csv(&first.iter().map(String::as_str).collect::<Vec<_>>())
        ),
        api_b.import_bytes(
            "ALD",
            "BCH",
            "b.csv",
            test_helpers::flat_csv(&second.iter().map(String::as_str).collect::<Vec<_>>())
        ),
    );
    assert!(a.success && b.success, "{:?} / {:?}", a.errors, b.errors);

    let batches = api_a.list_imports(Some("ALD"), Some("BCH")).await.unwrap();
    assert_eq!(batches.iter().filter(|b| b.is_latest).count(), 1);
}
