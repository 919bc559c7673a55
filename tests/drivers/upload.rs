use std::io::Write;
use std::path::Path;
use std::time::Duration;

use rstest::rstest;
use tempfile::NamedTempFile;
use tokio::time::Instant;

use tablesync::remote::{RemoteError, RemoteErrorKind};
use tablesync::schema::ColumnDef;
use tablesync::sync::{JobKind, SyncError};

use crate::drivers::{assert_remote_error, integer_column, test_driver, TestDriver};

fn tsv_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn seed(test_driver: &TestDriver) -> String {
    test_driver
        .service
        .seed_table("t", vec![ColumnDef::string("a", 10), integer_column("b")])
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_upload_tsv(test_driver: TestDriver) {
    let table_id = seed(&test_driver);
    let TestDriver { service, driver } = test_driver;
    let file = tsv_file("a\tb\nx\t1\ny\t2\nz\t3\n");

    let rows = driver.upload_tsv(&table_id, file.path()).await.unwrap();

    assert_eq!(rows, 3);
    assert_eq!(
        service.calls(),
        vec!["upload_file", "start_tsv_import_job", "poll_tsv_import_job"]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_upload_tsv_backs_off_while_importing(test_driver: TestDriver) {
    let table_id = seed(&test_driver);
    let TestDriver { service, driver } = test_driver;
    service.set_not_ready_polls(JobKind::TsvUpload, 3);
    let file = tsv_file("a\tb\nx\t1\n");
    let start = Instant::now();

    let rows = driver.upload_tsv(&table_id, file.path()).await.unwrap();

    assert_eq!(rows, 1);
    assert_eq!(service.call_count("poll_tsv_import_job"), 4);
    // 1s, 2s and 4s between the four polls
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_upload_tsv_without_row_count(test_driver: TestDriver) {
    let table_id = seed(&test_driver);
    let TestDriver { service, driver } = test_driver;
    service.omit_row_count();
    let file = tsv_file("a\tb\nx\t1\n");

    let err = driver.upload_tsv(&table_id, file.path()).await.unwrap_err();

    assert!(matches!(err, SyncError::MissingRowCount { .. }));
    assert!(!err.is_retryable());
    assert_eq!(service.call_count("poll_tsv_import_job"), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_upload_retries_with_upload_delay(test_driver: TestDriver) {
    let table_id = seed(&test_driver);
    let TestDriver { service, driver } = test_driver;
    service.fail_next(
        "upload_file",
        RemoteError::new(RemoteErrorKind::Network, "connection reset"),
    );
    let file = tsv_file("a\tb\nx\t1\n");
    let start = Instant::now();

    driver.upload_tsv(&table_id, file.path()).await.unwrap();

    assert_eq!(service.call_count("upload_file"), 2);
    assert!(start.elapsed() >= driver.config().upload_retry.delay);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_upload_missing_file(test_driver: TestDriver) {
    let table_id = seed(&test_driver);
    let TestDriver { service, driver } = test_driver;

    let err = driver
        .upload_tsv(&table_id, Path::new("/nonexistent/rows.tsv"))
        .await
        .unwrap_err();

    assert_remote_error(err, RemoteErrorKind::BadRequest);
    assert_eq!(service.calls(), vec!["upload_file"]);
}
