use std::time::Duration;

use rstest::rstest;
use tokio::time::Instant;

use tablesync::remote::{RemoteError, RemoteErrorKind, RemoteTableService};
use tablesync::schema::{ColumnDef, ColumnType, TableSchema};
use tablesync::sync::{JobKind, SchemaChangeOutcome, SyncError};

use crate::drivers::{
    assert_remote_error, integer_column, test_driver, throttled_driver, TestDriver,
};

fn schema(columns: Vec<ColumnDef>) -> TableSchema {
    TableSchema::try_new(columns).unwrap()
}

fn names(columns: &[ColumnDef]) -> Vec<&str> {
    columns.iter().map(|c| c.name.as_str()).collect()
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_identical_schema_is_a_no_op(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let columns = vec![ColumnDef::string("foo", 100), integer_column("bar")];
    let table_id = service.seed_table("t", columns.clone());

    let outcome = driver
        .apply_schema(&table_id, &schema(columns))
        .await
        .unwrap();

    assert_eq!(outcome, SchemaChangeOutcome::Unchanged);
    assert_eq!(service.calls(), vec!["get_columns"]);
    assert!(service.write_calls().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_adds_and_reorders(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table(
        "t",
        vec![ColumnDef::string("foo", 100), ColumnDef::string("bar", 100)],
    );
    let live = service.table(&table_id).unwrap().column_ids;

    let desired = TableSchema::builder()
        .string("bar", 100)
        .string("foo", 100)
        .string("baz", 100)
        .build()
        .unwrap();
    let outcome = driver.apply_schema(&table_id, &desired).await.unwrap();

    let SchemaChangeOutcome::Applied(response) = outcome else {
        panic!("Expected the schema change to be applied");
    };
    assert_eq!(response.table_id, table_id);
    assert_eq!(names(&response.columns), vec!["bar", "foo", "baz"]);

    let column_ids = service.table(&table_id).unwrap().column_ids;
    assert_eq!(column_ids[0], live[1]);
    assert_eq!(column_ids[1], live[0]);
    assert!(!live.contains(&column_ids[2]));

    assert_eq!(
        service.calls(),
        vec![
            "get_columns",
            "create_columns",
            "start_schema_change_job",
            "poll_schema_change_job"
        ]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_reorder_only(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table(
        "t",
        vec![ColumnDef::string("foo", 100), ColumnDef::string("bar", 100)],
    );

    let desired = schema(vec![ColumnDef::string("bar", 100), ColumnDef::string("foo", 100)]);
    let outcome = driver.apply_schema(&table_id, &desired).await.unwrap();

    assert_eq!(outcome, SchemaChangeOutcome::Unchanged);
    assert!(service.write_calls().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_modified_column_with_live_id(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table("t", vec![ColumnDef::string("foo", 10)]);

    // Desired columns taken from the live ones keep the old remote id
    let mut columns = service.table_columns(&table_id);
    let old_id = columns[0].remote_id.clone().unwrap();
    columns[0].max_length = Some(20);
    let outcome = driver
        .apply_schema(&table_id, &schema(columns))
        .await
        .unwrap();

    assert!(matches!(outcome, SchemaChangeOutcome::Applied(_)));
    assert_eq!(service.call_count("create_columns"), 1);
    let live = service.table_columns(&table_id);
    assert_eq!(names(&live), vec!["foo"]);
    assert_eq!(live[0].max_length, Some(20));
    assert_ne!(live[0].remote_id.as_ref(), Some(&old_id));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_unmodified_column_with_live_id(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table(
        "t",
        vec![ColumnDef::string("foo", 10), integer_column("bar")],
    );
    let columns = service.table_columns(&table_id);

    let outcome = driver
        .apply_schema(&table_id, &schema(columns.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, SchemaChangeOutcome::Unchanged);
    assert!(service.write_calls().is_empty());
    assert_eq!(service.table_columns(&table_id), columns);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_added_column_with_existing_id(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table("t", vec![ColumnDef::string("foo", 10)]);
    let created = service
        .create_columns(vec![ColumnDef::string("bar", 5)])
        .await
        .unwrap();

    let mut columns = service.table_columns(&table_id);
    columns.push(created[0].clone());
    let outcome = driver
        .apply_schema(&table_id, &schema(columns))
        .await
        .unwrap();

    assert!(matches!(outcome, SchemaChangeOutcome::Applied(_)));
    // Only the up-front creation; the driver reused its id
    assert_eq!(service.call_count("create_columns"), 1);
    let live = service.table_columns(&table_id);
    assert_eq!(names(&live), vec!["foo", "bar"]);
    assert_eq!(live[1].remote_id, created[0].remote_id);
    assert_eq!(live[1].max_length, Some(5));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_rejects_dropped_column(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table(
        "t",
        vec![ColumnDef::string("foo", 100), ColumnDef::string("bar", 100)],
    );

    // Adding a column doesn't make up for dropping one
    let desired = schema(vec![
        ColumnDef::string("foo", 100),
        ColumnDef::string("baz", 100),
    ]);
    let err = driver.apply_schema(&table_id, &desired).await.unwrap_err();

    assert!(matches!(
        &err,
        SyncError::SchemaRejected { columns, .. } if columns == &vec!["bar".to_string()]
    ));
    assert!(!err.is_retryable());
    assert!(service.write_calls().is_empty());
    assert_eq!(names(&service.table_columns(&table_id)), vec!["foo", "bar"]);
}

#[rstest]
#[case::too_short(19, false)]
#[case::wide_enough(21, true)]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_integer_to_string(
    test_driver: TestDriver,
    #[case] max_length: u32,
    #[case] compatible: bool,
) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table("t", vec![integer_column("n")]);

    let result = driver
        .apply_schema(&table_id, &schema(vec![ColumnDef::string("n", max_length)]))
        .await;

    if compatible {
        assert!(matches!(result, Ok(SchemaChangeOutcome::Applied(_))));
        let columns = service.table_columns(&table_id);
        assert_eq!(columns[0].column_type, ColumnType::String);
        assert_eq!(columns[0].max_length, Some(max_length));
    } else {
        assert!(matches!(result, Err(SyncError::SchemaRejected { .. })));
        assert!(service.write_calls().is_empty());
        assert_eq!(
            service.table_columns(&table_id)[0].column_type,
            ColumnType::Integer
        );
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_string_without_length(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    // A string column the service reports without any length
    let table_id = service.seed_table("t", vec![ColumnDef::new("s", ColumnType::String)]);

    let err = driver
        .apply_schema(&table_id, &schema(vec![ColumnDef::string("s", 500)]))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SchemaInconsistent { column, .. } if column == "s"));
    assert!(service.write_calls().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_times_out(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    service.set_not_ready_polls(JobKind::SchemaChange, u32::MAX);
    let table_id = service.seed_table("t", vec![ColumnDef::string("foo", 10)]);

    let err = driver
        .apply_schema(&table_id, &schema(vec![ColumnDef::string("foo", 20)]))
        .await
        .unwrap_err();

    let max_polls = driver.config().schema_change_polls.max_polls;
    assert!(err.is_timeout());
    assert!(matches!(
        err,
        SyncError::JobTimedOut { kind: JobKind::SchemaChange, polls, .. } if polls == max_polls
    ));
    assert_eq!(
        service.call_count("poll_schema_change_job"),
        max_polls as usize
    );
    assert_eq!(service.table_columns(&table_id)[0].max_length, Some(10));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_waits_for_job(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    service.set_not_ready_polls(JobKind::SchemaChange, 2);
    let table_id = service.seed_table("t", vec![ColumnDef::string("foo", 10)]);

    let outcome = driver
        .apply_schema(&table_id, &schema(vec![ColumnDef::string("foo", 20)]))
        .await
        .unwrap();

    assert!(matches!(outcome, SchemaChangeOutcome::Applied(_)));
    assert_eq!(service.call_count("poll_schema_change_job"), 3);
    assert_eq!(service.table_columns(&table_id)[0].max_length, Some(20));
}

#[rstest]
#[case::transient(RemoteErrorKind::Throttled, 2)]
#[case::fatal(RemoteErrorKind::BadRequest, 1)]
#[tokio::test(start_paused = true)]
async fn test_apply_schema_poll_failure(
    test_driver: TestDriver,
    #[case] kind: RemoteErrorKind,
    #[case] expected_polls: usize,
) {
    let TestDriver { service, driver } = test_driver;
    service.fail_next("poll_schema_change_job", RemoteError::new(kind, "injected"));
    let table_id = service.seed_table("t", vec![ColumnDef::string("foo", 10)]);

    let result = driver
        .apply_schema(&table_id, &schema(vec![ColumnDef::string("foo", 20)]))
        .await;

    // Poll errors go through the retry policy, never the poll budget
    assert_eq!(service.call_count("poll_schema_change_job"), expected_polls);
    if expected_polls == 1 {
        assert_remote_error(result.unwrap_err(), kind);
    } else {
        assert!(result.is_ok());
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_metadata_calls_are_throttled(throttled_driver: TestDriver) {
    let TestDriver { service, driver } = throttled_driver;
    let columns = vec![ColumnDef::string("foo", 10)];
    let table_id = service.seed_table("t", columns.clone());
    let desired = schema(columns);

    let start = Instant::now();
    driver.apply_schema(&table_id, &desired).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));

    // 12 per minute: the second lookup waits for the bucket to refill
    driver.apply_schema(&table_id, &desired).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_concurrent_schema_changes(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    service.set_not_ready_polls(JobKind::SchemaChange, 1);
    let first = service.seed_table("first", vec![ColumnDef::string("a", 10)]);
    let second = service.seed_table("second", vec![integer_column("b")]);

    let first_schema = schema(vec![ColumnDef::string("a", 10), integer_column("c")]);
    let second_schema = schema(vec![
        ColumnDef::new("b", ColumnType::Double),
        ColumnDef::string("d", 5),
    ]);
    let (first_outcome, second_outcome) = tokio::join!(
        driver.apply_schema(&first, &first_schema),
        driver.apply_schema(&second, &second_schema),
    );

    assert!(matches!(first_outcome, Ok(SchemaChangeOutcome::Applied(_))));
    assert!(matches!(second_outcome, Ok(SchemaChangeOutcome::Applied(_))));
    assert_eq!(names(&service.table_columns(&first)), vec!["a", "c"]);
    assert_eq!(
        service.table_columns(&second)
            .iter()
            .map(|c| c.column_type)
            .collect::<Vec<_>>(),
        vec![ColumnType::Double, ColumnType::String]
    );
}
