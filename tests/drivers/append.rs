use rstest::rstest;

use tablesync::remote::{RemoteErrorKind, Row, RowSet};
use tablesync::schema::ColumnDef;
use tablesync::sync::JobKind;

use crate::drivers::{assert_remote_error, integer_column, test_driver, TestDriver};

fn row(values: &[&str]) -> Row {
    Row {
        values: values.iter().map(|v| Some(v.to_string())).collect(),
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_append_rows(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    service.set_not_ready_polls(JobKind::RowAppend, 2);
    let table_id =
        service.seed_table("t", vec![ColumnDef::string("name", 10), integer_column("n")]);
    let headers = service.table(&table_id).unwrap().column_ids;

    let references = driver
        .append_rows(
            &table_id,
            RowSet {
                headers,
                rows: vec![row(&["a", "1"]), row(&["b", "2"]), row(&["c", "3"])],
            },
        )
        .await
        .unwrap();

    assert_eq!(references.table_id, table_id);
    assert_eq!(
        references.rows.iter().map(|r| r.row_id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(service.call_count("start_append_job"), 1);
    assert_eq!(service.call_count("poll_append_job"), 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_append_rows_unknown_column(test_driver: TestDriver) {
    let TestDriver { service, driver } = test_driver;
    let table_id = service.seed_table("t", vec![integer_column("n")]);

    let err = driver
        .append_rows(
            &table_id,
            RowSet {
                headers: vec!["col-unknown".to_string()],
                rows: vec![row(&["1"])],
            },
        )
        .await
        .unwrap_err();

    assert_remote_error(err, RemoteErrorKind::BadRequest);
    assert_eq!(service.calls(), vec!["start_append_job"]);
}
