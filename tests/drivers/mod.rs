use std::sync::Arc;

use rstest::fixture;

use tablesync::remote::{RemoteError, RemoteErrorKind};
use tablesync::schema::{ColumnDef, ColumnType};
use tablesync::sync::{DriverConfig, RateGate, SyncError, TableDriver};
use tablesync::testutils::FakeRemoteService;

mod append;
mod schema_change;
mod upload;

struct TestDriver {
    service: Arc<FakeRemoteService>,
    driver: TableDriver,
}

impl TestDriver {
    fn new(rate_gate: RateGate) -> Self {
        let service = Arc::new(FakeRemoteService::new());
        let driver = TableDriver::new(
            service.clone(),
            Arc::new(rate_gate),
            DriverConfig::default(),
        );
        Self { service, driver }
    }
}

// Default retry policies and poll budgets, but no throttling
#[fixture]
fn test_driver() -> TestDriver {
    TestDriver::new(RateGate::unlimited())
}

// Throttled with the default rate limits
#[fixture]
fn throttled_driver() -> TestDriver {
    TestDriver::new(RateGate::default())
}

fn integer_column(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Integer)
}

fn assert_remote_error(err: SyncError, kind: RemoteErrorKind) {
    match err {
        SyncError::Remote(RemoteError { kind: actual, .. }) => assert_eq!(actual, kind),
        other => panic!("Expected a {kind} remote error, got {other:?}"),
    }
}
