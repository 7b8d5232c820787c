#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::db::FlowDb;
use crate::types::{ClientId, Flow, FlowId};

fn required_test_database_url() -> String {
    std::env::var("FLEETFLOW_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .unwrap_or_else(|_| {
            panic!("set DATABASE_URL or FLEETFLOW_TEST_DATABASE_URL to run database tests")
        })
}

pub(crate) async fn test_db() -> FlowDb {
    let url = required_test_database_url();
    PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await
        .map(FlowDb::new_with_pool)
        .unwrap_or_else(|e| panic!("Failed to connect test database: {}", e))
}

pub(crate) async fn setup_schema(db: &FlowDb) {
    db.initialize_schema()
        .await
        .unwrap_or_else(|e| panic!("Failed to initialize schema: {}", e));
}

pub(crate) async fn reset_tables(db: &FlowDb) {
    sqlx::query(
        "TRUNCATE TABLE flow_processing_requests, client_action_requests, flow_responses, \
         flow_requests, flows RESTART IDENTITY",
    )
    .execute(db.pool())
    .await
    .unwrap_or_else(|e| panic!("failed to truncate flow tables: {}", e));
}

pub(crate) fn unique_client() -> ClientId {
    ClientId::new(format!("C.{}", Uuid::new_v4()))
}

pub(crate) fn unique_flow() -> FlowId {
    FlowId::new(format!("F.{}", Uuid::new_v4()))
}

pub(crate) async fn seed_flow(db: &FlowDb) -> Flow {
    let flow = Flow::new(unique_client(), unique_flow());
    db.write_flow(&flow)
        .await
        .unwrap_or_else(|e| panic!("failed to seed flow: {}", e));
    flow
}
