//! Shared bootstrap for live-cluster tests.
//!
//! The suite needs a reachable ScyllaDB cluster, configured through
//! `SCYLLA_HOSTS` and `SCYLLA_KEYSPACE`. When either is unset every test
//! returns early, so the suite is a no-op on machines without a cluster.
//! Each test gets its own keyspace, derived from the configured base name,
//! created fresh and dropped on teardown.

use std::sync::Arc;

use scylla::{Session, SessionBuilder};
use strata::keyspace::{self, KeyspaceOptions};

/// Connects to the configured test cluster and prepares a dedicated
/// keyspace named `{SCYLLA_KEYSPACE}_{suffix}`. Returns `None` when the
/// environment is not configured.
pub async fn test_session(suffix: &str) -> Option<(Arc<Session>, String)> {
    let hosts = std::env::var("SCYLLA_HOSTS").ok()?;
    let base = std::env::var("SCYLLA_KEYSPACE").ok()?;
    let keyspace = format!("{base}_{suffix}");

    let nodes: Vec<String> = hosts.split(',').map(|h| h.trim().to_string()).collect();
    let session = SessionBuilder::new()
        .known_nodes(&nodes)
        .build()
        .await
        .expect("failed to connect to the test cluster");

    keyspace::drop_keyspace(&session, &keyspace, true)
        .await
        .expect("failed to drop stale test keyspace");
    keyspace::create_keyspace(&session, &keyspace, &KeyspaceOptions::new())
        .await
        .expect("failed to create test keyspace");
    session
        .use_keyspace(&keyspace, false)
        .await
        .expect("failed to switch to test keyspace");

    Some((Arc::new(session), keyspace))
}

/// Drops the test keyspace.
pub async fn teardown(session: &Session, keyspace: &str) {
    keyspace::drop_keyspace(session, keyspace, true)
        .await
        .expect("failed to drop test keyspace");
}

/// Reports whether a table exists in the given keyspace.
pub async fn table_exists(session: &Session, keyspace: &str, table: &str) -> bool {
    let result = session
        .query_unpaged(
            "SELECT table_name FROM system_schema.tables \
             WHERE keyspace_name = ? AND table_name = ?",
            (keyspace, table),
        )
        .await
        .expect("failed to query system_schema.tables");

    result
        .into_rows_result()
        .expect("probe result should carry rows")
        .maybe_first_row::<(String,)>()
        .expect("probe row should decode")
        .is_some()
}
