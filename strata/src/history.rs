//! The on-cluster history ledger.
//!
//! One table per keyspace records which migrations have been applied.
//! Operators inspect this table directly, so its schema and DML are a
//! compatibility surface and must not drift.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scylla::query::Query;
use scylla::statement::Consistency;
use scylla::Session;

use crate::errors::Error;
use crate::migration::AppliedMigration;

/// A view of the history table, scoped to one keyspace and consistency
/// level. Constructed on demand by the migrator; holds no state of its own.
pub(crate) struct Ledger<'a> {
    session: &'a Session,
    keyspace: &'a str,
    table: &'a str,
    consistency: Consistency,
}

impl<'a> Ledger<'a> {
    pub(crate) fn new(
        session: &'a Session,
        keyspace: &'a str,
        table: &'a str,
        consistency: Consistency,
    ) -> Self {
        Ledger {
            session,
            keyspace,
            table,
            consistency,
        }
    }

    fn query(&self, text: String) -> Query {
        let mut query = Query::new(text);
        query.set_consistency(self.consistency);
        query
    }

    fn ledger_err(
        context: impl Into<String>,
    ) -> impl FnOnce(scylla::transport::errors::QueryError) -> Error {
        let context = context.into();
        move |source| Error::Ledger { context, source }
    }

    /// Creates the history table when absent.
    pub(crate) async fn create_table(&self) -> Result<(), Error> {
        let cql = format!(
            r#"CREATE TABLE IF NOT EXISTS {}.{} (
    version bigint,
    description text,
    checksum text,
    applied_at timestamp,
    execution_ms bigint,
    PRIMARY KEY (version)
)"#,
            self.keyspace, self.table
        );

        self.session
            .query_unpaged(self.query(cql), ())
            .await
            .map_err(Self::ledger_err("failed to create history table"))?;

        Ok(())
    }

    /// Probes `system_schema.tables` for the history table.
    ///
    /// A genuine empty result is `Ok(false)`; query failures propagate
    /// rather than masquerading as "table missing".
    pub(crate) async fn exists(&self) -> Result<bool, Error> {
        let query = self.query(
            "SELECT table_name FROM system_schema.tables \
             WHERE keyspace_name = ? AND table_name = ?"
                .to_string(),
        );

        let result = self
            .session
            .query_unpaged(query, (self.keyspace, self.table))
            .await
            .map_err(Self::ledger_err("failed to probe history table"))?;

        let rows = result.into_rows_result().map_err(Error::decode)?;
        let row = rows.maybe_first_row::<(String,)>().map_err(Error::decode)?;
        Ok(row.is_some())
    }

    /// Records a successfully applied migration.
    pub(crate) async fn record(
        &self,
        version: u64,
        description: &str,
        checksum: &str,
        duration: Duration,
    ) -> Result<(), Error> {
        let cql = format!(
            "INSERT INTO {}.{} (version, description, checksum, applied_at, execution_ms) \
             VALUES (?, ?, ?, ?, ?)",
            self.keyspace, self.table
        );

        self.session
            .query_unpaged(
                self.query(cql),
                (
                    version as i64,
                    description,
                    checksum,
                    Utc::now(),
                    duration.as_millis() as i64,
                ),
            )
            .await
            .map_err(Self::ledger_err(format!(
                "failed to record migration {version}"
            )))?;

        Ok(())
    }

    /// Removes a migration record, for rollbacks.
    pub(crate) async fn remove(&self, version: u64) -> Result<(), Error> {
        let cql = format!(
            "DELETE FROM {}.{} WHERE version = ?",
            self.keyspace, self.table
        );

        self.session
            .query_unpaged(self.query(cql), (version as i64,))
            .await
            .map_err(Self::ledger_err(format!(
                "failed to remove migration record {version}"
            )))?;

        Ok(())
    }

    /// Returns every row of the history table. The database gives no
    /// ordering guarantee; callers sort as needed.
    pub(crate) async fn applied(&self) -> Result<Vec<AppliedMigration>, Error> {
        let cql = format!(
            "SELECT version, description, checksum, applied_at, execution_ms FROM {}.{}",
            self.keyspace, self.table
        );

        let result = self
            .session
            .query_unpaged(self.query(cql), ())
            .await
            .map_err(Self::ledger_err("failed to read applied migrations"))?;

        let rows = result.into_rows_result().map_err(Error::decode)?;

        let mut applied = Vec::new();
        for row in rows
            .rows::<(i64, String, String, DateTime<Utc>, i64)>()
            .map_err(Error::decode)?
        {
            let (version, description, checksum, applied_at, execution_ms) =
                row.map_err(Error::decode)?;
            applied.push(AppliedMigration {
                version: version as u64,
                description,
                checksum,
                applied_at,
                execution_ms,
            });
        }

        Ok(applied)
    }

    /// Returns the highest applied version, or 0 when the ledger is empty.
    pub(crate) async fn latest_version(&self) -> Result<u64, Error> {
        let applied = self.applied().await?;
        Ok(applied.iter().map(|m| m.version).max().unwrap_or(0))
    }

    /// Returns the set of applied versions, for O(1) pending computation.
    pub(crate) async fn applied_versions(&self) -> Result<HashSet<u64>, Error> {
        let applied = self.applied().await?;
        Ok(applied.iter().map(|m| m.version).collect())
    }
}
