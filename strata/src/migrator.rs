//! The migration planner and executor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scylla::query::Query;
use scylla::statement::Consistency;
use scylla::Session;
use sha2::{Digest, Sha256};

use crate::errors::{Error, MigrationError, SourceError};
use crate::history::Ledger;
use crate::migration::{AppliedMigration, Direction, MigrationPair, Status};
use crate::source::{FileTree, FsSource, Source};
use crate::statement::split_statements;

/// The default name of the history table.
pub const DEFAULT_HISTORY_TABLE: &str = "schema_migrations";

/// Reconciles a migration source against the cluster's history table.
///
/// The migrator owns its source but only borrows the cluster session:
/// dropping or closing the migrator never closes the session.
///
/// ```no_run
/// # async fn example(session: std::sync::Arc<scylla::Session>) -> Result<(), strata::Error> {
/// let mut migrator = strata::Migrator::builder()
///     .session(session)
///     .dir("./migrations")?
///     .keyspace("app")
///     .build()?;
///
/// let applied = migrator.up().await?;
/// log::info!("applied {applied} migrations");
/// migrator.close();
/// # Ok(())
/// # }
/// ```
pub struct Migrator {
    session: Arc<Session>,
    source: Box<dyn Source>,
    keyspace: String,
    history_table: String,
    consistency: Consistency,
    wait_for_schema_agreement: bool,
    schema_agreement_timeout: Option<Duration>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("keyspace", &self.keyspace)
            .field("history_table", &self.history_table)
            .field("consistency", &self.consistency)
            .field(
                "wait_for_schema_agreement",
                &self.wait_for_schema_agreement,
            )
            .field("schema_agreement_timeout", &self.schema_agreement_timeout)
            .finish_non_exhaustive()
    }
}

/// Configures and validates a [`Migrator`].
///
/// `session`, a source and `keyspace` are mandatory; everything else has a
/// default. Validation happens once, in [`build`](MigratorBuilder::build).
pub struct MigratorBuilder {
    session: Option<Arc<Session>>,
    source: Option<Box<dyn Source>>,
    keyspace: Option<String>,
    history_table: String,
    consistency: Consistency,
    wait_for_schema_agreement: bool,
    schema_agreement_timeout: Option<Duration>,
}

impl MigratorBuilder {
    fn new() -> Self {
        MigratorBuilder {
            session: None,
            source: None,
            keyspace: None,
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            consistency: Consistency::Quorum,
            wait_for_schema_agreement: true,
            schema_agreement_timeout: None,
        }
    }

    /// Sets the cluster session. The caller retains ownership; the
    /// migrator never closes it.
    pub fn session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the migration source.
    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Sets the migration source to a filesystem directory, scanning it
    /// immediately.
    pub fn dir(self, path: impl Into<PathBuf>) -> Result<Self, Error> {
        let source = FsSource::from_dir(path)?;
        Ok(self.source(source))
    }

    /// Sets the migration source to a [`FileTree`], scanning it
    /// immediately. This is how compiled-in migrations plug in.
    pub fn tree(self, tree: impl FileTree + 'static) -> Result<Self, Error> {
        let source = FsSource::new(tree)?;
        Ok(self.source(source))
    }

    /// Sets the keyspace the history table lives in.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Sets the history table name. Default: `schema_migrations`.
    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = table.into();
        self
    }

    /// Sets the consistency level for every engine-issued query.
    /// Default: `Quorum`.
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Sets whether to wait for cluster-wide schema agreement after each
    /// migration. Default: true.
    pub fn wait_for_schema_agreement(mut self, wait: bool) -> Self {
        self.wait_for_schema_agreement = wait;
        self
    }

    /// Bounds each schema-agreement wait. Without this the session's own
    /// timeout discipline applies.
    pub fn schema_agreement_timeout(mut self, timeout: Duration) -> Self {
        self.schema_agreement_timeout = Some(timeout);
        self
    }

    /// Validates the configuration and builds the migrator.
    pub fn build(self) -> Result<Migrator, Error> {
        let session = self.session.ok_or(Error::NoSession)?;
        let source = self.source.ok_or(Error::NoSource)?;
        let keyspace = match self.keyspace {
            Some(keyspace) if !keyspace.is_empty() => keyspace,
            _ => return Err(Error::NoKeyspace),
        };

        Ok(Migrator {
            session,
            source,
            keyspace,
            history_table: self.history_table,
            consistency: self.consistency,
            wait_for_schema_agreement: self.wait_for_schema_agreement,
            schema_agreement_timeout: self.schema_agreement_timeout,
        })
    }
}

impl Migrator {
    /// Starts configuring a migrator.
    pub fn builder() -> MigratorBuilder {
        MigratorBuilder::new()
    }

    /// Applies all pending migrations in ascending version order.
    ///
    /// Returns the number of migrations applied; zero pending is not an
    /// error. On failure, migrations applied before the failing one remain
    /// recorded and the error names the failing version and statement.
    pub async fn up(&self) -> Result<usize, Error> {
        self.ensure_history_table().await?;

        let pending = self.pending().await?;

        let mut applied = 0;
        for pair in &pending {
            self.apply_up(pair).await?;
            applied += 1;
        }

        Ok(applied)
    }

    /// Applies pending migrations up to and including `version`.
    pub async fn up_to(&self, version: u64) -> Result<usize, Error> {
        self.ensure_history_table().await?;

        let pending = self.pending().await?;

        let mut applied = 0;
        for pair in &pending {
            if pair.version > version {
                break;
            }
            self.apply_up(pair).await?;
            applied += 1;
        }

        Ok(applied)
    }

    /// Rolls back the most recently applied migration.
    pub async fn down(&self) -> Result<(), Error> {
        self.steps(-1).await
    }

    /// Rolls back every applied migration with a version strictly greater
    /// than `version`, most recent first. Returns the number rolled back.
    pub async fn down_to(&self, version: u64) -> Result<usize, Error> {
        self.ensure_history_table().await?;

        let mut applied = self.ledger().applied().await?;
        applied.sort_by(|a, b| b.version.cmp(&a.version));

        let mut rolled_back = 0;
        for record in &applied {
            if record.version <= version {
                break;
            }
            self.apply_down(record.version).await?;
            rolled_back += 1;
        }

        Ok(rolled_back)
    }

    /// Moves `n` migrations: positive applies up, negative rolls back.
    ///
    /// Fails with [`Error::NoChange`] when asked to move but there is
    /// nowhere to move. `n == 0` is a no-op.
    pub async fn steps(&self, n: i64) -> Result<(), Error> {
        self.ensure_history_table().await?;

        if n == 0 {
            return Ok(());
        }

        if n > 0 {
            let pending = self.pending().await?;
            if pending.is_empty() {
                return Err(Error::NoChange);
            }

            let count = (n.unsigned_abs() as usize).min(pending.len());
            for pair in &pending[..count] {
                self.apply_up(pair).await?;
            }
        } else {
            let mut applied = self.ledger().applied().await?;
            if applied.is_empty() {
                return Err(Error::NoChange);
            }

            applied.sort_by(|a, b| b.version.cmp(&a.version));

            let count = (n.unsigned_abs() as usize).min(applied.len());
            for record in &applied[..count] {
                self.apply_down(record.version).await?;
            }
        }

        Ok(())
    }

    /// Returns the current migration status, creating the history table if
    /// needed.
    pub async fn status(&self) -> Result<Status, Error> {
        self.ensure_history_table().await?;

        let mut applied = self.ledger().applied().await?;
        applied.sort_by_key(|m| m.version);

        let pending = self.pending().await?;

        let current_version = applied.iter().map(|m| m.version).max().unwrap_or(0);

        Ok(Status {
            current_version,
            applied,
            pending,
        })
    }

    /// Returns the highest applied version, or 0 when none are applied.
    ///
    /// This is a read-only probe: when the history table does not exist it
    /// returns 0 without creating it.
    pub async fn version(&self) -> Result<u64, Error> {
        if !self.ledger().exists().await? {
            return Ok(0);
        }

        self.ledger().latest_version().await
    }

    /// Returns migrations present in the source but not in the ledger,
    /// ascending by version.
    pub async fn pending(&self) -> Result<Vec<MigrationPair>, Error> {
        let all = self.source.list()?;
        let applied = self.ledger().applied_versions().await?;

        Ok(all
            .into_iter()
            .filter(|pair| !applied.contains(&pair.version))
            .collect())
    }

    /// Returns every applied migration, or an empty list when the history
    /// table does not exist.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, Error> {
        if !self.ledger().exists().await? {
            return Ok(Vec::new());
        }

        self.ledger().applied().await
    }

    /// Releases the source's resources. The cluster session is untouched;
    /// the caller owns it.
    pub fn close(&mut self) {
        self.source.close();
    }

    fn ledger(&self) -> Ledger<'_> {
        Ledger::new(
            &self.session,
            &self.keyspace,
            &self.history_table,
            self.consistency,
        )
    }

    async fn ensure_history_table(&self) -> Result<(), Error> {
        self.ledger().create_table().await?;

        if self.wait_for_schema_agreement {
            self.await_schema_agreement().await?;
        }

        Ok(())
    }

    async fn apply_up(&self, pair: &MigrationPair) -> Result<(), Error> {
        if !pair.has_up() {
            return Err(MigrationError::new(pair.version, Direction::Up, 0, Error::MissingUp).into());
        }

        log::info!("applying migration {}: {}", pair.version, pair.description);

        let content = self.read_migration(pair.version, Direction::Up)?;
        let checksum = checksum(&content);

        let start = Instant::now();
        self.execute_statements(pair.version, Direction::Up, &content)
            .await?;
        let duration = start.elapsed();

        self.ledger()
            .record(pair.version, &pair.description, &checksum, duration)
            .await?;

        log::info!(
            "applied migration {} in {}ms",
            pair.version,
            duration.as_millis()
        );

        Ok(())
    }

    async fn apply_down(&self, version: u64) -> Result<(), Error> {
        let pairs = self.source.list()?;
        let pair = pairs.iter().find(|p| p.version == version).ok_or_else(|| {
            MigrationError::new(version, Direction::Down, 0, Error::VersionNotFound)
        })?;

        if !pair.has_down() {
            return Err(MigrationError::new(version, Direction::Down, 0, Error::MissingDown).into());
        }

        log::info!("rolling back migration {}: {}", version, pair.description);

        let content = self.read_migration(version, Direction::Down)?;

        let start = Instant::now();
        self.execute_statements(version, Direction::Down, &content)
            .await?;
        let duration = start.elapsed();

        self.ledger().remove(version).await?;

        log::info!(
            "rolled back migration {} in {}ms",
            version,
            duration.as_millis()
        );

        Ok(())
    }

    fn read_migration(&self, version: u64, direction: Direction) -> Result<Vec<u8>, Error> {
        let mut reader = match direction {
            Direction::Up => self.source.read_up(version)?,
            Direction::Down => self.source.read_down(version)?,
        };

        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|e| SourceError::new(version, "read", Error::Io(e)))?;

        Ok(content)
    }

    async fn execute_statements(
        &self,
        version: u64,
        direction: Direction,
        content: &[u8],
    ) -> Result<(), Error> {
        let text = String::from_utf8_lossy(content);
        let statements = split_statements(&text);

        for (i, statement) in statements.into_iter().enumerate() {
            let mut query = Query::new(statement);
            query.set_consistency(self.consistency);

            self.session.query_unpaged(query, ()).await.map_err(|e| {
                MigrationError::new(version, direction, i + 1, Error::Database(e))
            })?;
        }

        if self.wait_for_schema_agreement {
            self.await_schema_agreement().await?;
        }

        Ok(())
    }

    async fn await_schema_agreement(&self) -> Result<(), Error> {
        match self.schema_agreement_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.session.await_schema_agreement()).await {
                    Ok(result) => result.map(drop).map_err(Error::SchemaAgreement),
                    Err(_) => Err(Error::SchemaAgreementTimeout),
                }
            }
            None => self
                .session
                .await_schema_agreement()
                .await
                .map(drop)
                .map_err(Error::SchemaAgreement),
        }
    }
}

/// SHA-256 hex digest of migration content, 64 lowercase hex characters.
///
/// Checksums are recorded in the ledger for audit; no path verifies them
/// yet.
pub(crate) fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemTree;

    #[test]
    fn checksum_is_the_sha256_hex_digest() {
        // SHA-256 of the empty input.
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn checksum_is_64_hex_characters() {
        let digest = checksum(b"CREATE TABLE t (id int PRIMARY KEY);");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, digest.to_lowercase());
    }

    #[test]
    fn checksum_depends_on_content() {
        assert_ne!(checksum(b"CREATE TABLE a;"), checksum(b"CREATE TABLE b;"));
        assert_eq!(checksum(b"CREATE TABLE a;"), checksum(b"CREATE TABLE a;"));
    }

    #[test]
    fn builder_without_session_fails() {
        let err = Migrator::builder()
            .tree(MemTree::new())
            .unwrap()
            .keyspace("app")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::NoSession));
    }

    #[test]
    fn builder_defaults() {
        let builder = MigratorBuilder::new();
        assert_eq!(builder.history_table, DEFAULT_HISTORY_TABLE);
        assert!(builder.wait_for_schema_agreement);
        assert!(builder.schema_agreement_timeout.is_none());
        assert!(matches!(builder.consistency, Consistency::Quorum));
    }
}
