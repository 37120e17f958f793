//! Error taxonomy for the migration engine.
//!
//! Everything fallible in this crate returns [`Error`]. Wrapper errors
//! ([`ParseError`], [`SourceError`], [`MigrationError`], [`KeyspaceError`])
//! expose their cause through [`std::error::Error::source`], so callers can
//! match against a sentinel kind regardless of wrapping depth via
//! [`Error::matches`].

use std::fmt;
use std::io;
use std::num::ParseIntError;

use scylla::transport::errors::QueryError;

use crate::migration::Direction;

/// Errors produced by the migration engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No database session was provided at construction.
    #[error("no database session provided")]
    NoSession,

    /// No migration source was configured at construction.
    #[error("no migration source configured")]
    NoSource,

    /// No keyspace was configured at construction.
    #[error("no keyspace configured")]
    NoKeyspace,

    /// There are no migrations to apply or roll back.
    #[error("no migrations to apply")]
    NoChange,

    /// The requested migration version does not exist in the source.
    #[error("migration version not found")]
    VersionNotFound,

    /// An up migration is missing for the requested version.
    #[error("up migration not found")]
    MissingUp,

    /// A down migration is missing for the requested version.
    #[error("down migration not found")]
    MissingDown,

    /// A migration file was modified after being applied.
    ///
    /// Reserved: checksums are recorded but not yet verified on any path.
    #[error("migration file was modified after being applied")]
    ChecksumMismatch,

    /// The source contains two files with the same version and direction.
    #[error("duplicate {direction} migration for version {version}: {filename}")]
    DuplicateMigration {
        /// The version shared by both files.
        version: u64,
        /// The direction shared by both files.
        direction: Direction,
        /// The filename of the second occurrence, in scan order.
        filename: String,
    },

    /// A migration filename could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// An error occurred while reading from a migration source.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A migration failed to execute.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A keyspace operation failed.
    #[error(transparent)]
    Keyspace(#[from] KeyspaceError),

    /// A driver-level query error.
    #[error(transparent)]
    Database(#[from] QueryError),

    /// An I/O error from the underlying file tree.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A history-table query failed.
    #[error("{context}: {source}")]
    Ledger {
        /// What the engine was doing when the query failed.
        context: String,
        /// The driver error.
        source: QueryError,
    },

    /// A history-table row could not be decoded.
    #[error("failed to decode history row: {source}")]
    Decode {
        /// The deserialization-layer error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The schema-agreement wait reported a driver error.
    #[error("failed to wait for schema agreement: {0}")]
    SchemaAgreement(#[source] QueryError),

    /// The schema-agreement wait exceeded the configured timeout.
    #[error("schema agreement wait timed out")]
    SchemaAgreementTimeout,
}

impl Error {
    /// Reports whether this error, or any cause in its chain, is the same
    /// kind as `sentinel`.
    ///
    /// ```
    /// use strata::Error;
    ///
    /// let err = Error::from(strata::MigrationError {
    ///     version: 7,
    ///     direction: strata::Direction::Down,
    ///     statement: 0,
    ///     inner: Box::new(Error::MissingDown),
    /// });
    /// assert!(err.matches(&Error::MissingDown));
    /// assert!(!err.matches(&Error::MissingUp));
    /// ```
    pub fn matches(&self, sentinel: &Error) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(err) = err.downcast_ref::<Error>() {
                if std::mem::discriminant(err) == std::mem::discriminant(sentinel) {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }

    pub(crate) fn decode(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Decode {
            source: Box::new(source),
        }
    }
}

/// A migration filename did not match the expected pattern.
#[derive(Debug)]
pub struct ParseError {
    /// The offending filename.
    pub filename: String,
    /// The numeric-overflow cause, when the digit run did not fit in u64.
    pub source: Option<ParseIntError>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(
                f,
                "failed to parse migration filename {:?}: {source}",
                self.filename
            ),
            None => write!(f, "failed to parse migration filename {:?}", self.filename),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as _)
    }
}

/// An error raised while reading from a migration source, tagged with the
/// version and operation that failed.
#[derive(Debug)]
pub struct SourceError {
    /// The version being read. Zero when the failure was not tied to a
    /// specific version (directory scan).
    pub version: u64,
    /// The operation that failed: `"scan"`, `"read up"`, `"read down"` or
    /// `"read"`.
    pub op: &'static str,
    /// The underlying cause.
    pub inner: Box<Error>,
}

impl SourceError {
    pub(crate) fn new(version: u64, op: &'static str, inner: Error) -> Self {
        SourceError {
            version,
            op,
            inner: Box::new(inner),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source error for version {} ({}): {}",
            self.version, self.op, self.inner
        )
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// An error raised while executing a migration.
#[derive(Debug)]
pub struct MigrationError {
    /// The version of the failing migration.
    pub version: u64,
    /// The direction that was being applied.
    pub direction: Direction,
    /// The 1-based index of the failing statement, or 0 when the failure
    /// happened before any statement ran (missing half, unknown version).
    pub statement: usize,
    /// The underlying cause.
    pub inner: Box<Error>,
}

impl MigrationError {
    pub(crate) fn new(version: u64, direction: Direction, statement: usize, inner: Error) -> Self {
        MigrationError {
            version,
            direction,
            statement,
            inner: Box::new(inner),
        }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statement > 0 {
            write!(
                f,
                "failed to execute {} migration {} (statement {}): {}",
                self.direction, self.version, self.statement, self.inner
            )
        } else {
            write!(
                f,
                "failed to execute {} migration {}: {}",
                self.direction, self.version, self.inner
            )
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// An error raised by a keyspace operation.
#[derive(Debug)]
pub struct KeyspaceError {
    /// The keyspace the operation targeted.
    pub keyspace: String,
    /// The operation that failed: `"create"`, `"check existence"` or
    /// `"drop"`.
    pub op: &'static str,
    /// The underlying cause.
    pub inner: Box<Error>,
}

impl KeyspaceError {
    pub(crate) fn new(keyspace: &str, op: &'static str, inner: Error) -> Self {
        KeyspaceError {
            keyspace: keyspace.to_string(),
            op,
            inner: Box::new(inner),
        }
    }
}

impl fmt::Display for KeyspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keyspace error for {:?} ({}): {}",
            self.keyspace, self.op, self.inner
        )
    }
}

impl std::error::Error for KeyspaceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}
