//! The migration data model and the filename grammar.
//!
//! Migration files are named `{version}_{description}.{up|down}.{cql|sql}`,
//! e.g. `000001_create_users.up.cql`. The version is an unsigned 64-bit
//! integer; leading zeros are permitted and numerically ignored. The `cql`
//! and `sql` extensions are treated identically.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::errors::ParseError;

static MIGRATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)_(.+)\.(up|down)\.(cql|sql)$").expect("migration pattern compiles")
});

/// The direction of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A forward migration.
    Up,
    /// A rollback migration.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// A single migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    /// The version number parsed from the leading digits of the filename.
    pub version: u64,
    /// The human-readable description from the filename.
    pub description: String,
    /// Whether this is an up or down migration.
    pub direction: Direction,
    /// The original filename, used to reopen the underlying byte stream.
    pub raw: String,
}

/// The up/down bundle for a single version.
///
/// A pair exists iff at least one half exists. The description is that of
/// the first half seen during the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPair {
    /// The version number shared by both halves.
    pub version: u64,
    /// The human-readable description.
    pub description: String,
    /// The forward migration, when present.
    pub up: Option<Migration>,
    /// The rollback migration, when present.
    pub down: Option<Migration>,
}

impl MigrationPair {
    /// Reports whether an up migration exists for this version.
    pub fn has_up(&self) -> bool {
        self.up.is_some()
    }

    /// Reports whether a down migration exists for this version.
    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }
}

/// One row of the on-cluster history table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMigration {
    /// The version number.
    pub version: u64,
    /// The human-readable description.
    pub description: String,
    /// SHA-256 hex digest of the exact bytes that were executed.
    pub checksum: String,
    /// When the migration was recorded.
    pub applied_at: DateTime<Utc>,
    /// Wall time of the DDL phase, rounded down to milliseconds.
    pub execution_ms: i64,
}

/// A snapshot of the migration state of a cluster.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// The highest applied version, or 0 when nothing has been applied.
    pub current_version: u64,
    /// All rows of the history table, sorted ascending by version.
    pub applied: Vec<AppliedMigration>,
    /// Migrations present in the source but absent from the history table,
    /// sorted ascending by version.
    pub pending: Vec<MigrationPair>,
}

/// Parses a filename into a [`Migration`].
///
/// Fails when the filename does not match the migration pattern or the
/// version overflows 64 bits.
pub fn parse_migration(filename: &str) -> Result<Migration, ParseError> {
    let captures = MIGRATION_PATTERN
        .captures(filename)
        .ok_or_else(|| ParseError {
            filename: filename.to_string(),
            source: None,
        })?;

    let version = captures[1].parse::<u64>().map_err(|e| ParseError {
        filename: filename.to_string(),
        source: Some(e),
    })?;

    let direction = match &captures[3] {
        "up" => Direction::Up,
        _ => Direction::Down,
    };

    Ok(Migration {
        version,
        description: captures[2].to_string(),
        direction,
        raw: filename.to_string(),
    })
}

/// Reports whether a filename matches the migration pattern, without
/// allocating an error.
pub fn is_migration_file(filename: &str) -> bool {
    MIGRATION_PATTERN.is_match(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_padded_up_migration() {
        let m = parse_migration("000001_create_users.up.cql").unwrap();
        assert_eq!(m.version, 1);
        assert_eq!(m.description, "create_users");
        assert_eq!(m.direction, Direction::Up);
        assert_eq!(m.raw, "000001_create_users.up.cql");
    }

    #[test]
    fn parses_an_unpadded_down_migration_with_sql_extension() {
        let m = parse_migration("999999_final.down.sql").unwrap();
        assert_eq!(m.version, 999999);
        assert_eq!(m.description, "final");
        assert_eq!(m.direction, Direction::Down);
    }

    #[test]
    fn version_zero_is_valid() {
        let m = parse_migration("0_bootstrap.up.cql").unwrap();
        assert_eq!(m.version, 0);
    }

    #[test]
    fn description_may_contain_underscores_and_dots() {
        let m = parse_migration("7_add_v2.index_to_users.up.cql").unwrap();
        assert_eq!(m.version, 7);
        assert_eq!(m.description, "add_v2.index_to_users");
    }

    #[test]
    fn rejects_filenames_outside_the_grammar() {
        for name in [
            "README.md",
            "create_users.up.cql",
            "1_create_users.cql",
            "1_create_users.up.txt",
            "1_create_users.UP.cql",
            "1_.up.cql",
            "_x.up.cql",
            "1x.up.cql",
            "1_x.up.cql.bak",
        ] {
            assert!(parse_migration(name).is_err(), "{name} should not parse");
            assert!(!is_migration_file(name), "{name} should not match");
        }
    }

    #[test]
    fn version_overflow_is_a_parse_error() {
        // 2^64 does not fit in u64.
        let err = parse_migration("18446744073709551616_x.up.cql").unwrap_err();
        assert_eq!(err.filename, "18446744073709551616_x.up.cql");
        assert!(err.source.is_some());
    }

    #[test]
    fn max_u64_version_parses() {
        let m = parse_migration("18446744073709551615_x.up.cql").unwrap();
        assert_eq!(m.version, u64::MAX);
    }

    #[test]
    fn predicate_agrees_with_parser_on_in_range_names() {
        for name in [
            "000001_create_users.up.cql",
            "1_initial.up.cql",
            "999999_final.down.sql",
            "0_zero.down.cql",
            "42_desc.with.dots.up.sql",
        ] {
            assert_eq!(
                is_migration_file(name),
                parse_migration(name).is_ok(),
                "{name}"
            );
        }
    }

    #[test]
    fn direction_displays_lowercase() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
    }

    #[test]
    fn pair_halves_report_presence() {
        let up = parse_migration("1_a.up.cql").unwrap();
        let pair = MigrationPair {
            version: 1,
            description: "a".to_string(),
            up: Some(up),
            down: None,
        };
        assert!(pair.has_up());
        assert!(!pair.has_down());
    }
}
