//! ScyllaDB schema migration tool.
//!
//! Every global option has an environment-variable alias so the tool drops
//! into CI pipelines without flag plumbing. Exit status is 0 on success,
//! including no-ops, and non-zero with the error on stderr otherwise.

use std::fs;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use scylla::statement::Consistency;
use scylla::transport::load_balancing::DefaultPolicy;
use scylla::{ExecutionProfile, Session, SessionBuilder};
use strata::keyspace::{self, KeyspaceOptions};
use strata::{Error, Migrator, Status};

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "ScyllaDB schema migration tool",
    long_about = "A tool for managing ScyllaDB schema migrations with up/down support."
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Comma-separated list of ScyllaDB hosts
    #[arg(
        long,
        env = "SCYLLA_HOSTS",
        default_value = "localhost:9042",
        global = true
    )]
    hosts: String,

    /// Target keyspace (required for cluster commands)
    #[arg(long, env = "SCYLLA_KEYSPACE", global = true)]
    keyspace: Option<String>,

    /// Migrations directory
    #[arg(
        long,
        env = "MIGRATIONS_DIR",
        default_value = "./migrations",
        global = true
    )]
    dir: String,

    /// Consistency level (any, one, two, three, quorum, all, local_quorum,
    /// each_quorum, local_one)
    #[arg(
        long,
        env = "SCYLLA_CONSISTENCY",
        default_value = "quorum",
        global = true
    )]
    consistency: String,

    /// Operation timeout in seconds
    #[arg(long, env = "SCYLLA_TIMEOUT", default_value_t = 30, global = true)]
    timeout: u64,

    /// Migration history table name
    #[arg(
        long,
        env = "SCYLLA_MIGRATIONS_TABLE",
        default_value = "schema_migrations",
        global = true
    )]
    table: String,

    /// Prefer coordinators in this datacenter
    #[arg(long, env = "SCYLLA_DATACENTER", global = true)]
    datacenter: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations
    Up {
        /// Number of migrations to apply (0 = all)
        #[arg(short, default_value_t = 0)]
        n: i64,
    },
    /// Rollback migrations
    Down {
        /// Number of migrations to rollback
        #[arg(short, default_value_t = 1)]
        n: i64,
    },
    /// Show migration status
    Status {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current migration version
    Version,
    /// Create a new pair of up/down migration files
    Create {
        /// Migration name
        name: String,
        /// File extension (cql or sql)
        #[arg(long, default_value = "cql")]
        ext: String,
    },
    /// Create the target keyspace
    CreateKeyspace {
        /// Replication factor for SimpleStrategy
        #[arg(long, default_value_t = 1)]
        replication_factor: i32,
        /// Datacenter replication as NAME=RF; repeatable, switches to
        /// NetworkTopologyStrategy
        #[arg(long = "dc", value_name = "NAME=RF")]
        datacenters: Vec<String>,
        /// Explicitly enable or disable durable writes
        #[arg(long)]
        durable_writes: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Up { n } => up(&cli.connection, n).await,
        Command::Down { n } => down(&cli.connection, n).await,
        Command::Status { json } => status(&cli.connection, json).await,
        Command::Version => version(&cli.connection).await,
        Command::Create { name, ext } => create(&cli.connection, &name, &ext),
        Command::CreateKeyspace {
            replication_factor,
            datacenters,
            durable_writes,
        } => create_keyspace(&cli.connection, replication_factor, &datacenters, durable_writes).await,
    }
}

async fn up(conn: &ConnectionArgs, n: i64) -> Result<()> {
    let m = migrator(conn).await?;

    if n > 0 {
        match bounded(conn, m.steps(n)).await? {
            Ok(()) => println!("Applied {n} migration(s)"),
            Err(Error::NoChange) => println!("No migrations to apply"),
            Err(err) => return Err(err.into()),
        }
    } else {
        let applied = bounded(conn, m.up()).await??;
        if applied == 0 {
            println!("No migrations to apply");
        } else {
            println!("Applied {applied} migration(s)");
        }
    }

    Ok(())
}

async fn down(conn: &ConnectionArgs, n: i64) -> Result<()> {
    let m = migrator(conn).await?;

    match bounded(conn, m.steps(-n)).await? {
        Ok(()) => println!("Rolled back {n} migration(s)"),
        Err(Error::NoChange) => println!("No migrations to rollback"),
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

async fn status(conn: &ConnectionArgs, json: bool) -> Result<()> {
    let m = migrator(conn).await?;
    let status = bounded(conn, m.status()).await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    print_status(&status);
    Ok(())
}

fn print_status(status: &Status) {
    println!("Current Version: {}\n", status.current_version);

    if !status.applied.is_empty() {
        println!("Applied Migrations:");
        println!("-------------------");
        for m in &status.applied {
            println!(
                "  [{}] {} (applied at {}, took {}ms)",
                m.version,
                m.description,
                m.applied_at.to_rfc3339(),
                m.execution_ms
            );
        }
        println!();
    }

    if status.pending.is_empty() {
        println!("No pending migrations");
    } else {
        println!("Pending Migrations:");
        println!("-------------------");
        for m in &status.pending {
            println!("  [{}] {}", m.version, m.description);
        }
    }
}

async fn version(conn: &ConnectionArgs) -> Result<()> {
    let m = migrator(conn).await?;
    let version = bounded(conn, m.version()).await??;

    if version == 0 {
        println!("No migrations applied");
    } else {
        println!("Current version: {version}");
    }

    Ok(())
}

fn create(conn: &ConnectionArgs, name: &str, ext: &str) -> Result<()> {
    if ext != "cql" && ext != "sql" {
        bail!("invalid extension: {ext} (must be cql or sql)");
    }

    let dir = Path::new(&conn.dir);
    fs::create_dir_all(dir).context("failed to create migrations directory")?;

    let next = next_version(dir)?;
    let up_path = dir.join(format!("{next:06}_{name}.up.{ext}"));
    let down_path = dir.join(format!("{next:06}_{name}.down.{ext}"));

    fs::write(&up_path, format!("-- Migration: {name} (up)\n\n"))
        .context("failed to create up migration")?;
    fs::write(&down_path, format!("-- Migration: {name} (down)\n\n"))
        .context("failed to create down migration")?;

    println!("Created migration files:");
    println!("  {}", up_path.display());
    println!("  {}", down_path.display());

    Ok(())
}

/// Returns one more than the highest version present in `dir`, or 1 for a
/// missing or empty directory.
fn next_version(dir: &Path) -> Result<u64> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
        Err(e) => return Err(e).context("failed to read migrations directory"),
    };

    let mut max_version = 0;
    for entry in entries {
        let entry = entry.context("failed to read migrations directory")?;
        if entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if let Ok(migration) = strata::parse_migration(&name) {
            max_version = max_version.max(migration.version);
        }
    }

    Ok(max_version + 1)
}

async fn create_keyspace(
    conn: &ConnectionArgs,
    replication_factor: i32,
    datacenters: &[String],
    durable_writes: Option<bool>,
) -> Result<()> {
    let name = required_keyspace(conn)?;
    // The keyspace does not exist yet; connect without one.
    let session = connect(conn, None).await?;

    let mut options = KeyspaceOptions::new().replication_factor(replication_factor);
    for spec in datacenters {
        let (datacenter, factor) = parse_datacenter(spec)?;
        options = options.datacenter(datacenter, factor);
    }
    if let Some(durable) = durable_writes {
        options = options.durable_writes(durable);
    }

    bounded(conn, keyspace::create_keyspace(&session, &name, &options)).await??;
    println!("Created keyspace {name}");

    Ok(())
}

/// Builds a migrator for the configured keyspace, directory and
/// consistency. The session is shared with the migrator; dropping the
/// migrator leaves it open until the command finishes.
async fn migrator(conn: &ConnectionArgs) -> Result<Migrator> {
    let keyspace = required_keyspace(conn)?;
    let session = connect(conn, Some(&keyspace)).await?;

    let migrator = Migrator::builder()
        .session(session)
        .dir(&conn.dir)?
        .keyspace(keyspace)
        .history_table(conn.table.clone())
        .consistency(parse_consistency(&conn.consistency))
        .build()?;

    Ok(migrator)
}

async fn connect(conn: &ConnectionArgs, use_keyspace: Option<&str>) -> Result<Arc<Session>> {
    let nodes: Vec<String> = conn
        .hosts
        .split(',')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();
    if nodes.is_empty() {
        bail!("no hosts configured");
    }

    let mut builder = SessionBuilder::new()
        .known_nodes(&nodes)
        .connection_timeout(Duration::from_secs(conn.timeout));

    if let Some(datacenter) = &conn.datacenter {
        let policy = DefaultPolicy::builder()
            .prefer_datacenter(datacenter.clone())
            .build();
        let profile = ExecutionProfile::builder()
            .load_balancing_policy(policy)
            .build();
        builder = builder.default_execution_profile_handle(profile.into_handle());
    }

    if let Some(keyspace) = use_keyspace {
        builder = builder.use_keyspace(keyspace, false);
    }

    let session = builder
        .build()
        .await
        .context("failed to connect to ScyllaDB")?;

    Ok(Arc::new(session))
}

fn required_keyspace(conn: &ConnectionArgs) -> Result<String> {
    match &conn.keyspace {
        Some(keyspace) if !keyspace.is_empty() => Ok(keyspace.clone()),
        _ => bail!("keyspace is required (use --keyspace or SCYLLA_KEYSPACE)"),
    }
}

/// Applies the configured whole-operation deadline to an engine future.
async fn bounded<T, F>(conn: &ConnectionArgs, future: F) -> Result<Result<T, Error>>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::time::timeout(Duration::from_secs(conn.timeout), future)
        .await
        .context("operation timed out")
}

fn parse_consistency(value: &str) -> Consistency {
    match value.to_ascii_lowercase().as_str() {
        "any" => Consistency::Any,
        "one" => Consistency::One,
        "two" => Consistency::Two,
        "three" => Consistency::Three,
        "quorum" => Consistency::Quorum,
        "all" => Consistency::All,
        "local_quorum" | "localquorum" => Consistency::LocalQuorum,
        "each_quorum" | "eachquorum" => Consistency::EachQuorum,
        "local_one" | "localone" => Consistency::LocalOne,
        _ => Consistency::Quorum,
    }
}

fn parse_datacenter(spec: &str) -> Result<(&str, i32)> {
    let (name, factor) = spec
        .split_once('=')
        .with_context(|| format!("invalid datacenter spec {spec:?} (expected NAME=RF)"))?;

    let name = name.trim();
    if name.is_empty() {
        bail!("invalid datacenter spec {spec:?} (empty name)");
    }

    let factor = factor
        .trim()
        .parse::<i32>()
        .with_context(|| format!("invalid replication factor in {spec:?}"))?;

    Ok((name, factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn consistency_names_map_to_driver_levels() {
        assert!(matches!(parse_consistency("any"), Consistency::Any));
        assert!(matches!(parse_consistency("one"), Consistency::One));
        assert!(matches!(parse_consistency("two"), Consistency::Two));
        assert!(matches!(parse_consistency("three"), Consistency::Three));
        assert!(matches!(parse_consistency("quorum"), Consistency::Quorum));
        assert!(matches!(parse_consistency("all"), Consistency::All));
        assert!(matches!(
            parse_consistency("local_quorum"),
            Consistency::LocalQuorum
        ));
        assert!(matches!(
            parse_consistency("eachquorum"),
            Consistency::EachQuorum
        ));
        assert!(matches!(
            parse_consistency("LOCAL_ONE"),
            Consistency::LocalOne
        ));
    }

    #[test]
    fn unknown_consistency_falls_back_to_quorum() {
        assert!(matches!(parse_consistency("serial"), Consistency::Quorum));
        assert!(matches!(parse_consistency(""), Consistency::Quorum));
    }

    #[test]
    fn datacenter_specs_parse_name_and_factor() {
        assert_eq!(parse_datacenter("dc1=3").unwrap(), ("dc1", 3));
        assert_eq!(parse_datacenter(" dc2 = 2 ").unwrap(), ("dc2", 2));

        assert!(parse_datacenter("dc1").is_err());
        assert!(parse_datacenter("=3").is_err());
        assert!(parse_datacenter("dc1=many").is_err());
    }

    #[test]
    fn next_version_starts_at_one_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does_not_exist");
        assert_eq!(next_version(&missing).unwrap(), 1);
    }

    #[test]
    fn next_version_ignores_non_migration_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "docs").unwrap();
        assert_eq!(next_version(dir.path()).unwrap(), 1);
    }

    #[test]
    fn next_version_is_one_past_the_highest_existing_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("000001_a.up.cql"), "").unwrap();
        fs::write(dir.path().join("000001_a.down.cql"), "").unwrap();
        fs::write(dir.path().join("000007_b.up.cql"), "").unwrap();
        assert_eq!(next_version(dir.path()).unwrap(), 8);
    }

    #[test]
    fn create_scaffolds_an_up_down_pair() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection_args_for(dir.path());

        create(&conn, "add_users", "cql").unwrap();

        let up = dir.path().join("000001_add_users.up.cql");
        let down = dir.path().join("000001_add_users.down.cql");
        assert_eq!(
            fs::read_to_string(up).unwrap(),
            "-- Migration: add_users (up)\n\n"
        );
        assert_eq!(
            fs::read_to_string(down).unwrap(),
            "-- Migration: add_users (down)\n\n"
        );

        // The scaffold is itself a valid migration pair for the next run.
        assert_eq!(next_version(dir.path()).unwrap(), 2);
    }

    #[test]
    fn create_rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connection_args_for(dir.path());
        assert!(create(&conn, "x", "txt").is_err());
    }

    fn connection_args_for(dir: &Path) -> ConnectionArgs {
        ConnectionArgs {
            hosts: "localhost:9042".to_string(),
            keyspace: None,
            dir: dir.to_string_lossy().into_owned(),
            consistency: "quorum".to_string(),
            timeout: 30,
            table: "schema_migrations".to_string(),
            datacenter: None,
        }
    }
}
