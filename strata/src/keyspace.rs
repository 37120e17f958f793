//! Keyspace administration helpers.
//!
//! The migrator assumes its keyspace exists; these helpers create, probe
//! and drop keyspaces from a session connected without one. Keyspace names
//! cannot be bound as query parameters, so the DDL is assembled as text.

use std::collections::BTreeMap;

use scylla::query::Query;
use scylla::Session;

use crate::errors::{Error, KeyspaceError};

/// The replication strategy of a keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStrategy {
    /// `SimpleStrategy`, for single-datacenter deployments.
    Simple,
    /// `NetworkTopologyStrategy`, for multi-datacenter deployments.
    NetworkTopology,
}

/// Configuration for creating a keyspace.
///
/// Defaults: `SimpleStrategy` with replication factor 1, `IF NOT EXISTS`,
/// and the cluster's own durable-writes setting.
#[derive(Debug, Clone)]
pub struct KeyspaceOptions {
    strategy: ReplicationStrategy,
    replication_factor: i32,
    datacenters: BTreeMap<String, i32>,
    durable_writes: Option<bool>,
    if_not_exists: bool,
}

impl Default for KeyspaceOptions {
    fn default() -> Self {
        KeyspaceOptions {
            strategy: ReplicationStrategy::Simple,
            replication_factor: 1,
            datacenters: BTreeMap::new(),
            durable_writes: None,
            if_not_exists: true,
        }
    }
}

impl KeyspaceOptions {
    /// Creates the default configuration.
    pub fn new() -> Self {
        KeyspaceOptions::default()
    }

    /// Sets the replication factor for `SimpleStrategy`.
    pub fn replication_factor(mut self, factor: i32) -> Self {
        self.replication_factor = factor;
        self
    }

    /// Switches to `NetworkTopologyStrategy` and adds a datacenter with
    /// its replication factor. May be called once per datacenter.
    pub fn datacenter(mut self, name: impl Into<String>, factor: i32) -> Self {
        self.strategy = ReplicationStrategy::NetworkTopology;
        self.datacenters.insert(name.into(), factor);
        self
    }

    /// Sets durable writes explicitly. Disabling trades durability for
    /// write latency.
    pub fn durable_writes(mut self, enabled: bool) -> Self {
        self.durable_writes = Some(enabled);
        self
    }

    /// Sets whether to use the `IF NOT EXISTS` clause. Default: true.
    pub fn if_not_exists(mut self, if_not_exists: bool) -> Self {
        self.if_not_exists = if_not_exists;
        self
    }
}

/// Creates a keyspace with the given options and waits for schema
/// agreement. The session should be connected without a keyspace.
pub async fn create_keyspace(
    session: &Session,
    name: &str,
    options: &KeyspaceOptions,
) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::NoKeyspace);
    }

    let cql = build_create_keyspace_cql(name, options);

    session
        .query_unpaged(Query::new(cql), ())
        .await
        .map_err(|e| KeyspaceError::new(name, "create", Error::Database(e)))?;

    session
        .await_schema_agreement()
        .await
        .map(drop)
        .map_err(Error::SchemaAgreement)
}

/// Reports whether a keyspace exists.
pub async fn keyspace_exists(session: &Session, name: &str) -> Result<bool, Error> {
    if name.is_empty() {
        return Err(Error::NoKeyspace);
    }

    let result = session
        .query_unpaged(
            Query::new("SELECT COUNT(*) FROM system_schema.keyspaces WHERE keyspace_name = ?"),
            (name,),
        )
        .await
        .map_err(|e| KeyspaceError::new(name, "check existence", Error::Database(e)))?;

    let rows = result.into_rows_result().map_err(Error::decode)?;
    let count = rows
        .maybe_first_row::<(i64,)>()
        .map_err(Error::decode)?
        .map(|(count,)| count)
        .unwrap_or(0);

    Ok(count > 0)
}

/// Drops a keyspace and waits for schema agreement.
pub async fn drop_keyspace(session: &Session, name: &str, if_exists: bool) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::NoKeyspace);
    }

    let cql = if if_exists {
        format!("DROP KEYSPACE IF EXISTS {name}")
    } else {
        format!("DROP KEYSPACE {name}")
    };

    session
        .query_unpaged(Query::new(cql), ())
        .await
        .map_err(|e| KeyspaceError::new(name, "drop", Error::Database(e)))?;

    session
        .await_schema_agreement()
        .await
        .map(drop)
        .map_err(Error::SchemaAgreement)
}

fn build_create_keyspace_cql(name: &str, options: &KeyspaceOptions) -> String {
    let mut cql = String::from("CREATE KEYSPACE ");

    if options.if_not_exists {
        cql.push_str("IF NOT EXISTS ");
    }

    cql.push_str(name);
    cql.push_str(" WITH replication = {");

    match options.strategy {
        ReplicationStrategy::NetworkTopology => {
            cql.push_str("'class': 'NetworkTopologyStrategy'");
            for (datacenter, factor) in &options.datacenters {
                cql.push_str(&format!(", '{datacenter}': {factor}"));
            }
        }
        ReplicationStrategy::Simple => {
            cql.push_str(&format!(
                "'class': 'SimpleStrategy', 'replication_factor': {}",
                options.replication_factor
            ));
        }
    }

    cql.push('}');

    if let Some(durable) = options.durable_writes {
        cql.push_str(&format!(" AND durable_writes = {durable}"));
    }

    cql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_build_simple_strategy_cql() {
        let cql = build_create_keyspace_cql("app", &KeyspaceOptions::new());
        assert_eq!(
            cql,
            "CREATE KEYSPACE IF NOT EXISTS app WITH replication = \
             {'class': 'SimpleStrategy', 'replication_factor': 1}"
        );
    }

    #[test]
    fn replication_factor_is_configurable() {
        let options = KeyspaceOptions::new().replication_factor(3);
        let cql = build_create_keyspace_cql("app", &options);
        assert!(cql.contains("'replication_factor': 3"));
    }

    #[test]
    fn datacenters_switch_to_network_topology_in_stable_order() {
        let options = KeyspaceOptions::new()
            .datacenter("dc2", 2)
            .datacenter("dc1", 3);
        let cql = build_create_keyspace_cql("app", &options);
        assert_eq!(
            cql,
            "CREATE KEYSPACE IF NOT EXISTS app WITH replication = \
             {'class': 'NetworkTopologyStrategy', 'dc1': 3, 'dc2': 2}"
        );
    }

    #[test]
    fn durable_writes_clause_is_appended_when_set() {
        let options = KeyspaceOptions::new().durable_writes(false);
        let cql = build_create_keyspace_cql("app", &options);
        assert!(cql.ends_with(" AND durable_writes = false"));
    }

    #[test]
    fn if_not_exists_can_be_disabled() {
        let options = KeyspaceOptions::new().if_not_exists(false);
        let cql = build_create_keyspace_cql("app", &options);
        assert!(cql.starts_with("CREATE KEYSPACE app "));
    }
}
