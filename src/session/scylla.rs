//! Scylla/Cassandra backend
//!
//! Each worker gets its own driver session with the range statement prepared
//! once at connect time. Rows are pulled page by page through the driver's
//! row iterator and only counted.

use super::{ClusterTopology, RangeQuery, Session, SessionFactory};
use crate::config::ClusterConfig;
use crate::error::{Result, SessionError};
use crate::types::TokenRange;
use async_trait::async_trait;
use futures::StreamExt;
use ::scylla::prepared_statement::PreparedStatement;
use ::scylla::{Session as DriverSession, SessionBuilder};
use std::time::Duration;
use tracing::debug;

/// Opens driver sessions against the configured contact points
#[derive(Debug, Clone)]
pub struct ScyllaConnector {
    contact_points: Vec<String>,
    keyspace: String,
    connection_timeout: Duration,
    query: RangeQuery,
}

impl ScyllaConnector {
    /// Build a connector from cluster configuration
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let query = RangeQuery::new(
            &config.keyspace,
            &config.table,
            config.partition_key.iter().cloned(),
        )?;
        Ok(Self {
            contact_points: config.contact_points.clone(),
            keyspace: config.keyspace.clone(),
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            query,
        })
    }

    /// The statement every session prepares
    pub fn query(&self) -> &RangeQuery {
        &self.query
    }

    async fn open(&self) -> std::result::Result<DriverSession, SessionError> {
        let builder = SessionBuilder::new()
            .known_nodes(&self.contact_points)
            .connection_timeout(self.connection_timeout);

        tokio::time::timeout(self.connection_timeout, builder.build())
            .await
            .map_err(|_| SessionError::Timeout(self.connection_timeout))?
            .map_err(|e| SessionError::Connection(e.to_string()))
    }
}

#[async_trait]
impl SessionFactory for ScyllaConnector {
    type Session = ScyllaSession;

    async fn connect(&self) -> std::result::Result<ScyllaSession, SessionError> {
        let session = self.open().await?;
        session
            .use_keyspace(self.keyspace.as_str(), false)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let cql = self.query.cql();
        let prepared = session
            .prepare(cql.as_str())
            .await
            .map_err(|e| SessionError::Query(e.to_string()))?;

        debug!(keyspace = %self.keyspace, statement = %cql, "Scylla session ready");
        Ok(ScyllaSession { session, prepared })
    }
}

#[async_trait]
impl ClusterTopology for ScyllaConnector {
    async fn node_count(&self) -> std::result::Result<usize, SessionError> {
        let session = self
            .open()
            .await
            .map_err(|e| SessionError::Topology(e.to_string()))?;
        let nodes = session.get_cluster_data().get_nodes_info().len();
        Ok(nodes)
    }
}

/// Worker-owned driver session with the range statement prepared
pub struct ScyllaSession {
    session: DriverSession,
    prepared: PreparedStatement,
}

#[async_trait]
impl Session for ScyllaSession {
    async fn count_range(&self, range: TokenRange) -> std::result::Result<u64, SessionError> {
        let rows = self
            .session
            .execute_iter(self.prepared.clone(), (range.lower(), range.upper()))
            .await
            .map_err(|e| SessionError::Query(e.to_string()))?;
        let mut rows = std::pin::pin!(rows);

        let mut count = 0u64;
        while let Some(row) = rows.next().await {
            row.map_err(|e| SessionError::Query(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }
}
