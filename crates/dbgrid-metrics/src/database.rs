//! Database status-query seam.
//!
//! The collector asks the managed database for connection, transaction and
//! running-query listings through [`DatabaseClient`], injected at
//! construction so tests and deployments without a reachable endpoint can
//! substitute their own implementation.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Status statements issued by the collector.
pub mod statements {
    /// One row, one column: number of open client connections.
    pub const CONNECTION_COUNT: &str =
        "CALL dbms.listConnections() YIELD connectionId RETURN count(connectionId) AS connections";

    /// One row, one column: number of transactions currently executing.
    pub const ACTIVE_TRANSACTIONS: &str =
        "SHOW TRANSACTIONS YIELD transactionId RETURN count(transactionId) AS transactions";

    /// One row per running query, first column elapsed milliseconds.
    pub const RUNNING_QUERIES: &str =
        "CALL dbms.listQueries() YIELD elapsedTimeMillis RETURN elapsedTimeMillis";
}

/// Tabular result of a status query, all cells as text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    /// First cell of the first row as a finite number.
    pub fn scalar(&self) -> Option<f64> {
        self.rows
            .first()
            .and_then(|row| row.first())
            .and_then(|cell| parse_finite(cell))
    }

    /// Every finite number in the given column.
    pub fn column_f64(&self, index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|row| row.get(index))
            .filter_map(|cell| parse_finite(cell))
            .collect()
    }
}

fn parse_finite(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Failure of a status query.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Which members a status query should be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTarget<'a> {
    pub cluster_id: &'a str,
    /// `None` addresses the cluster as a whole.
    pub role_group: Option<&'a str>,
}

/// Boxed future alias for status query results.
pub type QueryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<QueryResult, DatabaseError>> + Send + 'a>>;

/// Executes protocol-level status queries against the managed database.
pub trait DatabaseClient: Send + Sync {
    fn query<'a>(&'a self, target: QueryTarget<'a>, statement: &'a str) -> QueryFuture<'a>;
}

/// Client for deployments without a reachable database endpoint.
///
/// Every query reports the database as unavailable, so the collector runs
/// entirely on fallback values.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineDatabase;

impl DatabaseClient for OfflineDatabase {
    fn query<'a>(&'a self, target: QueryTarget<'a>, _statement: &'a str) -> QueryFuture<'a> {
        Box::pin(async move {
            Err(DatabaseError::Unavailable(format!(
                "no database endpoint configured for {}",
                target.cluster_id
            )))
        })
    }
}
