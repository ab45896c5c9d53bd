//! Bounded token-range query text
//!
//! Builds the CQL statement each range query prepares:
//!
//! ```text
//! SELECT token(id) FROM test_keyspace.example
//!   WHERE token(id) >= ? AND token(id) <= ?
//! ```
//!
//! Identifiers are spliced into the statement text, so they are restricted to
//! the unquoted CQL identifier alphabet.

use crate::error::{Error, Result};

/// Longest keyspace or table name the cluster accepts
const MAX_IDENTIFIER_LEN: usize = 48;

/// Token-range restricted select over one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    keyspace: String,
    table: String,
    partition_key: Vec<String>,
}

impl RangeQuery {
    /// Create a query over `keyspace.table` keyed by `partition_key`
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if any identifier is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_]`.
    pub fn new<I, S>(keyspace: &str, table: &str, partition_key: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let partition_key: Vec<String> = partition_key.into_iter().map(Into::into).collect();
        if partition_key.is_empty() {
            return Err(Error::Configuration(
                "Partition key must name at least one column".to_string(),
            ));
        }

        validate_identifier("keyspace", keyspace)?;
        validate_identifier("table", table)?;
        for column in &partition_key {
            validate_identifier("partition key column", column)?;
        }

        Ok(Self {
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            partition_key,
        })
    }

    /// Keyspace the query reads from
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Table the query reads from
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The `token(...)` expression for the partition key
    pub fn token_expr(&self) -> String {
        format!("token({})", self.partition_key.join(", "))
    }

    /// Statement text with two bind markers: lower then upper bound
    pub fn cql(&self) -> String {
        let token = self.token_expr();
        format!(
            "SELECT {token} FROM {}.{} WHERE {token} >= ? AND {token} <= ?",
            self.keyspace, self.table
        )
    }
}

fn validate_identifier(what: &str, ident: &str) -> Result<()> {
    if ident.is_empty() {
        return Err(Error::Configuration(format!("{} cannot be empty", what)));
    }
    if ident.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Configuration(format!(
            "{} '{}' exceeds {} characters",
            what, ident, MAX_IDENTIFIER_LEN
        )));
    }
    if !ident
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Configuration(format!(
            "{} '{}' may only contain letters, digits and underscores",
            what, ident
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_column_key() {
        let query = RangeQuery::new("test_keyspace", "example", ["id"]).unwrap();
        assert_eq!(
            query.cql(),
            "SELECT token(id) FROM test_keyspace.example WHERE token(id) >= ? AND token(id) <= ?"
        );
    }

    #[test]
    fn test_composite_key() {
        let query = RangeQuery::new("ks", "events", ["tenant", "day"]).unwrap();
        assert_eq!(query.token_expr(), "token(tenant, day)");
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        assert!(RangeQuery::new("ks; DROP", "t", ["id"]).is_err());
        assert!(RangeQuery::new("ks", "", ["id"]).is_err());
        assert!(RangeQuery::new("ks", "t", Vec::<String>::new()).is_err());
        assert!(RangeQuery::new("ks", "t", ["id)"]).is_err());
        assert!(RangeQuery::new(&"k".repeat(49), "t", ["id"]).is_err());
    }
}
