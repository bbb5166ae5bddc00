//! Multi-statement transactions.
//!
//! A [`SqlTransaction`] is an ordered list of statements run on one
//! connection between `START TRANSACTION` and `COMMIT`. Execution stops at
//! the first failing statement and rolls back; see
//! [`RollbackPolicy`](crate::config::RollbackPolicy) for what follows the
//! rollback.
//!
//! ```rust
//! use sqlpro_core::SqlTransaction;
//!
//! let tx = SqlTransaction::new()
//!     .add("UPDATE accounts SET balance = balance - 10 WHERE id = 1")
//!     .add("UPDATE accounts SET balance = balance + 10 WHERE id = 2");
//! assert_eq!(tx.len(), 2);
//! ```

/// Statement that opens a transaction.
pub const BEGIN: &str = "START TRANSACTION";
/// Statement that commits a transaction.
pub const COMMIT: &str = "COMMIT";
/// Statement that rolls a transaction back.
pub const ROLLBACK: &str = "ROLLBACK";

/// An ordered list of statements executed as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlTransaction {
    statements: Vec<String>,
}

impl SqlTransaction {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transaction from a list of statements.
    pub fn with_statements<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a statement.
    pub fn push(&mut self, sql: impl Into<String>) {
        self.statements.push(sql.into());
    }

    /// Append a statement, builder style.
    pub fn add(mut self, sql: impl Into<String>) -> Self {
        self.push(sql);
        self
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if the transaction has no statements.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// The statements, in execution order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Consume the transaction and return its statements.
    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }
}

impl<S: Into<String>> FromIterator<S> for SqlTransaction {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::with_statements(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let tx = SqlTransaction::new().add("A").add("B");
        assert_eq!(tx.statements(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_from_iter() {
        let tx: SqlTransaction = ["A", "B", "C"].into_iter().collect();
        assert_eq!(tx.len(), 3);
        assert_eq!(tx.into_statements(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_empty() {
        let mut tx = SqlTransaction::new();
        assert!(tx.is_empty());
        tx.push("DELETE FROM t");
        assert!(!tx.is_empty());
    }
}
