//! Integration tests for transaction execution through the pool.

use pretty_assertions::assert_eq;
use sqlpro::memory::MemoryDriver;
use sqlpro::prelude::*;

fn pool(driver: &MemoryDriver, policy: RollbackPolicy) -> ServicePool<MemoryDriver> {
    ServicePool::builder(driver.clone())
        .params(ConnectParams::new("integration"))
        .size(1)
        .rollback_policy(policy)
        .build()
        .unwrap()
}

/// All statements succeed
#[test]
fn test_commit() {
    let driver = MemoryDriver::new();
    let pool = pool(&driver, RollbackPolicy::default());

    pool.submit_transaction(SqlTransaction::with_statements(["A", "B", "C"]))
        .wait()
        .unwrap();

    assert_eq!(
        driver.statements(),
        vec!["START TRANSACTION", "A", "B", "C", "COMMIT"]
    );
}

/// The default policy ends the transaction at the rollback
#[test]
fn test_rollback_without_commit() {
    let driver = MemoryDriver::new().fail_on("B", "Deadlock found", 1213);
    let pool = pool(&driver, RollbackPolicy::SkipCommit);

    let err = pool
        .submit_transaction(SqlTransaction::with_statements(["A", "B", "C"]))
        .wait()
        .unwrap_err();

    match err {
        SqlError::TransactionFailed { statement, source } => {
            assert_eq!(statement, 1);
            assert_eq!(source.driver_code(), Some(1213));
        }
        other => panic!("expected a transaction failure, got {other}"),
    }
    assert_eq!(
        driver.statements(),
        vec!["START TRANSACTION", "A", "B", "ROLLBACK"]
    );
}

/// The compatibility policy sends COMMIT after ROLLBACK
#[test]
fn test_rollback_then_commit() {
    let driver = MemoryDriver::new().fail_on("B", "Deadlock found", 1213);
    let pool = pool(&driver, RollbackPolicy::CommitAfterRollback);

    let result = pool
        .submit_transaction(SqlTransaction::with_statements(["A", "B", "C"]))
        .wait();

    assert!(result.unwrap_err().is_transaction_failure());
    assert_eq!(
        driver.statements(),
        vec!["START TRANSACTION", "A", "B", "ROLLBACK", "COMMIT"]
    );
}

/// Failure of the first statement
#[test]
fn test_first_statement_fails() {
    let driver = MemoryDriver::new().fail_on("A", "Unknown column", 1054);
    let pool = pool(&driver, RollbackPolicy::SkipCommit);

    let err = pool
        .submit_transaction(SqlTransaction::new().add("A").add("B"))
        .wait()
        .unwrap_err();

    assert!(matches!(err, SqlError::TransactionFailed { statement: 0, .. }));
    assert_eq!(driver.statements(), vec!["START TRANSACTION", "A", "ROLLBACK"]);
}

/// An empty transaction never reaches the backend
#[test]
fn test_empty_transaction() {
    let driver = MemoryDriver::new();
    let pool = pool(&driver, RollbackPolicy::default());

    let err = pool
        .submit_transaction(SqlTransaction::new())
        .wait()
        .unwrap_err();

    assert!(matches!(err, SqlError::EmptyTransaction));
    assert!(driver.statements().is_empty());
    assert_eq!(pool.idle_connections(), 1);
}

/// Transactions on one connection do not interleave
#[test]
fn test_sequential_transactions_stay_grouped() {
    let driver = MemoryDriver::new();
    let pool = pool(&driver, RollbackPolicy::default());

    for n in 0..3 {
        let tx: SqlTransaction = (0..2).map(|i| format!("INSERT {n}.{i}")).collect();
        pool.submit_transaction(tx).wait().unwrap();
    }

    let journal = driver.statements();
    assert_eq!(journal.len(), 12);
    for chunk in journal.chunks(4) {
        assert_eq!(chunk[0], "START TRANSACTION");
        assert_eq!(chunk[3], "COMMIT");
    }
}
