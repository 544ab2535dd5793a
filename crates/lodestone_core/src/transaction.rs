//! Scoped write transactions.

use crate::database::DbInner;
use crate::error::Result;
use std::sync::Arc;

/// What a transaction will do when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Do nothing (the transaction never took effect).
    NoOp,
    /// Commit on scope exit. The initial state.
    Commit,
    /// Roll back on scope exit.
    Abort,
    /// Commit, and force the write-ahead state fully to disk.
    CommitManualWalFlush,
}

/// Grants exclusive write access to a database file while in scope.
///
/// Beginning a transaction takes the file-level lock: only one
/// transaction can exist per database *file* at a time, across every
/// handle in the process. Mutations made through [`crate::KeyStore`]
/// require an active transaction and are visible immediately to reads on
/// the transaction's thread; other threads see them only after commit.
///
/// Dropping the transaction commits or rolls back according to its
/// state. Use [`Transaction::end`] instead of plain drop when a commit
/// fault must be observable; a destructor cannot return one.
pub struct Transaction {
    pub(crate) db: Arc<DbInner>,
    state: TransactionState,
    ended: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn begin(db: Arc<DbInner>) -> Result<Self> {
        db.begin_physical()?;
        Ok(Self {
            db,
            state: TransactionState::Commit,
            ended: false,
        })
    }

    /// The action this transaction will take at scope exit.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Arms the transaction to roll back instead of committing.
    ///
    /// Idempotent; has no effect on a `NoOp` transaction.
    pub fn abort(&mut self) {
        if self.state != TransactionState::NoOp {
            self.state = TransactionState::Abort;
        }
    }

    /// Requests a full write-ahead flush on commit.
    ///
    /// Only upgrades a plain `Commit`; an aborted transaction stays
    /// aborted.
    pub fn flush_wal(&mut self) {
        if self.state == TransactionState::Commit {
            self.state = TransactionState::CommitManualWalFlush;
        }
    }

    /// Ends the transaction now, surfacing any commit fault.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        let state = self.state;
        self.db.end_physical(state)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(err) = self.db.end_physical(self.state) {
            tracing::warn!("transaction cleanup failed: {err}");
        }
    }
}

