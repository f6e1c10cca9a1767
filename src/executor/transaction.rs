use crate::core::{DbError, Result};
use crate::runner::QueryRunner;

/// Transaction a unit of work runs in. Only the scope that opened the
/// transaction ends it; a joined transaction is left to its owner.
pub(super) struct TransactionScope<'a> {
    runner: &'a dyn QueryRunner,
    owned: bool,
}

impl<'a> TransactionScope<'a> {
    pub(super) async fn acquire(runner: &'a dyn QueryRunner) -> Result<Self> {
        let owned = !runner.is_transaction_active();
        if owned {
            runner.begin_transaction().await?;
        }
        Ok(Self { runner, owned })
    }

    pub(super) async fn commit(self) -> Result<()> {
        if !self.owned {
            return Ok(());
        }
        if let Err(err) = self.runner.commit_transaction().await {
            self.rollback_quietly().await;
            return Err(err);
        }
        Ok(())
    }

    /// Rolls back an owned transaction and hands back the error that caused it.
    pub(super) async fn abort(self, err: DbError) -> DbError {
        if self.owned {
            self.rollback_quietly().await;
        }
        err
    }

    async fn rollback_quietly(&self) {
        if let Err(rollback_err) = self.runner.rollback_transaction().await {
            log::warn!("Rollback of failed unit of work failed: {}", rollback_err);
        }
    }
}
