//! Executes one unit of work.
//!
//! Phases run as barriers in a fixed order: insert, closure table,
//! junction insert, junction remove, update, relation update, remove.
//! Statements inside one phase set are issued concurrently over the shared
//! runner; removes run one at a time.

mod closure;
mod insert;
mod junction;
mod materialize;
mod remove;
mod transaction;
mod update;

pub use materialize::apply_generated_values;

use crate::broadcast::Broadcaster;
use crate::config::ExecutorConfig;
use crate::core::{Result, Value, ValueMap};
use crate::driver::Driver;
use crate::metadata::ColumnMetadata;
use crate::runner::QueryRunner;
use crate::subject::Subject;
use futures::future::try_join_all;
use futures::{StreamExt, TryStreamExt, stream};
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};
use transaction::TransactionScope;

pub struct SubjectOperationExecutor {
    runner: Arc<dyn QueryRunner>,
    broadcaster: Arc<dyn Broadcaster>,
    driver: Arc<dyn Driver>,
    config: ExecutorConfig,
}

/// Indices of the subjects taking part in each phase.
#[derive(Debug, Default)]
struct SubjectGroups {
    inserts: Vec<usize>,
    updates: Vec<usize>,
    removes: Vec<usize>,
    relation_updates: Vec<usize>,
    junction_inserts: Vec<usize>,
    junction_removes: Vec<usize>,
}

impl SubjectGroups {
    fn partition(subjects: &[Subject]) -> Self {
        let mut groups = Self::default();
        for (index, subject) in subjects.iter().enumerate() {
            if subject.must_be_inserted {
                groups.inserts.push(index);
            }
            if subject.must_be_updated {
                groups.updates.push(index);
            }
            if subject.must_be_removed {
                groups.removes.push(index);
            }
            if subject.has_relation_updates() {
                groups.relation_updates.push(index);
            }
            if !subject.junction_inserts.is_empty() {
                groups.junction_inserts.push(index);
            }
            if !subject.junction_removes.is_empty() {
                groups.junction_removes.push(index);
            }
        }
        groups
    }

    fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.removes.is_empty()
            && self.relation_updates.is_empty()
            && self.junction_inserts.is_empty()
            && self.junction_removes.is_empty()
    }

    fn by_kind<'a>(
        &self,
        subjects: &'a [Subject],
    ) -> (Vec<&'a Subject>, Vec<&'a Subject>, Vec<&'a Subject>) {
        let pick = |indices: &[usize]| -> Vec<&'a Subject> {
            indices.iter().map(|&i| &subjects[i]).collect()
        };
        (pick(&self.inserts), pick(&self.updates), pick(&self.removes))
    }
}

/// Single-table update produced by a phase.
#[derive(Debug)]
struct UpdateStatement {
    table: String,
    values: ValueMap,
    conditions: ValueMap,
}

impl SubjectOperationExecutor {
    pub fn new(
        runner: Arc<dyn QueryRunner>,
        broadcaster: Arc<dyn Broadcaster>,
        driver: Arc<dyn Driver>,
    ) -> Self {
        Self {
            runner,
            broadcaster,
            driver,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Persists every subject in one transaction.
    ///
    /// Joins the runner's transaction when one is already active and leaves
    /// its outcome to the caller; otherwise opens, commits or rolls back its
    /// own. Generated ids, timestamps and versions are written onto the
    /// entities only once the statements succeeded.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use subjectdb::*;
    /// # tokio_test::block_on(async {
    /// let registry = MetadataRegistry::builder()
    ///     .entity(
    ///         EntityMetadata::builder("Tag", "tag")
    ///             .column(ColumnMetadata::new("id", ColumnType::Integer).primary().generated(Generation::Increment))
    ///             .column(ColumnMetadata::new("name", ColumnType::Text)),
    ///     )
    ///     .build()?;
    /// let runner = Arc::new(MemoryQueryRunner::new());
    /// let executor = SubjectOperationExecutor::new(runner.clone(), Arc::new(NoopBroadcaster), Arc::new(DefaultDriver));
    ///
    /// // Joined: the caller's transaction stays open.
    /// runner.begin_transaction().await?;
    /// let tag = EntityRef::new("Tag").with("name", "rust");
    /// executor.execute(vec![Subject::insert(registry.get("Tag")?, tag.clone())]).await?;
    /// assert!(runner.is_transaction_active());
    /// runner.commit_transaction().await?;
    ///
    /// assert_eq!(runner.rows("tag")?.len(), 1);
    /// # Ok::<(), DbError>(())
    /// # }).unwrap();
    /// ```
    pub async fn execute(&self, mut subjects: Vec<Subject>) -> Result<()> {
        for subject in &subjects {
            subject.validate()?;
        }
        let groups = SubjectGroups::partition(&subjects);
        if groups.is_empty() {
            event!(Level::DEBUG, "nothing to persist");
            return Ok(());
        }

        let span = info_span!(
            "persist.execute",
            inserts = groups.inserts.len(),
            updates = groups.updates.len(),
            removes = groups.removes.len(),
            relation_updates = groups.relation_updates.len()
        );
        self.execute_groups(&mut subjects, &groups)
            .instrument(span)
            .await
    }

    async fn execute_groups(&self, subjects: &mut [Subject], groups: &SubjectGroups) -> Result<()> {
        let scope = TransactionScope::acquire(self.runner.as_ref()).await?;
        if let Err(err) = self.run_phases(subjects, groups).await {
            event!(Level::ERROR, error = %err, "unit of work failed");
            return Err(scope.abort(err).await);
        }
        scope.commit().await?;

        for subject in subjects.iter() {
            apply_generated_values(subject);
        }
        if self.config.listeners {
            let (inserts, updates, removes) = groups.by_kind(subjects);
            self.broadcaster
                .broadcast_after_events_for_all(&inserts, &updates, &removes)
                .await?;
        }
        event!(Level::DEBUG, "unit of work persisted");
        Ok(())
    }

    async fn run_phases(&self, subjects: &mut [Subject], groups: &SubjectGroups) -> Result<()> {
        if self.config.listeners {
            let (inserts, updates, removes) = groups.by_kind(subjects);
            self.broadcaster
                .broadcast_before_events_for_all(&inserts, &updates, &removes)
                .await?;
        }
        for &index in &groups.updates {
            subjects[index].recompute();
        }
        let subjects: &[Subject] = subjects;

        self.execute_insert_operations(subjects, &groups.inserts).await?;
        self.execute_closure_operations(subjects, &groups.inserts).await?;
        self.execute_insert_junctions_operations(subjects, &groups.junction_inserts)
            .await?;
        self.execute_remove_junctions_operations(subjects, &groups.junction_removes)
            .await?;
        self.execute_update_operations(subjects, &groups.updates).await?;
        self.execute_relation_update_operations(subjects, &groups.relation_updates)
            .await?;
        self.execute_remove_operations(subjects, &groups.removes).await
    }

    /// Awaits `operations` concurrently, bounded by `max_in_flight`.
    async fn run_all<I, F, T>(&self, operations: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        match self.config.max_in_flight {
            Some(limit) => {
                stream::iter(operations)
                    .buffer_unordered(limit.max(1))
                    .try_collect()
                    .await
            }
            None => try_join_all(operations).await,
        }
    }

    async fn run_updates(&self, statements: Vec<UpdateStatement>) -> Result<()> {
        let count = statements.len();
        self.run_all(statements.into_iter().map(|statement| async move {
            self.runner
                .update(&statement.table, statement.values, statement.conditions)
                .await
        }))
        .await?;
        event!(Level::TRACE, count, "updates executed");
        Ok(())
    }

    fn prepare(&self, value: Value, column: &ColumnMetadata) -> Result<Value> {
        self.driver.prepare_persistent_value(value, column)
    }
}
