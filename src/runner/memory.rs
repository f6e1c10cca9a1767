use super::QueryRunner;
use crate::core::{DbError, Result, Value, ValueMap};
use crate::metadata::{
    CLOSURE_ANCESTOR_COLUMN, CLOSURE_DESCENDANT_COLUMN, CLOSURE_LEVEL_COLUMN, ColumnMetadata,
    Generation,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{Level, event};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Begin,
    Commit,
    Rollback,
    Insert,
    Update,
    Delete,
    InsertIntoClosureTable,
}

/// Statement as received by [`MemoryQueryRunner`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Begin,
    Commit,
    Rollback,
    Insert {
        table: String,
        values: ValueMap,
    },
    Update {
        table: String,
        values: ValueMap,
        conditions: ValueMap,
    },
    Delete {
        table: String,
        conditions: ValueMap,
    },
    InsertIntoClosureTable {
        table: String,
        new_id: Value,
        parent_id: Option<Value>,
        tracks_level: bool,
    },
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Begin => StatementKind::Begin,
            Statement::Commit => StatementKind::Commit,
            Statement::Rollback => StatementKind::Rollback,
            Statement::Insert { .. } => StatementKind::Insert,
            Statement::Update { .. } => StatementKind::Update,
            Statement::Delete { .. } => StatementKind::Delete,
            Statement::InsertIntoClosureTable { .. } => StatementKind::InsertIntoClosureTable,
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::InsertIntoClosureTable { table, .. } => Some(table),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Failure {
    kind: StatementKind,
    table: Option<String>,
}

type Tables = BTreeMap<String, Vec<ValueMap>>;

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    /// Last generated value per `table.column`. Not rolled back.
    sequences: BTreeMap<String, i64>,
    /// Tables as they were when the open transaction began.
    transaction: Option<Tables>,
    log: Vec<Statement>,
    failures: Vec<Failure>,
}

impl MemoryState {
    fn check_failure(&self, kind: StatementKind, table: Option<&str>) -> Result<()> {
        let failing = self
            .failures
            .iter()
            .any(|f| f.kind == kind && (f.table.is_none() || f.table.as_deref() == table));
        if failing {
            return Err(DbError::ConstraintViolation(format!(
                "{:?} on '{}' rejected",
                kind,
                table.unwrap_or("<transaction>")
            )));
        }
        Ok(())
    }

    fn next_sequence(&mut self, table: &str, column: &str) -> i64 {
        let key = format!("{}.{}", table, column);
        let existing = self
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|row| row.get(column).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        let next = self.sequences.get(&key).copied().unwrap_or(0).max(existing) + 1;
        self.sequences.insert(key, next);
        next
    }
}

fn matches(row: &ValueMap, conditions: &ValueMap) -> bool {
    conditions
        .iter()
        .all(|(column, expected)| row.get(column) == Some(expected))
}

/// In-memory tables behind the [`QueryRunner`] interface.
///
/// Keeps every statement it receives, generates increment and uuid values,
/// maintains closure tables and supports one snapshot transaction at a time.
/// Failures can be injected per statement kind and table.
#[derive(Debug)]
pub struct MemoryQueryRunner {
    state: Mutex<MemoryState>,
    closure_self_level: i64,
    yield_between_statements: bool,
}

impl Default for MemoryQueryRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueryRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            closure_self_level: 1,
            yield_between_statements: false,
        }
    }

    /// Level stored on a node's self row in closure tables.
    pub fn with_closure_self_level(mut self, level: i64) -> Self {
        self.closure_self_level = level;
        self
    }

    /// Yields to the scheduler before every statement so concurrently issued
    /// statements interleave.
    pub fn with_yielding(mut self, enabled: bool) -> Self {
        self.yield_between_statements = enabled;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        Ok(self.state.lock()?)
    }

    /// Rejects every later statement of `kind` (on `table`, when given).
    pub fn fail_on(&self, kind: StatementKind, table: Option<&str>) -> Result<()> {
        self.lock()?.failures.push(Failure {
            kind,
            table: table.map(str::to_string),
        });
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<()> {
        self.lock()?.failures.clear();
        Ok(())
    }

    /// Adds rows without logging a statement.
    pub fn seed(&self, table: &str, rows: Vec<ValueMap>) -> Result<()> {
        self.lock()?
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }

    pub fn rows(&self, table: &str) -> Result<Vec<ValueMap>> {
        Ok(self.lock()?.tables.get(table).cloned().unwrap_or_default())
    }

    pub fn statements(&self) -> Result<Vec<Statement>> {
        Ok(self.lock()?.log.clone())
    }

    pub fn clear_statements(&self) -> Result<()> {
        self.lock()?.log.clear();
        Ok(())
    }

    async fn pause(&self) {
        if self.yield_between_statements {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl QueryRunner for MemoryQueryRunner {
    fn is_transaction_active(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transaction
            .is_some()
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.pause().await;
        let mut state = self.lock()?;
        state.check_failure(StatementKind::Begin, None)?;
        if state.transaction.is_some() {
            return Err(DbError::TransactionState(
                "Transaction already active".to_string(),
            ));
        }
        state.transaction = Some(state.tables.clone());
        state.log.push(Statement::Begin);
        event!(Level::TRACE, "memory runner: begin");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        self.pause().await;
        let mut state = self.lock()?;
        state.check_failure(StatementKind::Commit, None)?;
        if state.transaction.take().is_none() {
            return Err(DbError::TransactionState(
                "No active transaction to commit".to_string(),
            ));
        }
        state.log.push(Statement::Commit);
        event!(Level::TRACE, "memory runner: commit");
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        self.pause().await;
        let mut state = self.lock()?;
        state.check_failure(StatementKind::Rollback, None)?;
        let Some(tables) = state.transaction.take() else {
            return Err(DbError::TransactionState(
                "No active transaction to roll back".to_string(),
            ));
        };
        state.tables = tables;
        state.log.push(Statement::Rollback);
        event!(Level::TRACE, "memory runner: rollback");
        Ok(())
    }

    async fn insert(
        &self,
        table: &str,
        mut values: ValueMap,
        generated: Option<&ColumnMetadata>,
    ) -> Result<Option<Value>> {
        self.pause().await;
        let mut state = self.lock()?;
        state.check_failure(StatementKind::Insert, Some(table))?;

        let mut generated_value = None;
        if let Some(column) = generated {
            let provided = values.get(&column.name).is_some_and(|value| !value.is_null());
            if !provided {
                let value = match column.generated {
                    Some(Generation::Uuid) => Value::Uuid(Uuid::new_v4()),
                    _ => Value::Integer(state.next_sequence(table, &column.name)),
                };
                values.insert(column.name.clone(), value.clone());
                generated_value = Some(value);
            }
        }

        state.log.push(Statement::Insert {
            table: table.to_string(),
            values: values.clone(),
        });
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(values);
        event!(Level::TRACE, table, "memory runner: insert");
        Ok(generated_value)
    }

    async fn update(&self, table: &str, values: ValueMap, conditions: ValueMap) -> Result<()> {
        self.pause().await;
        let mut state = self.lock()?;
        state.check_failure(StatementKind::Update, Some(table))?;
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches(row, &conditions)) {
                row.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        state.log.push(Statement::Update {
            table: table.to_string(),
            values,
            conditions,
        });
        event!(Level::TRACE, table, "memory runner: update");
        Ok(())
    }

    async fn delete(&self, table: &str, conditions: ValueMap) -> Result<()> {
        self.pause().await;
        let mut state = self.lock()?;
        state.check_failure(StatementKind::Delete, Some(table))?;
        if let Some(rows) = state.tables.get_mut(table) {
            rows.retain(|row| !matches(row, &conditions));
        }
        state.log.push(Statement::Delete {
            table: table.to_string(),
            conditions,
        });
        event!(Level::TRACE, table, "memory runner: delete");
        Ok(())
    }

    async fn insert_into_closure_table(
        &self,
        table: &str,
        new_id: Value,
        parent_id: Option<Value>,
        tracks_level: bool,
    ) -> Result<i64> {
        self.pause().await;
        let mut state = self.lock()?;
        state.check_failure(StatementKind::InsertIntoClosureTable, Some(table))?;

        let self_level = self.closure_self_level;
        let ancestors: Vec<ValueMap> = match &parent_id {
            Some(parent) => state
                .tables
                .get(table)
                .into_iter()
                .flatten()
                .filter(|row| row.get(CLOSURE_DESCENDANT_COLUMN) == Some(parent))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let mut new_rows = Vec::with_capacity(ancestors.len() + 1);
        let mut max_level = self_level;
        for ancestor in &ancestors {
            let mut row = ValueMap::new();
            if let Some(id) = ancestor.get(CLOSURE_ANCESTOR_COLUMN) {
                row.insert(CLOSURE_ANCESTOR_COLUMN.to_string(), id.clone());
            }
            row.insert(CLOSURE_DESCENDANT_COLUMN.to_string(), new_id.clone());
            if tracks_level {
                let level = ancestor
                    .get(CLOSURE_LEVEL_COLUMN)
                    .and_then(Value::as_i64)
                    .unwrap_or(self_level)
                    + 1;
                max_level = max_level.max(level);
                row.insert(CLOSURE_LEVEL_COLUMN.to_string(), Value::Integer(level));
            }
            new_rows.push(row);
        }
        let mut own = ValueMap::new();
        own.insert(CLOSURE_ANCESTOR_COLUMN.to_string(), new_id.clone());
        own.insert(CLOSURE_DESCENDANT_COLUMN.to_string(), new_id.clone());
        if tracks_level {
            own.insert(CLOSURE_LEVEL_COLUMN.to_string(), Value::Integer(self_level));
        }
        new_rows.push(own);

        let level = if tracks_level {
            max_level
        } else {
            self_level + ancestors.len() as i64
        };

        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(new_rows);
        state.log.push(Statement::InsertIntoClosureTable {
            table: table.to_string(),
            new_id,
            parent_id,
            tracks_level,
        });
        event!(Level::TRACE, table, level, "memory runner: closure insert");
        Ok(level)
    }
}
