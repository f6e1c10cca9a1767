//! Statement-level access to the database.

mod memory;

pub use memory::{MemoryQueryRunner, Statement, StatementKind};

use crate::core::{Result, Value, ValueMap};
use crate::metadata::ColumnMetadata;
use async_trait::async_trait;

/// Primitive statements plus transaction control over one connection.
///
/// The executor shares a single runner across every statement of a unit of
/// work and may keep several statements of the same phase in flight at once.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    fn is_transaction_active(&self) -> bool;

    async fn begin_transaction(&self) -> Result<()>;

    async fn commit_transaction(&self) -> Result<()>;

    async fn rollback_transaction(&self) -> Result<()>;

    /// Inserts one row. When `generated` is given and the row does not
    /// carry a value for it, the runner generates one and returns it.
    async fn insert(
        &self,
        table: &str,
        values: ValueMap,
        generated: Option<&ColumnMetadata>,
    ) -> Result<Option<Value>>;

    async fn update(&self, table: &str, values: ValueMap, conditions: ValueMap) -> Result<()>;

    async fn delete(&self, table: &str, conditions: ValueMap) -> Result<()>;

    /// Copies the ancestor rows of `parent_id` for `new_id`, adds the self
    /// row and returns the level of `new_id`.
    async fn insert_into_closure_table(
        &self,
        table: &str,
        new_id: Value,
        parent_id: Option<Value>,
        tracks_level: bool,
    ) -> Result<i64>;
}
