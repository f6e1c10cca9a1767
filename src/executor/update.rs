use super::{SubjectOperationExecutor, UpdateStatement};
use crate::core::{DbError, Result, Value, ValueMap};
use crate::entity::EntityRef;
use crate::metadata::{ColumnMetadata, ColumnMode, RelationMetadata};
use crate::subject::{Subject, related_id};
use tracing::{Level, event};

/// Values per physical table, in first-touched order.
#[derive(Default)]
struct TableValues(Vec<(String, ValueMap)>);

impl TableValues {
    fn slot(&mut self, table: &str) -> &mut ValueMap {
        let position = match self.0.iter().position(|(name, _)| name == table) {
            Some(position) => position,
            None => {
                self.0.push((table.to_string(), ValueMap::new()));
                self.0.len() - 1
            }
        };
        &mut self.0[position].1
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Version written by an update: the entity's value, else the snapshot's,
/// plus one.
pub(super) fn next_version(subject: &Subject, column: &ColumnMetadata) -> i64 {
    let read = |entity: Option<&EntityRef>| {
        entity
            .and_then(|entity| column.value_of(entity))
            .and_then(|value| value.as_i64())
    };
    read(subject.entity.as_ref())
        .or_else(|| read(subject.database_entity.as_ref()))
        .unwrap_or(0)
        + 1
}

impl SubjectOperationExecutor {
    pub(super) async fn execute_update_operations(
        &self,
        subjects: &[Subject],
        indices: &[usize],
    ) -> Result<()> {
        let mut statements = Vec::new();
        for &index in indices {
            statements.extend(self.update_statements(subjects, &subjects[index])?);
        }
        event!(Level::DEBUG, count = statements.len(), "updating rows");
        self.run_updates(statements).await
    }

    fn update_statements(&self, subjects: &[Subject], subject: &Subject) -> Result<Vec<UpdateStatement>> {
        let entity = subject.entity.as_ref().ok_or_else(|| {
            DbError::Internal(format!("Update subject of '{}' has no entity", subject.metadata.target))
        })?;
        let mut tables = TableValues::default();

        for column in &subject.diff_columns {
            let value = column.value_of(entity).unwrap_or(Value::Null);
            tables
                .slot(&column.table_name)
                .insert(column.name.clone(), self.prepare(value, column)?);
        }
        for relation in &subject.diff_relations {
            let Some(join_column) = &relation.join_column else {
                continue;
            };
            let value = self.relation_value(subjects, relation, entity.related(&relation.property_name))?;
            tables
                .slot(&join_column.table_name)
                .insert(join_column.name.clone(), self.prepare(value, join_column)?);
        }
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        for column in subject.metadata.all_columns() {
            let value = match column.mode {
                ColumnMode::UpdateDate => Value::Timestamp(subject.date()),
                ColumnMode::Version => Value::Integer(next_version(subject, column)),
                _ => continue,
            };
            tables
                .slot(&column.table_name)
                .insert(column.name.clone(), self.prepare(value, column)?);
        }

        self.keyed_by_identity(subject, tables, "Cannot get id of the updating entity")
    }

    /// Join column value for a relation pointer; `None` nulls the column.
    fn relation_value(
        &self,
        subjects: &[Subject],
        relation: &RelationMetadata,
        related: Option<EntityRef>,
    ) -> Result<Value> {
        match related {
            Some(related) => related_id(subjects, &related, &relation.referenced_property)
                .ok_or_else(|| DbError::cascade(&relation.target, &relation.property_name)),
            None => Ok(Value::Null),
        }
    }

    fn keyed_by_identity(
        &self,
        subject: &Subject,
        tables: TableValues,
        missing_identity: &str,
    ) -> Result<Vec<UpdateStatement>> {
        tables
            .0
            .into_iter()
            .map(|(table, values)| {
                let conditions = subject
                    .metadata
                    .table_metadata(&table)
                    .and_then(|table| subject.identity_for(table))
                    .ok_or_else(|| DbError::Internal(missing_identity.to_string()))?;
                Ok(UpdateStatement {
                    table,
                    values,
                    conditions,
                })
            })
            .collect()
    }

    /// Writes bare relation pointer changes, one statement per physical table.
    pub(super) async fn execute_relation_update_operations(
        &self,
        subjects: &[Subject],
        indices: &[usize],
    ) -> Result<()> {
        let mut statements = Vec::new();
        for &index in indices {
            let subject = &subjects[index];
            let mut tables = TableValues::default();
            for update in &subject.relation_updates {
                let Some(join_column) = &update.relation.join_column else {
                    continue;
                };
                let value = self.relation_value(subjects, &update.relation, update.value.clone())?;
                tables
                    .slot(&join_column.table_name)
                    .insert(join_column.name.clone(), self.prepare(value, join_column)?);
            }
            statements.extend(self.keyed_by_identity(
                subject,
                tables,
                "Cannot get id of the entity whose relation is updated",
            )?);
        }
        event!(Level::DEBUG, count = statements.len(), "updating relations");
        self.run_updates(statements).await
    }
}
