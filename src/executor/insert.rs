use super::{SubjectOperationExecutor, UpdateStatement};
use crate::core::{DbError, Result, Value, ValueMap};
use crate::entity::{EntityRef, PropertyPath};
use crate::metadata::{
    ColumnMetadata, ColumnMode, EmbeddedMetadata, EntityMetadata, RelationKind, RelationMetadata,
};
use crate::subject::{Subject, inserted_subject, related_id};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event};

/// What one insert left for the back-patch pass.
#[derive(Debug, Default)]
struct InsertOutcome {
    index: usize,
    /// Relations pointing at an entity whose id was not known yet.
    deferred: Vec<Arc<RelationMetadata>>,
    /// Relations whose join column was written with a non-null id.
    written: Vec<String>,
}

impl SubjectOperationExecutor {
    pub(super) async fn execute_insert_operations(
        &self,
        subjects: &[Subject],
        inserts: &[usize],
    ) -> Result<()> {
        if inserts.is_empty() {
            return Ok(());
        }
        // Bucket A has only nullable relations and goes first, so bucket B
        // can reference the ids it generated.
        let (bucket_a, bucket_b): (Vec<usize>, Vec<usize>) = inserts
            .iter()
            .partition(|&&index| !subjects[index].metadata.has_non_nullable_relations());

        let mut outcomes = self
            .run_all(
                bucket_a
                    .iter()
                    .map(|&index| self.insert_subject(subjects, index, false)),
            )
            .await?;
        event!(Level::DEBUG, count = bucket_a.len(), "bucket A inserted");

        outcomes.extend(
            self.run_all(
                bucket_b
                    .iter()
                    .map(|&index| self.insert_subject(subjects, index, true)),
            )
            .await?,
        );
        event!(Level::DEBUG, count = bucket_b.len(), "bucket B inserted");

        let patches = self.back_patch_statements(subjects, &outcomes)?;
        event!(Level::DEBUG, count = patches.len(), "back-patching relations");
        self.run_updates(patches).await
    }

    async fn insert_subject(
        &self,
        subjects: &[Subject],
        index: usize,
        after_bucket_a: bool,
    ) -> Result<InsertOutcome> {
        let subject = &subjects[index];
        let metadata = &subject.metadata;
        let mut outcome = InsertOutcome {
            index,
            ..Default::default()
        };

        let parent_id = match metadata.parent() {
            Some(parent) => {
                let values =
                    self.collect_columns_and_values(parent, subject, subjects, after_bucket_a, &mut outcome)?;
                let generated = self
                    .runner
                    .insert(&parent.table_name, values, parent.insert_generated_column().map(|c| &**c))
                    .await?;
                if let Some(id) = &generated {
                    subject.set_parent_generated_id(id.clone())?;
                }
                generated
            }
            None => None,
        };

        let values =
            self.collect_columns_and_values(metadata, subject, subjects, after_bucket_a, &mut outcome)?;
        let generated = self
            .runner
            .insert(&metadata.table_name, values, metadata.insert_generated_column().map(|c| &**c))
            .await?;

        if let Some(id) = parent_id.or(generated) {
            if metadata.object_id_column().is_some() {
                subject.set_generated_object_id(id)?;
            } else {
                subject.set_newly_generated_id(id)?;
            }
        }
        Ok(outcome)
    }

    /// Row of one physical table of `subject`'s entity.
    fn collect_columns_and_values(
        &self,
        table: &EntityMetadata,
        subject: &Subject,
        subjects: &[Subject],
        after_bucket_a: bool,
        outcome: &mut InsertOutcome,
    ) -> Result<ValueMap> {
        let entity = subject.entity.as_ref().ok_or_else(|| {
            DbError::Internal(format!("Insert subject of '{}' has no entity", subject.metadata.target))
        })?;
        let mut values = ValueMap::new();

        for column in table
            .columns
            .iter()
            .filter(|column| !column.property.is_embedded() && column.is_written_from_entity())
        {
            if let Some(value) = column.value_of(entity) {
                values.insert(column.name.clone(), self.prepare(value, column)?);
            }
        }
        for embedded in &table.embeddeds {
            self.collect_embedded(embedded, entity, &mut values)?;
        }

        for relation in &table.relations {
            let Some(join_column) = &relation.join_column else {
                continue;
            };
            let value = match entity.relation(&relation.property_name) {
                Some(Some(related)) => {
                    match self.lookup_id(subjects, &related, &relation.referenced_property, after_bucket_a) {
                        Some(id) => Some(id),
                        None => {
                            outcome.deferred.push(relation.clone());
                            None
                        }
                    }
                }
                Some(None) => Some(Value::Null),
                None => self.inverse_pointer_id(subjects, entity, relation, after_bucket_a),
            };
            if let Some(value) = value {
                if !value.is_null() {
                    outcome.written.push(relation.property_name.clone());
                }
                values.insert(join_column.name.clone(), self.prepare(value, join_column)?);
            }
        }

        for column in &table.columns {
            let value = match column.mode {
                ColumnMode::CreateDate | ColumnMode::UpdateDate => Value::Timestamp(subject.date()),
                ColumnMode::Version => Value::Integer(1),
                ColumnMode::Discriminator => match &subject.metadata.discriminator_value {
                    Some(discriminator) => Value::Text(discriminator.clone()),
                    None => continue,
                },
                ColumnMode::TreeLevel => Value::Integer(tree_level_at_insert(subject, entity, column)),
                _ => continue,
            };
            values.insert(column.name.clone(), self.prepare(value, column)?);
        }
        for column in &table.parent_id_columns {
            if let Some(value) = subject.resolved_value(&column.property) {
                values.insert(column.name.clone(), self.prepare(value, column)?);
            }
        }
        Ok(values)
    }

    fn collect_embedded(
        &self,
        embedded: &EmbeddedMetadata,
        entity: &EntityRef,
        values: &mut ValueMap,
    ) -> Result<()> {
        if !entity.has_embedded(&embedded.property) {
            return Ok(());
        }
        for column in embedded.columns.iter().filter(|c| c.is_written_from_entity()) {
            if let Some(value) = column.value_of(entity) {
                values.insert(column.name.clone(), self.prepare(value, column)?);
            }
        }
        for nested in &embedded.embeddeds {
            self.collect_embedded(nested, entity, values)?;
        }
        Ok(())
    }

    /// Referenced id of `related`; generated ids are only consulted once
    /// bucket A has completed.
    fn lookup_id(
        &self,
        subjects: &[Subject],
        related: &EntityRef,
        property: &PropertyPath,
        after_bucket_a: bool,
    ) -> Option<Value> {
        if after_bucket_a {
            related_id(subjects, related, property)
        } else {
            related.value(property).and_then(Value::non_null)
        }
    }

    /// Id of a subject whose inverse property points back at `entity`,
    /// for relations left unset on this side.
    fn inverse_pointer_id(
        &self,
        subjects: &[Subject],
        entity: &EntityRef,
        relation: &RelationMetadata,
        after_bucket_a: bool,
    ) -> Option<Value> {
        let inverse = relation.inverse_property.as_deref()?;
        let owner = subjects.iter().find_map(|other| {
            let other_entity = other.entity.as_ref()?;
            (other_entity.target() == relation.target && other_entity.points_at(inverse, entity))
                .then_some(other_entity)
        })?;
        self.lookup_id(subjects, owner, &relation.referenced_property, after_bucket_a)
    }

    /// Updates for join columns that could not be written at insert time.
    fn back_patch_statements(
        &self,
        subjects: &[Subject],
        outcomes: &[InsertOutcome],
    ) -> Result<Vec<UpdateStatement>> {
        let mut written: HashSet<(usize, String)> = outcomes
            .iter()
            .flat_map(|outcome| outcome.written.iter().map(|name| (outcome.index, name.clone())))
            .collect();
        let mut statements = Vec::new();

        for outcome in outcomes {
            let subject = &subjects[outcome.index];
            let Some(entity) = &subject.entity else {
                continue;
            };
            for relation in &outcome.deferred {
                let (Some(join_column), Some(related)) =
                    (&relation.join_column, entity.related(&relation.property_name))
                else {
                    continue;
                };
                let Some(id) = related_id(subjects, &related, &relation.referenced_property) else {
                    return Err(DbError::cascade(&relation.target, &relation.property_name));
                };
                let table = subject
                    .metadata
                    .table_metadata(&join_column.table_name)
                    .ok_or_else(|| {
                        DbError::Internal(format!(
                            "'{}' has no table '{}'",
                            subject.metadata.target, join_column.table_name
                        ))
                    })?;
                let conditions = subject.identity_for(table).ok_or_else(|| {
                    DbError::Internal("Cannot get id of the inserted entity".to_string())
                })?;
                let mut values = ValueMap::new();
                values.insert(join_column.name.clone(), self.prepare(id, join_column)?);
                statements.push(UpdateStatement {
                    table: join_column.table_name.clone(),
                    values,
                    conditions,
                });
                written.insert((outcome.index, relation.property_name.clone()));
            }
        }

        for outcome in outcomes {
            let subject = &subjects[outcome.index];
            let Some(entity) = &subject.entity else {
                continue;
            };
            for relation in subject.metadata.all_relations() {
                let Some(inverse) = &relation.inverse_join else {
                    continue;
                };
                let Some(own_id) = subject.resolved_value(&inverse.referenced_property) else {
                    continue;
                };
                let children = match relation.kind {
                    RelationKind::OneToMany => entity.collection(&relation.property_name),
                    _ => entity.related(&relation.property_name).into_iter().collect(),
                };
                let inverse_property = relation.inverse_property.clone().unwrap_or_default();

                for child in children {
                    let child_index = subjects
                        .iter()
                        .position(|other| other.must_be_inserted && other.is_for(&child));
                    if child_index.is_some_and(|i| written.contains(&(i, inverse_property.clone()))) {
                        continue;
                    }
                    if subjects
                        .iter()
                        .any(|other| other.must_be_removed && other.is_for(&child))
                    {
                        continue;
                    }
                    let child_subject = inserted_subject(subjects, &child);
                    let conditions: Option<ValueMap> = inverse
                        .primary_columns
                        .iter()
                        .map(|column| {
                            let value = column
                                .value_of(&child)
                                .and_then(Value::non_null)
                                .or_else(|| child_subject.and_then(|s| s.generated_value(column)))?;
                            Some((column.name.clone(), value))
                        })
                        .collect();
                    let Some(conditions) = conditions else {
                        continue;
                    };
                    let mut values = ValueMap::new();
                    values.insert(
                        inverse.join_column.name.clone(),
                        self.prepare(own_id.clone(), &inverse.join_column)?,
                    );
                    statements.push(UpdateStatement {
                        table: inverse.table_name.clone(),
                        values,
                        conditions,
                    });
                }
            }
        }
        Ok(statements)
    }
}

/// Level written with a new tree row: the parent's level plus one, the
/// parent level counting as 0 when unknown.
fn tree_level_at_insert(
    subject: &Subject,
    entity: &EntityRef,
    column: &ColumnMetadata,
) -> i64 {
    let parent_level = subject
        .metadata
        .closure
        .as_ref()
        .and_then(|closure| entity.related(&closure.parent_relation))
        .and_then(|parent| parent.value(&column.property))
        .and_then(|level| level.as_i64())
        .unwrap_or(0);
    parent_level + 1
}
