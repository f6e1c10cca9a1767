use super::SubjectOperationExecutor;
use crate::core::{DbError, Result, Value, ValueMap};
use crate::entity::{EntityRef, PropertyPath};
use crate::metadata::{JunctionTableMetadata, RelationMetadata};
use crate::subject::{RelatedRef, Subject, related_id};
use tracing::{Level, event};

/// Properties holding the ids of both sides, seen from the relation's side.
fn referenced_sides<'a>(
    relation: &RelationMetadata,
    junction: &'a JunctionTableMetadata,
) -> (&'a PropertyPath, &'a PropertyPath) {
    if relation.is_owning() {
        (&junction.owner_referenced, &junction.inverse_referenced)
    } else {
        (&junction.inverse_referenced, &junction.owner_referenced)
    }
}

fn junction_of(relation: &RelationMetadata) -> Result<&JunctionTableMetadata> {
    relation.junction.as_ref().ok_or_else(|| {
        DbError::Internal(format!(
            "Relation '{}' has no junction table",
            relation.property_name
        ))
    })
}

impl SubjectOperationExecutor {
    pub(super) async fn execute_insert_junctions_operations(
        &self,
        subjects: &[Subject],
        indices: &[usize],
    ) -> Result<()> {
        let mut rows = Vec::new();
        for &index in indices {
            let subject = &subjects[index];
            for op in &subject.junction_inserts {
                for related in &op.entities {
                    rows.push(self.junction_insert_row(subjects, subject, &op.relation, related)?);
                }
            }
        }
        let count = rows.len();
        self.run_all(rows.into_iter().map(|(table, values)| async move {
            self.runner.insert(&table, values, None).await
        }))
        .await?;
        event!(Level::DEBUG, count, "junction rows inserted");
        Ok(())
    }

    fn junction_insert_row(
        &self,
        subjects: &[Subject],
        subject: &Subject,
        relation: &RelationMetadata,
        related: &EntityRef,
    ) -> Result<(String, ValueMap)> {
        let junction = junction_of(relation)?;
        let (own_property, related_property) = referenced_sides(relation, junction);

        let own_id = own_side_id(subject, own_property)
            .ok_or_else(|| DbError::cascade(&subject.metadata.target, &relation.property_name))?;
        let other_id = related_id(subjects, related, related_property)
            .ok_or_else(|| DbError::cascade(&relation.target, &relation.property_name))?;

        let values = self.junction_values(relation, junction, own_id, other_id)?;
        Ok((junction.table_name.clone(), values))
    }

    /// Row keyed by the junction columns, ordered by which side owns the relation.
    fn junction_values(
        &self,
        relation: &RelationMetadata,
        junction: &JunctionTableMetadata,
        own_id: Value,
        related_id: Value,
    ) -> Result<ValueMap> {
        let (owner_id, inverse_id) = if relation.is_owning() {
            (own_id, related_id)
        } else {
            (related_id, own_id)
        };
        let mut values = ValueMap::new();
        values.insert(
            junction.owner_column.name.clone(),
            self.prepare(owner_id, &junction.owner_column)?,
        );
        values.insert(
            junction.inverse_column.name.clone(),
            self.prepare(inverse_id, &junction.inverse_column)?,
        );
        Ok(values)
    }

    pub(super) async fn execute_remove_junctions_operations(
        &self,
        subjects: &[Subject],
        indices: &[usize],
    ) -> Result<()> {
        let mut deletes = Vec::new();
        for &index in indices {
            let subject = &subjects[index];
            for op in &subject.junction_removes {
                let junction = junction_of(&op.relation)?;
                let (own_property, related_property) = referenced_sides(&op.relation, junction);
                let own_id = own_side_id(subject, own_property).ok_or_else(|| {
                    DbError::Internal(format!(
                        "Cannot get id of '{}' to unlink '{}'",
                        subject.metadata.target, op.relation.property_name
                    ))
                })?;
                for related in &op.related {
                    let other_id = match related {
                        RelatedRef::Entity(entity) => related_id(subjects, entity, related_property)
                            .ok_or_else(|| {
                                DbError::cascade(&op.relation.target, &op.relation.property_name)
                            })?,
                        RelatedRef::Id(id) => id.clone(),
                    };
                    let conditions =
                        self.junction_values(&op.relation, junction, own_id.clone(), other_id)?;
                    deletes.push((junction.table_name.clone(), conditions));
                }
            }
        }
        let count = deletes.len();
        self.run_all(deletes.into_iter().map(|(table, conditions)| async move {
            self.runner.delete(&table, conditions).await
        }))
        .await?;
        event!(Level::DEBUG, count, "junction rows removed");
        Ok(())
    }
}

/// Id of the subject's side of a link. A subject being removed reads its
/// snapshot first; otherwise the live entity wins. Generated ids come last.
fn own_side_id(subject: &Subject, property: &PropertyPath) -> Option<Value> {
    let read = |entity: &Option<EntityRef>| {
        entity
            .as_ref()
            .and_then(|entity| entity.value(property))
            .and_then(Value::non_null)
    };
    let stored = if subject.must_be_removed {
        read(&subject.database_entity).or_else(|| read(&subject.entity))
    } else {
        read(&subject.entity).or_else(|| read(&subject.database_entity))
    };
    stored.or_else(|| subject.resolved_value(property))
}
