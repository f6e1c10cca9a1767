use super::Subject;
use crate::core::Value;
use crate::entity::EntityRef;
use crate::metadata::{ColumnMode, RelationMetadata};
use std::sync::Arc;

impl Subject {
    /// Adds the columns and owning relations that now differ from the
    /// snapshot. Before-listeners may have touched the entity after the
    /// subject was built; diffs already present are kept.
    pub fn recompute(&mut self) {
        let (Some(entity), Some(snapshot)) = (&self.entity, &self.database_entity) else {
            return;
        };

        let changed_columns: Vec<_> = self
            .metadata
            .all_columns()
            .into_iter()
            .filter(|column| column.mode == ColumnMode::Regular && !column.primary)
            .filter(|column| !self.diff_columns.iter().any(|known| Arc::ptr_eq(known, *column)))
            .filter(|column| match column.value_of(entity) {
                Some(current) => column.value_of(snapshot).as_ref() != Some(&current),
                None => false,
            })
            .cloned()
            .collect();

        let changed_relations: Vec<_> = self
            .metadata
            .all_relations()
            .into_iter()
            .filter(|relation| relation.join_column.is_some())
            .filter(|relation| !self.diff_relations.iter().any(|known| Arc::ptr_eq(known, *relation)))
            .filter(|relation| relation_changed(relation, entity, snapshot))
            .cloned()
            .collect();

        self.diff_columns.extend(changed_columns);
        self.diff_relations.extend(changed_relations);
    }
}

fn relation_changed(relation: &RelationMetadata, entity: &EntityRef, snapshot: &EntityRef) -> bool {
    let Some(current) = entity.relation(&relation.property_name) else {
        return false;
    };
    let stored = snapshot.relation(&relation.property_name).flatten();
    match (current, stored) {
        (None, None) => false,
        (Some(current), Some(stored)) if current.ptr_eq(&stored) => false,
        (Some(current), Some(stored)) => {
            let id = |related: &EntityRef| {
                related
                    .value(&relation.referenced_property)
                    .and_then(Value::non_null)
            };
            match (id(&current), id(&stored)) {
                (Some(current), Some(stored)) => current != stored,
                _ => true,
            }
        }
        _ => true,
    }
}
