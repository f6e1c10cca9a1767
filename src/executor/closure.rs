use super::{SubjectOperationExecutor, UpdateStatement};
use crate::core::{DbError, Result, Value, ValueMap};
use crate::entity::EntityRef;
use crate::metadata::ClosureTableMetadata;
use crate::subject::{Subject, related_id};
use tracing::{Level, event};

impl SubjectOperationExecutor {
    /// Adds closure rows for every inserted tree node and stores its level.
    ///
    /// Nodes are processed one at a time, parents before their children, as
    /// a node's rows are copied from its parent's.
    pub(super) async fn execute_closure_operations(
        &self,
        subjects: &[Subject],
        inserts: &[usize],
    ) -> Result<()> {
        let mut nodes: Vec<&Subject> = inserts
            .iter()
            .map(|&index| &subjects[index])
            .filter(|subject| subject.metadata.closure.is_some())
            .collect();
        if nodes.is_empty() {
            return Ok(());
        }
        let depths: Vec<usize> = nodes.iter().map(|node| depth_in_batch(node, &nodes)).collect();
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by_key(|&i| depths[i]);
        nodes = order.into_iter().map(|i| nodes[i]).collect();

        let mut level_updates = Vec::new();
        for subject in &nodes {
            if let Some(update) = self.insert_closure_rows(subjects, subject).await? {
                level_updates.push(update);
            }
        }
        event!(Level::DEBUG, count = nodes.len(), "closure rows inserted");
        self.run_updates(level_updates).await
    }

    /// Returns the update writing the computed level onto the node's own
    /// row, when the entity has a tree-level column.
    async fn insert_closure_rows(
        &self,
        subjects: &[Subject],
        subject: &Subject,
    ) -> Result<Option<UpdateStatement>> {
        let metadata = &subject.metadata;
        let (Some(closure), Some(entity)) = (&metadata.closure, &subject.entity) else {
            return Ok(None);
        };
        let id_column = metadata.identity_columns().into_iter().next().ok_or_else(|| {
            DbError::Internal(format!("Tree entity '{}' has no primary column", metadata.target))
        })?;
        let new_id = subject.resolved_value(&id_column.property).ok_or_else(|| {
            DbError::Internal(format!(
                "Cannot get id of the inserted tree entity '{}'",
                metadata.target
            ))
        })?;
        let parent_id = self.tree_parent_id(subjects, subject, entity, closure)?;
        let level_column = metadata.tree_level_column();

        let level = self
            .runner
            .insert_into_closure_table(
                &closure.table_name,
                new_id,
                parent_id,
                level_column.is_some(),
            )
            .await?;
        subject.set_tree_level(level)?;

        let Some(level_column) = level_column else {
            return Ok(None);
        };
        let table = metadata
            .table_metadata(&level_column.table_name)
            .ok_or_else(|| {
                DbError::Internal(format!(
                    "'{}' has no table '{}'",
                    metadata.target, level_column.table_name
                ))
            })?;
        let conditions = subject.identity_for(table).ok_or_else(|| {
            DbError::Internal("Cannot get id of the inserted tree entity".to_string())
        })?;
        let mut values = ValueMap::new();
        values.insert(
            level_column.name.clone(),
            self.prepare(Value::Integer(level), level_column)?,
        );
        Ok(Some(UpdateStatement {
            table: level_column.table_name.clone(),
            values,
            conditions,
        }))
    }

    /// Id of the node's parent: from the parent pointer, else from a subject
    /// whose children collection holds the node.
    fn tree_parent_id(
        &self,
        subjects: &[Subject],
        subject: &Subject,
        entity: &EntityRef,
        closure: &ClosureTableMetadata,
    ) -> Result<Option<Value>> {
        let relation = subject
            .metadata
            .relation(&closure.parent_relation)
            .ok_or_else(|| {
                DbError::Metadata(format!(
                    "Tree relation '{}' missing on '{}'",
                    closure.parent_relation, subject.metadata.target
                ))
            })?;

        if let Some(parent) = entity.related(&closure.parent_relation) {
            return related_id(subjects, &parent, &relation.referenced_property)
                .map(Some)
                .ok_or_else(|| DbError::cascade(&relation.target, &relation.property_name));
        }

        let Some(children) = &closure.children_relation else {
            return Ok(None);
        };
        let parent = subjects.iter().find(|other| {
            other
                .entity
                .as_ref()
                .is_some_and(|candidate| candidate.collection(children).iter().any(|c| c.ptr_eq(entity)))
        });
        Ok(parent.and_then(|parent| parent.resolved_value(&relation.referenced_property)))
    }
}

/// Number of ancestors of `node` that are inserted in the same batch.
fn depth_in_batch(node: &Subject, nodes: &[&Subject]) -> usize {
    let (Some(closure), Some(entity)) = (&node.metadata.closure, &node.entity) else {
        return 0;
    };
    let mut depth = 0;
    let mut current = entity.clone();
    while let Some(parent) = parent_in_batch(&current, nodes, closure) {
        depth += 1;
        if depth >= nodes.len() {
            break;
        }
        current = parent;
    }
    depth
}

/// Batch node that is the parent of `entity`, by pointer or by children collection.
fn parent_in_batch(
    entity: &EntityRef,
    nodes: &[&Subject],
    closure: &ClosureTableMetadata,
) -> Option<EntityRef> {
    if let Some(parent) = entity.related(&closure.parent_relation) {
        return nodes
            .iter()
            .any(|other| other.is_for(&parent))
            .then_some(parent);
    }
    let children = closure.children_relation.as_deref()?;
    nodes
        .iter()
        .filter_map(|other| other.entity.as_ref())
        .find(|candidate| candidate.collection(children).iter().any(|c| c.ptr_eq(entity)))
        .cloned()
}
