//! Per-entity change descriptors handed to the executor.

mod diff;

use crate::core::{DbError, Result, Value, ValueMap};
use crate::entity::{EntityRef, PropertyPath};
use crate::metadata::{ColumnMetadata, ColumnMode, EntityMetadata, RelationMetadata};
use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock};

/// Bare re-assignment of an owning relation pointer.
#[derive(Debug, Clone)]
pub struct RelationUpdate {
    pub relation: Arc<RelationMetadata>,
    /// New target, `None` to null the pointer.
    pub value: Option<EntityRef>,
}

#[derive(Debug, Clone)]
pub struct JunctionInsert {
    pub relation: Arc<RelationMetadata>,
    pub entities: Vec<EntityRef>,
}

/// Other side of a junction link being removed.
#[derive(Debug, Clone)]
pub enum RelatedRef {
    Entity(EntityRef),
    /// Referenced value of an entity that is not loaded.
    Id(Value),
}

#[derive(Debug, Clone)]
pub struct JunctionRemove {
    pub relation: Arc<RelationMetadata>,
    pub related: Vec<RelatedRef>,
}

#[derive(Debug)]
pub struct Subject {
    pub metadata: Arc<EntityMetadata>,
    pub entity: Option<EntityRef>,
    /// Last known persisted state.
    pub database_entity: Option<EntityRef>,
    pub must_be_inserted: bool,
    pub must_be_updated: bool,
    pub must_be_removed: bool,
    pub diff_columns: Vec<Arc<ColumnMetadata>>,
    pub diff_relations: Vec<Arc<RelationMetadata>>,
    pub relation_updates: Vec<RelationUpdate>,
    pub junction_inserts: Vec<JunctionInsert>,
    pub junction_removes: Vec<JunctionRemove>,
    date: DateTime<Utc>,
    newly_generated_id: OnceLock<Value>,
    generated_object_id: OnceLock<Value>,
    parent_generated_id: OnceLock<Value>,
    tree_level: OnceLock<i64>,
}

impl Subject {
    pub fn new(
        metadata: Arc<EntityMetadata>,
        entity: Option<EntityRef>,
        database_entity: Option<EntityRef>,
    ) -> Self {
        Self {
            metadata,
            entity,
            database_entity,
            must_be_inserted: false,
            must_be_updated: false,
            must_be_removed: false,
            diff_columns: Vec::new(),
            diff_relations: Vec::new(),
            relation_updates: Vec::new(),
            junction_inserts: Vec::new(),
            junction_removes: Vec::new(),
            date: Utc::now(),
            newly_generated_id: OnceLock::new(),
            generated_object_id: OnceLock::new(),
            parent_generated_id: OnceLock::new(),
            tree_level: OnceLock::new(),
        }
    }

    pub fn insert(metadata: Arc<EntityMetadata>, entity: EntityRef) -> Self {
        let mut subject = Self::new(metadata, Some(entity), None);
        subject.must_be_inserted = true;
        subject
    }

    pub fn update(
        metadata: Arc<EntityMetadata>,
        entity: EntityRef,
        database_entity: EntityRef,
    ) -> Self {
        let mut subject = Self::new(metadata, Some(entity), Some(database_entity));
        subject.must_be_updated = true;
        subject
    }

    /// Remove subject; `entity` is the live object to detach, if loaded.
    pub fn remove(
        metadata: Arc<EntityMetadata>,
        database_entity: EntityRef,
        entity: Option<EntityRef>,
    ) -> Self {
        let mut subject = Self::new(metadata, entity, Some(database_entity));
        subject.must_be_removed = true;
        subject
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn with_diff_column(mut self, property: &str) -> Result<Self> {
        let column = self.metadata.column(property).cloned().ok_or_else(|| {
            DbError::Validation(format!(
                "'{}' has no column for property '{}'",
                self.metadata.target, property
            ))
        })?;
        self.diff_columns.push(column);
        Ok(self)
    }

    pub fn with_diff_relation(mut self, property: &str) -> Result<Self> {
        let relation = self.owning_relation(property)?;
        self.diff_relations.push(relation);
        Ok(self)
    }

    pub fn with_relation_update(
        mut self,
        property: &str,
        value: Option<EntityRef>,
    ) -> Result<Self> {
        let relation = self.owning_relation(property)?;
        self.relation_updates.push(RelationUpdate { relation, value });
        Ok(self)
    }

    pub fn with_junction_insert(mut self, property: &str, entities: Vec<EntityRef>) -> Result<Self> {
        let relation = self.many_to_many_relation(property)?;
        self.junction_inserts.push(JunctionInsert { relation, entities });
        Ok(self)
    }

    pub fn with_junction_remove(mut self, property: &str, related: Vec<RelatedRef>) -> Result<Self> {
        let relation = self.many_to_many_relation(property)?;
        self.junction_removes.push(JunctionRemove { relation, related });
        Ok(self)
    }

    fn owning_relation(&self, property: &str) -> Result<Arc<RelationMetadata>> {
        match self.metadata.relation(property) {
            Some(relation) if relation.join_column.is_some() => Ok(relation.clone()),
            Some(_) => Err(DbError::Validation(format!(
                "Relation '{}' of '{}' does not own a join column",
                property, self.metadata.target
            ))),
            None => Err(self.unknown_relation(property)),
        }
    }

    fn many_to_many_relation(&self, property: &str) -> Result<Arc<RelationMetadata>> {
        match self.metadata.relation(property) {
            Some(relation) if relation.junction.is_some() => Ok(relation.clone()),
            Some(_) => Err(DbError::Validation(format!(
                "Relation '{}' of '{}' is not many-to-many",
                property, self.metadata.target
            ))),
            None => Err(self.unknown_relation(property)),
        }
    }

    fn unknown_relation(&self, property: &str) -> DbError {
        DbError::Validation(format!(
            "'{}' has no relation '{}'",
            self.metadata.target, property
        ))
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn has_relation_updates(&self) -> bool {
        !self.relation_updates.is_empty()
    }

    pub fn has_junction_operations(&self) -> bool {
        !self.junction_inserts.is_empty() || !self.junction_removes.is_empty()
    }

    /// Whether the subject leads to at least one statement.
    pub fn is_executable(&self) -> bool {
        self.must_be_inserted
            || self.must_be_updated
            || self.must_be_removed
            || self.has_relation_updates()
            || self.has_junction_operations()
    }

    fn classification_count(&self) -> usize {
        [self.must_be_inserted, self.must_be_updated, self.must_be_removed]
            .into_iter()
            .filter(|flag| *flag)
            .count()
    }

    pub fn validate(&self) -> Result<()> {
        let target = &self.metadata.target;
        let has_diffs = !self.diff_columns.is_empty() || !self.diff_relations.is_empty();
        if has_diffs && self.classification_count() != 1 {
            return Err(DbError::Validation(format!(
                "Subject of '{}' carries diffs but is not classified exactly once",
                target
            )));
        }
        if (self.must_be_inserted || self.must_be_updated) && self.entity.is_none() {
            return Err(DbError::Validation(format!(
                "Subject of '{}' must be persisted but has no entity",
                target
            )));
        }
        if self.must_be_removed && self.identity().is_none() {
            return Err(DbError::Validation(format!(
                "Subject of '{}' must be removed but has no identity",
                target
            )));
        }
        if (self.has_relation_updates() || self.has_junction_operations())
            && self.entity.is_none()
            && self.database_entity.is_none()
        {
            return Err(DbError::Validation(format!(
                "Subject of '{}' has pending relation changes but no entity",
                target
            )));
        }
        let foreign = self
            .relation_updates
            .iter()
            .map(|update| &update.relation)
            .chain(self.junction_inserts.iter().map(|op| &op.relation))
            .chain(self.junction_removes.iter().map(|op| &op.relation))
            .find(|relation| {
                !self
                    .metadata
                    .all_relations()
                    .into_iter()
                    .any(|own| Arc::ptr_eq(own, *relation))
            });
        if let Some(relation) = foreign {
            return Err(DbError::Validation(format!(
                "Relation '{}' does not belong to '{}'",
                relation.property_name, target
            )));
        }
        Ok(())
    }

    pub fn newly_generated_id(&self) -> Option<&Value> {
        self.newly_generated_id.get()
    }

    pub fn generated_object_id(&self) -> Option<&Value> {
        self.generated_object_id.get()
    }

    pub fn parent_generated_id(&self) -> Option<&Value> {
        self.parent_generated_id.get()
    }

    pub fn tree_level(&self) -> Option<i64> {
        self.tree_level.get().copied()
    }

    pub(crate) fn set_newly_generated_id(&self, value: Value) -> Result<()> {
        set_once(&self.newly_generated_id, value, "generated id", &self.metadata.target)
    }

    pub(crate) fn set_generated_object_id(&self, value: Value) -> Result<()> {
        set_once(&self.generated_object_id, value, "object id", &self.metadata.target)
    }

    pub(crate) fn set_parent_generated_id(&self, value: Value) -> Result<()> {
        set_once(&self.parent_generated_id, value, "parent id", &self.metadata.target)
    }

    pub(crate) fn set_tree_level(&self, level: i64) -> Result<()> {
        set_once(&self.tree_level, level, "tree level", &self.metadata.target)
    }

    /// Value the insert phase produced for `column`, if any.
    pub fn generated_value(&self, column: &ColumnMetadata) -> Option<Value> {
        let in_parent_table = self
            .metadata
            .parent()
            .is_some_and(|parent| parent.table_name == column.table_name);
        if in_parent_table {
            if !column.primary && column.generated.is_none() {
                return None;
            }
            return self
                .parent_generated_id
                .get()
                .or_else(|| self.newly_generated_id.get())
                .cloned();
        }
        match column.mode {
            ColumnMode::ObjectId => self.generated_object_id.get().cloned(),
            ColumnMode::ParentId => self.parent_generated_id.get().cloned(),
            _ if column.generated.is_none() => None,
            // The parent id is authoritative; a child-table sequence value is not kept.
            _ if self.metadata.parent().is_some() && self.parent_generated_id.get().is_some() => {
                None
            }
            _ => self.newly_generated_id.get().cloned(),
        }
    }

    /// Value of `property` on the entity, else the value generated for it.
    pub fn resolved_value(&self, property: &PropertyPath) -> Option<Value> {
        if let Some(value) = self
            .entity
            .as_ref()
            .and_then(|entity| entity.value(property))
            .and_then(Value::non_null)
        {
            return Some(value);
        }
        self.metadata
            .all_columns()
            .into_iter()
            .chain(self.metadata.parent_id_columns.iter())
            .filter(|column| &column.property == property)
            .find_map(|column| self.generated_value(column))
    }

    /// Identity conditions of one physical table of this subject: snapshot
    /// first, then the live entity, then generated values.
    pub fn identity_for(&self, table: &EntityMetadata) -> Option<ValueMap> {
        let mut identity = ValueMap::new();
        for column in table.primary_columns() {
            let from = |entity: &Option<EntityRef>| {
                entity
                    .as_ref()
                    .and_then(|entity| column.value_of(entity))
                    .and_then(Value::non_null)
            };
            let value = from(&self.database_entity)
                .or_else(|| from(&self.entity))
                .or_else(|| self.generated_value(column))?;
            identity.insert(column.name.clone(), value);
        }
        (!identity.is_empty()).then_some(identity)
    }

    /// Identity conditions of the subject's own table.
    pub fn identity(&self) -> Option<ValueMap> {
        self.identity_for(&self.metadata)
    }

    /// Whether this subject describes `entity`.
    pub fn is_for(&self, entity: &EntityRef) -> bool {
        self.entity.as_ref().is_some_and(|own| own.ptr_eq(entity))
    }
}

fn set_once<T>(cell: &OnceLock<T>, value: T, what: &str, target: &str) -> Result<()> {
    cell.set(value).map_err(|_| {
        DbError::Internal(format!("{} of '{}' was already set", what, target))
    })
}

/// The insert subject of `entity` within the batch.
pub(crate) fn inserted_subject<'a>(subjects: &'a [Subject], entity: &EntityRef) -> Option<&'a Subject> {
    subjects
        .iter()
        .find(|subject| subject.must_be_inserted && subject.is_for(entity))
}

/// Referenced value of `related`: read from the entity itself or, when it is
/// being inserted in this batch, from its generated values.
pub(crate) fn related_id(
    subjects: &[Subject],
    related: &EntityRef,
    property: &PropertyPath,
) -> Option<Value> {
    if let Some(value) = related.value(property).and_then(Value::non_null) {
        return Some(value);
    }
    inserted_subject(subjects, related).and_then(|subject| subject.resolved_value(property))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnType;
    use crate::metadata::{Generation, MetadataRegistry};

    fn registry() -> MetadataRegistry {
        let id = || {
            ColumnMetadata::new("id", ColumnType::Integer)
                .primary()
                .generated(Generation::Increment)
        };
        MetadataRegistry::builder()
            .entity(
                EntityMetadata::builder("Content", "content")
                    .class_table_parent()
                    .column(id())
                    .column(ColumnMetadata::discriminator("type")),
            )
            .entity(
                EntityMetadata::builder("Photo", "photo")
                    .child_of("Content")
                    .column(ColumnMetadata::new("size", ColumnType::Integer)),
            )
            .entity(
                EntityMetadata::builder("Post", "post")
                    .column(id())
                    .column(ColumnMetadata::new("title", ColumnType::Text))
                    .relation(RelationMetadata::many_to_many_owner("tags", "Post")
                            .join_table("post_tags", "post_id", "tag_id"),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_generated_values_are_write_once() {
        let registry = registry();
        let subject = Subject::insert(registry.get("Post").unwrap(), EntityRef::new("Post"));
        subject.set_newly_generated_id(Value::Integer(7)).unwrap();
        let err = subject.set_newly_generated_id(Value::Integer(8)).unwrap_err();
        assert!(matches!(err, DbError::Internal(_)));
        assert_eq!(subject.newly_generated_id(), Some(&Value::Integer(7)));
        assert_eq!(
            subject.resolved_value(&PropertyPath::new("id")),
            Some(Value::Integer(7))
        );
    }

    #[test]
    fn test_child_identity_uses_parent_generated_id() {
        let registry = registry();
        let photo = registry.get("Photo").unwrap();
        let subject = Subject::insert(photo.clone(), EntityRef::new("Photo"));
        subject.set_parent_generated_id(Value::Integer(3)).unwrap();
        subject.set_newly_generated_id(Value::Integer(3)).unwrap();

        let child = subject.identity().unwrap();
        assert_eq!(child.get("id"), Some(&Value::Integer(3)));
        let parent = subject.identity_for(photo.parent().unwrap()).unwrap();
        assert_eq!(parent.get("id"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_validation_rules() {
        let registry = registry();
        let post = registry.get("Post").unwrap();

        let no_entity = Subject::new(post.clone(), None, None).with_diff_column("title").unwrap();
        assert!(matches!(no_entity.validate(), Err(DbError::Validation(_))));

        let no_identity = Subject::remove(post.clone(), EntityRef::new("Post"), None);
        assert!(matches!(no_identity.validate(), Err(DbError::Validation(_))));

        let mut twice = Subject::update(
            post.clone(),
            EntityRef::new("Post").with("id", 1i64),
            EntityRef::new("Post").with("id", 1i64),
        )
        .with_diff_column("title")
        .unwrap();
        twice.must_be_removed = true;
        assert!(matches!(twice.validate(), Err(DbError::Validation(_))));

        let removable = Subject::remove(post.clone(), EntityRef::new("Post").with("id", 1i64), None);
        assert!(removable.validate().is_ok());
    }

    #[test]
    fn test_relation_builders_check_relation_kind() {
        let registry = registry();
        let post = registry.get("Post").unwrap();
        let entity = EntityRef::new("Post").with("id", 1i64);

        assert!(matches!(
            Subject::new(post.clone(), Some(entity.clone()), None).with_relation_update("tags", None),
            Err(DbError::Validation(_))
        ));
        assert!(matches!(
            Subject::new(post.clone(), Some(entity.clone()), None).with_junction_insert("author", vec![]),
            Err(DbError::Validation(_))
        ));
        let subject = Subject::new(post, Some(entity), None)
            .with_junction_remove("tags", vec![RelatedRef::Id(Value::Integer(2))])
            .unwrap();
        assert!(subject.is_executable());
        assert!(subject.validate().is_ok());
    }
}
