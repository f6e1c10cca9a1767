//! Read-only description of how entities map onto tables.
//!
//! Metadata is declared with [`EntityMetadata::builder`] and linked by
//! [`MetadataRegistry`], which resolves every cross-entity reference once
//! (physical table of each column, join column types, inverse joins,
//! junction tables, class-table parents). Nothing is looked up by name while
//! a unit of work executes.

mod column;
mod registry;
mod relation;

pub use column::{ColumnMetadata, ColumnMode, Generation};
pub use registry::{MetadataRegistry, MetadataRegistryBuilder};
pub use relation::{
    Cascade, InverseJoin, JunctionTableMetadata, RelationBuilder, RelationKind, RelationMetadata,
};

use crate::entity::PropertyPath;
use std::sync::Arc;

pub const CLOSURE_ANCESTOR_COLUMN: &str = "ancestor";
pub const CLOSURE_DESCENDANT_COLUMN: &str = "descendant";
pub const CLOSURE_LEVEL_COLUMN: &str = "level";

/// Table layout of an entity.
#[derive(Debug, Clone)]
pub enum Inheritance {
    Simple,
    /// Root of a class-table hierarchy; lists the targets stored in child tables.
    ParentOf { children: Vec<String> },
    /// Stored across the parent's table and its own.
    ChildOf(Arc<EntityMetadata>),
}

#[derive(Debug, Clone)]
pub struct ClosureTableMetadata {
    pub table_name: String,
    /// Many-to-one relation to the parent node.
    pub parent_relation: String,
    /// One-to-many relation to the child nodes, when declared.
    pub children_relation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddedMetadata {
    pub property: PropertyPath,
    pub columns: Vec<Arc<ColumnMetadata>>,
    pub embeddeds: Vec<EmbeddedMetadata>,
}

#[derive(Debug)]
pub struct EntityMetadata {
    pub target: String,
    pub table_name: String,
    /// Columns of this entity's own table, embedded columns flattened in.
    pub columns: Vec<Arc<ColumnMetadata>>,
    pub embeddeds: Vec<EmbeddedMetadata>,
    /// Child-table columns holding the parent primary key; empty unless
    /// `inheritance` is `ChildOf`.
    pub parent_id_columns: Vec<Arc<ColumnMetadata>>,
    /// Relations declared on this entity (parent relations excluded).
    pub relations: Vec<Arc<RelationMetadata>>,
    pub inheritance: Inheritance,
    pub discriminator_value: Option<String>,
    pub closure: Option<ClosureTableMetadata>,
}

impl EntityMetadata {
    pub fn builder(target: &str, table_name: &str) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            target: target.to_string(),
            table_name: table_name.to_string(),
            columns: Vec::new(),
            embeddeds: Vec::new(),
            relations: Vec::new(),
            inheritance: InheritanceSpec::Simple,
            discriminator_value: None,
            closure: None,
        }
    }

    pub fn parent(&self) -> Option<&Arc<EntityMetadata>> {
        match &self.inheritance {
            Inheritance::ChildOf(parent) => Some(parent),
            _ => None,
        }
    }

    /// Identity columns of this entity's own table.
    pub fn primary_columns(&self) -> impl Iterator<Item = &Arc<ColumnMetadata>> {
        self.columns
            .iter()
            .filter(|column| column.primary)
            .chain(self.parent_id_columns.iter())
    }

    /// Primary columns across both tables of the logical entity, parent first.
    pub fn identity_columns(&self) -> Vec<&Arc<ColumnMetadata>> {
        let mut columns: Vec<&Arc<ColumnMetadata>> = Vec::new();
        if let Some(parent) = self.parent() {
            columns.extend(parent.primary_columns());
        }
        columns.extend(self.columns.iter().filter(|column| column.primary));
        columns
    }

    /// Columns of the logical entity, parent table first.
    pub fn all_columns(&self) -> Vec<&Arc<ColumnMetadata>> {
        let mut columns: Vec<&Arc<ColumnMetadata>> = Vec::new();
        if let Some(parent) = self.parent() {
            columns.extend(parent.columns.iter());
        }
        columns.extend(self.columns.iter());
        columns
    }

    /// Relations of the logical entity, parent table first.
    pub fn all_relations(&self) -> Vec<&Arc<RelationMetadata>> {
        let mut relations: Vec<&Arc<RelationMetadata>> = Vec::new();
        if let Some(parent) = self.parent() {
            relations.extend(parent.relations.iter());
        }
        relations.extend(self.relations.iter());
        relations
    }

    pub fn relation(&self, property: &str) -> Option<&Arc<RelationMetadata>> {
        self.all_relations()
            .into_iter()
            .find(|relation| relation.property_name == property)
    }

    pub fn column(&self, property: &str) -> Option<&Arc<ColumnMetadata>> {
        let path = PropertyPath::parse(property);
        self.all_columns()
            .into_iter()
            .find(|column| column.property == path)
    }

    /// First own-table column with the given mode.
    pub fn column_with_mode(&self, mode: ColumnMode) -> Option<&Arc<ColumnMetadata>> {
        self.columns.iter().find(|column| column.mode == mode)
    }

    pub fn generated_column(&self) -> Option<&Arc<ColumnMetadata>> {
        self.columns
            .iter()
            .find(|column| column.generated.is_some() && column.mode != ColumnMode::ObjectId)
    }

    pub fn object_id_column(&self) -> Option<&Arc<ColumnMetadata>> {
        self.column_with_mode(ColumnMode::ObjectId)
    }

    /// Column whose value the query runner generates on insert into this table.
    pub fn insert_generated_column(&self) -> Option<&Arc<ColumnMetadata>> {
        self.object_id_column().or_else(|| self.generated_column())
    }

    pub fn tree_level_column(&self) -> Option<&Arc<ColumnMetadata>> {
        self.all_columns()
            .into_iter()
            .find(|column| column.mode == ColumnMode::TreeLevel)
    }

    /// Whether any relation of the logical entity must be written non-null.
    pub fn has_non_nullable_relations(&self) -> bool {
        self.all_relations()
            .iter()
            .any(|relation| relation.join_column.is_some() && !relation.is_nullable())
    }

    /// Metadata describing the physical table `table_name`: this entity's own
    /// table or its class-table parent's.
    pub fn table_metadata(&self, table_name: &str) -> Option<&EntityMetadata> {
        if self.table_name == table_name {
            return Some(self);
        }
        self.parent()
            .filter(|parent| parent.table_name == table_name)
            .map(|parent| &**parent)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum InheritanceSpec {
    Simple,
    Parent,
    Child(String),
}

/// Declaration of one entity, linked by [`MetadataRegistry::builder`].
#[derive(Debug, Clone)]
pub struct EntityMetadataBuilder {
    pub(crate) target: String,
    pub(crate) table_name: String,
    pub(crate) columns: Vec<ColumnMetadata>,
    pub(crate) embeddeds: Vec<EmbeddedBuilder>,
    pub(crate) relations: Vec<RelationBuilder>,
    pub(crate) inheritance: InheritanceSpec,
    pub(crate) discriminator_value: Option<String>,
    pub(crate) closure: Option<ClosureTableMetadata>,
}

impl EntityMetadataBuilder {
    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    pub fn embedded(mut self, embedded: EmbeddedBuilder) -> Self {
        self.embeddeds.push(embedded);
        self
    }

    pub fn relation(mut self, relation: RelationBuilder) -> Self {
        self.relations.push(relation);
        self
    }

    /// Marks the entity as the root of a class-table hierarchy.
    pub fn class_table_parent(mut self) -> Self {
        self.inheritance = InheritanceSpec::Parent;
        self
    }

    /// Stores the entity across `parent`'s table and its own.
    pub fn child_of(mut self, parent: &str) -> Self {
        self.inheritance = InheritanceSpec::Child(parent.to_string());
        self
    }

    pub fn discriminator_value(mut self, value: &str) -> Self {
        self.discriminator_value = Some(value.to_string());
        self
    }

    pub fn closure_table(
        mut self,
        table_name: &str,
        parent_relation: &str,
        children_relation: Option<&str>,
    ) -> Self {
        self.closure = Some(ClosureTableMetadata {
            table_name: table_name.to_string(),
            parent_relation: parent_relation.to_string(),
            children_relation: children_relation.map(str::to_string),
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedBuilder {
    pub(crate) property: String,
    pub(crate) columns: Vec<ColumnMetadata>,
    pub(crate) embeddeds: Vec<EmbeddedBuilder>,
}

impl EmbeddedBuilder {
    pub fn new(property: &str) -> Self {
        Self {
            property: property.to_string(),
            columns: Vec::new(),
            embeddeds: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    pub fn embedded(mut self, embedded: EmbeddedBuilder) -> Self {
        self.embeddeds.push(embedded);
        self
    }
}
