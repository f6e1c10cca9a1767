use super::ColumnMetadata;
use crate::entity::PropertyPath;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    OneToMany,
    OneToOne { owner: bool },
    ManyToMany { owner: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cascade {
    pub insert: bool,
    pub update: bool,
    pub remove: bool,
}

impl Cascade {
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            remove: true,
        }
    }
}

/// Where the foreign key of a non-owning one-to-many / one-to-one relation
/// physically lives.
#[derive(Debug, Clone)]
pub struct InverseJoin {
    pub table_name: String,
    pub join_column: Arc<ColumnMetadata>,
    /// Property on this side the join column stores.
    pub referenced_property: PropertyPath,
    /// Identity columns of the inverse table.
    pub primary_columns: Vec<Arc<ColumnMetadata>>,
}

/// Junction table of a many-to-many relation, described from the owning side.
#[derive(Debug, Clone)]
pub struct JunctionTableMetadata {
    pub table_name: String,
    pub owner_column: Arc<ColumnMetadata>,
    pub owner_referenced: PropertyPath,
    pub inverse_column: Arc<ColumnMetadata>,
    pub inverse_referenced: PropertyPath,
}

#[derive(Debug, Clone)]
pub struct RelationMetadata {
    pub property_name: String,
    pub kind: RelationKind,
    pub target: String,
    pub inverse_property: Option<String>,
    pub cascade: Cascade,
    /// Property of the target the relation points at (its primary key unless
    /// configured otherwise).
    pub referenced_property: PropertyPath,
    /// Present on owning many-to-one / one-to-one relations.
    pub join_column: Option<Arc<ColumnMetadata>>,
    /// Present on non-owning one-to-many / one-to-one relations.
    pub inverse_join: Option<InverseJoin>,
    /// Present on both sides of a many-to-many relation.
    pub junction: Option<JunctionTableMetadata>,
}

impl RelationMetadata {
    pub fn many_to_one(property: &str, target: &str) -> RelationBuilder {
        RelationBuilder::new(property, target, RelationKind::ManyToOne)
    }

    pub fn one_to_many(property: &str, target: &str, inverse: &str) -> RelationBuilder {
        RelationBuilder::new(property, target, RelationKind::OneToMany).inverse(inverse)
    }

    pub fn one_to_one_owner(property: &str, target: &str) -> RelationBuilder {
        RelationBuilder::new(property, target, RelationKind::OneToOne { owner: true })
    }

    pub fn one_to_one_inverse(property: &str, target: &str, inverse: &str) -> RelationBuilder {
        RelationBuilder::new(property, target, RelationKind::OneToOne { owner: false })
            .inverse(inverse)
    }

    pub fn many_to_many_owner(property: &str, target: &str) -> RelationBuilder {
        RelationBuilder::new(property, target, RelationKind::ManyToMany { owner: true })
    }

    pub fn many_to_many_inverse(property: &str, target: &str, inverse: &str) -> RelationBuilder {
        RelationBuilder::new(property, target, RelationKind::ManyToMany { owner: false })
            .inverse(inverse)
    }

    /// The side whose table (or junction entry) physically stores the link.
    pub fn is_owning(&self) -> bool {
        match self.kind {
            RelationKind::ManyToOne => true,
            RelationKind::OneToMany => false,
            RelationKind::OneToOne { owner } | RelationKind::ManyToMany { owner } => owner,
        }
    }

    pub fn is_many_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::ManyToMany { .. })
    }

    pub fn is_nullable(&self) -> bool {
        self.join_column.as_ref().is_none_or(|column| column.nullable)
    }
}

/// Relation as declared, before the registry resolves join columns, inverse
/// joins and junction tables.
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    pub(crate) property_name: String,
    pub(crate) kind: RelationKind,
    pub(crate) target: String,
    pub(crate) inverse_property: Option<String>,
    pub(crate) cascade: Cascade,
    pub(crate) referenced_property: Option<String>,
    pub(crate) join_column_name: Option<String>,
    pub(crate) nullable: bool,
    pub(crate) join_table: Option<JoinTableSpec>,
}

#[derive(Debug, Clone)]
pub(crate) struct JoinTableSpec {
    pub(crate) table_name: String,
    pub(crate) owner_column: String,
    pub(crate) inverse_column: String,
}

impl RelationBuilder {
    fn new(property: &str, target: &str, kind: RelationKind) -> Self {
        Self {
            property_name: property.to_string(),
            kind,
            target: target.to_string(),
            inverse_property: None,
            cascade: Cascade::default(),
            referenced_property: None,
            join_column_name: None,
            nullable: true,
            join_table: None,
        }
    }

    pub fn inverse(mut self, property: &str) -> Self {
        self.inverse_property = Some(property.to_string());
        self
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    /// Target property the join column stores; defaults to the target's
    /// first primary column.
    pub fn references(mut self, property: &str) -> Self {
        self.referenced_property = Some(property.to_string());
        self
    }

    pub fn join_column(mut self, name: &str) -> Self {
        self.join_column_name = Some(name.to_string());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn join_table(mut self, table: &str, owner_column: &str, inverse_column: &str) -> Self {
        self.join_table = Some(JoinTableSpec {
            table_name: table.to_string(),
            owner_column: owner_column.to_string(),
            inverse_column: inverse_column.to_string(),
        });
        self
    }

    pub(crate) fn has_join_column(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::ManyToOne | RelationKind::OneToOne { owner: true }
        )
    }

    pub(crate) fn join_column_name(&self) -> String {
        self.join_column_name
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.property_name))
    }
}
