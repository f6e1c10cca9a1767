use crate::core::{ColumnType, Value};
use crate::entity::{EntityRef, PropertyPath};

/// Role a column plays when rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMode {
    Regular,
    CreateDate,
    UpdateDate,
    Version,
    Discriminator,
    TreeLevel,
    /// Child-table copy of a parent primary key (class-table inheritance).
    ParentId,
    ObjectId,
    /// Mapped on the entity but never written.
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Increment,
    Uuid,
}

#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    pub name: String,
    pub property: PropertyPath,
    pub column_type: ColumnType,
    pub mode: ColumnMode,
    pub primary: bool,
    pub nullable: bool,
    pub generated: Option<Generation>,
    /// Physical table the column is stored in. Set when the registry links
    /// metadata; empty before that.
    pub table_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            property: PropertyPath::new(name.clone()),
            name,
            column_type,
            mode: ColumnMode::Regular,
            primary: false,
            nullable: true,
            generated: None,
            table_name: String::new(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    pub fn generated(mut self, generation: Generation) -> Self {
        self.generated = Some(generation);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Maps the column to a property whose name differs from the column name.
    pub fn property(mut self, name: &str) -> Self {
        self.property = PropertyPath::parse(name);
        self
    }

    pub fn mode(mut self, mode: ColumnMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn create_date(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Timestamp).mode(ColumnMode::CreateDate).not_null()
    }

    pub fn update_date(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Timestamp).mode(ColumnMode::UpdateDate).not_null()
    }

    pub fn version(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer).mode(ColumnMode::Version).not_null()
    }

    pub fn discriminator(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text).mode(ColumnMode::Discriminator).not_null()
    }

    pub fn tree_level(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer).mode(ColumnMode::TreeLevel)
    }

    pub fn object_id(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Uuid)
            .mode(ColumnMode::ObjectId)
            .primary()
            .generated(Generation::Uuid)
    }

    pub fn value_of(&self, entity: &EntityRef) -> Option<Value> {
        entity.value(&self.property)
    }

    /// Columns whose values come from the entity as-is on insert.
    pub fn is_written_from_entity(&self) -> bool {
        matches!(self.mode, ColumnMode::Regular | ColumnMode::ObjectId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_builders() {
        let id = ColumnMetadata::new("id", ColumnType::Integer)
            .primary()
            .generated(Generation::Increment);
        assert!(id.primary && !id.nullable);
        assert_eq!(id.generated, Some(Generation::Increment));

        let likes = ColumnMetadata::new("likes_count", ColumnType::Integer).property("likes");
        assert_eq!(likes.property.to_string(), "likes");

        assert!(!ColumnMetadata::version("version").is_written_from_entity());
        assert!(ColumnMetadata::object_id("_id").is_written_from_entity());
    }
}
