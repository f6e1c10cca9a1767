use super::relation::{JoinTableSpec, RelationBuilder};
use super::{
    ColumnMetadata, ColumnMode, EmbeddedBuilder, EmbeddedMetadata, EntityMetadata,
    EntityMetadataBuilder, Inheritance, InheritanceSpec, InverseJoin, JunctionTableMetadata,
    RelationKind, RelationMetadata,
};
use crate::core::{ColumnType, DbError, Result};
use crate::entity::PropertyPath;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Linked metadata of every known entity, keyed by target name.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entities: BTreeMap<String, Arc<EntityMetadata>>,
}

impl MetadataRegistry {
    pub fn builder() -> MetadataRegistryBuilder {
        MetadataRegistryBuilder::default()
    }

    pub fn get(&self, target: &str) -> Result<Arc<EntityMetadata>> {
        self.entities
            .get(target)
            .cloned()
            .ok_or_else(|| DbError::Metadata(format!("No metadata registered for '{}'", target)))
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct MetadataRegistryBuilder {
    entities: Vec<EntityMetadataBuilder>,
}

/// Columns of one physical table after embedded flattening.
struct TableLayout {
    columns: Vec<Arc<ColumnMetadata>>,
    embeddeds: Vec<EmbeddedMetadata>,
    parent_id_columns: Vec<Arc<ColumnMetadata>>,
}

impl MetadataRegistryBuilder {
    pub fn entity(mut self, entity: EntityMetadataBuilder) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<MetadataRegistry> {
        let mut declared: BTreeMap<String, EntityMetadataBuilder> = BTreeMap::new();
        for entity in self.entities {
            if declared.contains_key(&entity.target) {
                return Err(DbError::Metadata(format!(
                    "Entity '{}' is declared twice",
                    entity.target
                )));
            }
            declared.insert(entity.target.clone(), entity);
        }

        let mut children_of: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entity in declared.values() {
            if let InheritanceSpec::Child(parent) = &entity.inheritance {
                match declared.get(parent).map(|p| &p.inheritance) {
                    Some(InheritanceSpec::Parent) => {}
                    Some(_) => {
                        return Err(DbError::Metadata(format!(
                            "'{}' extends '{}', which is not a class-table parent",
                            entity.target, parent
                        )));
                    }
                    None => {
                        return Err(DbError::Metadata(format!(
                            "'{}' extends unknown entity '{}'",
                            entity.target, parent
                        )));
                    }
                }
                children_of
                    .entry(parent.clone())
                    .or_default()
                    .push(entity.target.clone());
            }
        }

        // Parents before children: a child's layout and metadata need the parent's.
        let (children, roots): (Vec<&EntityMetadataBuilder>, Vec<&EntityMetadataBuilder>) = declared
            .values()
            .partition(|entity| matches!(entity.inheritance, InheritanceSpec::Child(_)));
        let order: Vec<&EntityMetadataBuilder> = roots.into_iter().chain(children).collect();

        let mut layouts: BTreeMap<String, TableLayout> = BTreeMap::new();
        for entity in &order {
            let parent_layout = match &entity.inheritance {
                InheritanceSpec::Child(parent) => layouts.get(parent),
                _ => None,
            };
            let layout = build_layout(entity, parent_layout);
            if !layout.columns.iter().any(|c| c.primary) && layout.parent_id_columns.is_empty() {
                return Err(DbError::Metadata(format!(
                    "Entity '{}' has no primary column",
                    entity.target
                )));
            }
            layouts.insert(entity.target.clone(), layout);
        }

        let linker = Linker {
            declared: &declared,
            layouts: &layouts,
        };
        let mut relations: BTreeMap<String, Vec<Arc<RelationMetadata>>> = BTreeMap::new();
        for entity in &order {
            let linked = entity
                .relations
                .iter()
                .map(|relation| linker.link_relation(entity, relation).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;
            validate_closure(entity)?;
            relations.insert(entity.target.clone(), linked);
        }

        let mut entities: BTreeMap<String, Arc<EntityMetadata>> = BTreeMap::new();
        for entity in order {
            let inheritance = match &entity.inheritance {
                InheritanceSpec::Simple => Inheritance::Simple,
                InheritanceSpec::Parent => Inheritance::ParentOf {
                    children: children_of.remove(&entity.target).unwrap_or_default(),
                },
                InheritanceSpec::Child(parent) => {
                    let parent = entities.get(parent).cloned().ok_or_else(|| {
                        DbError::Metadata(format!("Parent '{}' was not linked", parent))
                    })?;
                    Inheritance::ChildOf(parent)
                }
            };
            let layout = layouts.remove(&entity.target).ok_or_else(|| {
                DbError::Metadata(format!("Layout of '{}' missing", entity.target))
            })?;
            let metadata = EntityMetadata {
                target: entity.target.clone(),
                table_name: entity.table_name.clone(),
                columns: layout.columns,
                embeddeds: layout.embeddeds,
                parent_id_columns: layout.parent_id_columns,
                relations: relations.remove(&entity.target).unwrap_or_default(),
                inheritance,
                discriminator_value: entity
                    .discriminator_value
                    .clone()
                    .or_else(|| Some(entity.target.clone())),
                closure: entity.closure.clone(),
            };
            entities.insert(entity.target.clone(), Arc::new(metadata));
        }

        Ok(MetadataRegistry { entities })
    }
}

fn build_layout(entity: &EntityMetadataBuilder, parent: Option<&TableLayout>) -> TableLayout {
    let mut columns: Vec<Arc<ColumnMetadata>> = entity
        .columns
        .iter()
        .map(|column| Arc::new(in_table(column.clone(), &entity.table_name)))
        .collect();

    let mut embeddeds = Vec::new();
    for embedded in &entity.embeddeds {
        let built = build_embedded(embedded, None, &entity.table_name);
        collect_embedded_columns(&built, &mut columns);
        embeddeds.push(built);
    }

    let parent_id_columns = parent
        .map(|layout| {
            layout
                .columns
                .iter()
                .filter(|column| column.primary)
                .map(|column| {
                    let mut copy = in_table((**column).clone(), &entity.table_name);
                    copy.mode = ColumnMode::ParentId;
                    copy.generated = None;
                    copy.nullable = false;
                    Arc::new(copy)
                })
                .collect()
        })
        .unwrap_or_default();

    TableLayout {
        columns,
        embeddeds,
        parent_id_columns,
    }
}

fn in_table(mut column: ColumnMetadata, table_name: &str) -> ColumnMetadata {
    column.table_name = table_name.to_string();
    column
}

fn build_embedded(
    embedded: &EmbeddedBuilder,
    prefix: Option<&PropertyPath>,
    table_name: &str,
) -> EmbeddedMetadata {
    let own = PropertyPath::new(embedded.property.clone());
    let property = match prefix {
        Some(prefix) => own.prefixed(prefix),
        None => own,
    };
    let columns = embedded
        .columns
        .iter()
        .map(|column| {
            let mut column = in_table(column.clone(), table_name);
            column.property = column.property.prefixed(&property);
            Arc::new(column)
        })
        .collect();
    let embeddeds = embedded
        .embeddeds
        .iter()
        .map(|nested| build_embedded(nested, Some(&property), table_name))
        .collect();
    EmbeddedMetadata {
        property,
        columns,
        embeddeds,
    }
}

fn collect_embedded_columns(embedded: &EmbeddedMetadata, out: &mut Vec<Arc<ColumnMetadata>>) {
    out.extend(embedded.columns.iter().cloned());
    for nested in &embedded.embeddeds {
        collect_embedded_columns(nested, out);
    }
}

fn validate_closure(entity: &EntityMetadataBuilder) -> Result<()> {
    let Some(closure) = &entity.closure else {
        return Ok(());
    };
    let self_relation = |name: &str, kind: RelationKind| {
        entity
            .relations
            .iter()
            .any(|r| r.property_name == name && r.kind == kind && r.target == entity.target)
    };
    if !self_relation(&closure.parent_relation, RelationKind::ManyToOne) {
        return Err(DbError::Metadata(format!(
            "Closure entity '{}' needs a many-to-one '{}' relation to itself",
            entity.target, closure.parent_relation
        )));
    }
    if let Some(children) = &closure.children_relation {
        if !self_relation(children, RelationKind::OneToMany) {
            return Err(DbError::Metadata(format!(
                "Closure entity '{}' needs a one-to-many '{}' relation to itself",
                entity.target, children
            )));
        }
    }
    Ok(())
}

struct Linker<'a> {
    declared: &'a BTreeMap<String, EntityMetadataBuilder>,
    layouts: &'a BTreeMap<String, TableLayout>,
}

impl Linker<'_> {
    fn declared(&self, target: &str) -> Result<&EntityMetadataBuilder> {
        self.declared
            .get(target)
            .ok_or_else(|| DbError::Metadata(format!("Relation to unknown entity '{}'", target)))
    }

    fn parent_of(&self, target: &str) -> Option<&str> {
        match &self.declared.get(target)?.inheritance {
            InheritanceSpec::Child(parent) => Some(parent.as_str()),
            _ => None,
        }
    }

    /// Column of the logical entity `target` mapped to `property`.
    fn logical_column(&self, target: &str, property: &PropertyPath) -> Option<&Arc<ColumnMetadata>> {
        let own = self
            .layouts
            .get(target)?
            .columns
            .iter()
            .find(|column| &column.property == property);
        own.or_else(|| {
            let parent = self.parent_of(target)?;
            self.logical_column(parent, property)
        })
    }

    /// First identity column of `target`; the parent's for class-table children.
    fn first_identity(&self, target: &str) -> Result<(PropertyPath, ColumnType)> {
        if let Some(parent) = self.parent_of(target) {
            return self.first_identity(parent);
        }
        self.layouts
            .get(target)
            .and_then(|layout| layout.columns.iter().find(|column| column.primary))
            .map(|column| (column.property.clone(), column.column_type))
            .ok_or_else(|| DbError::Metadata(format!("Entity '{}' has no primary column", target)))
    }

    fn referenced(&self, relation: &RelationBuilder) -> Result<(PropertyPath, ColumnType)> {
        let Some(property) = &relation.referenced_property else {
            return self.first_identity(&relation.target);
        };
        let path = PropertyPath::parse(property);
        let column = self.logical_column(&relation.target, &path).ok_or_else(|| {
            DbError::Metadata(format!(
                "Relation '{}' references unknown property '{}' of '{}'",
                relation.property_name, property, relation.target
            ))
        })?;
        Ok((path, column.column_type))
    }

    fn table_primary_columns(&self, target: &str) -> Vec<Arc<ColumnMetadata>> {
        self.layouts
            .get(target)
            .map(|layout| {
                layout
                    .columns
                    .iter()
                    .filter(|column| column.primary)
                    .chain(layout.parent_id_columns.iter())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Relation `name` declared on `target` or on its class-table parent,
    /// together with the entity declaring it.
    fn find_declared_relation(
        &self,
        target: &str,
        name: &str,
    ) -> Option<(&EntityMetadataBuilder, &RelationBuilder)> {
        let entity = self.declared.get(target)?;
        if let Some(relation) = entity.relations.iter().find(|r| r.property_name == name) {
            return Some((entity, relation));
        }
        let parent = self.parent_of(target)?;
        self.find_declared_relation(parent, name)
    }

    fn join_column(
        &self,
        owner: &EntityMetadataBuilder,
        relation: &RelationBuilder,
    ) -> Result<Arc<ColumnMetadata>> {
        let (_, column_type) = self.referenced(relation)?;
        let mut column = ColumnMetadata::new(relation.join_column_name(), column_type)
            .property(&relation.property_name);
        column.nullable = relation.nullable;
        Ok(Arc::new(in_table(column, &owner.table_name)))
    }

    fn junction(
        &self,
        owner: &EntityMetadataBuilder,
        relation: &RelationBuilder,
    ) -> Result<JunctionTableMetadata> {
        let target = self.declared(&relation.target)?;
        let (owner_referenced, owner_type) = self.first_identity(&owner.target)?;
        let (inverse_referenced, inverse_type) = self.referenced(relation)?;
        let spec = relation.join_table.clone().unwrap_or_else(|| JoinTableSpec {
            table_name: format!(
                "{}_{}_{}",
                owner.table_name, relation.property_name, target.table_name
            ),
            owner_column: format!("{}_{}", owner.table_name, owner_referenced),
            inverse_column: format!("{}_{}", target.table_name, inverse_referenced),
        });
        let column = |name: &str, column_type: ColumnType| {
            Arc::new(in_table(
                ColumnMetadata::new(name, column_type).not_null(),
                &spec.table_name,
            ))
        };
        Ok(JunctionTableMetadata {
            owner_column: column(&spec.owner_column, owner_type),
            inverse_column: column(&spec.inverse_column, inverse_type),
            table_name: spec.table_name.clone(),
            owner_referenced,
            inverse_referenced,
        })
    }

    fn inverse_of(&self, relation: &RelationBuilder) -> Result<(&EntityMetadataBuilder, &RelationBuilder)> {
        let name = relation.inverse_property.as_deref().ok_or_else(|| {
            DbError::Metadata(format!(
                "Relation '{}' needs an inverse side",
                relation.property_name
            ))
        })?;
        self.find_declared_relation(&relation.target, name)
            .ok_or_else(|| {
                DbError::Metadata(format!(
                    "Inverse relation '{}' not found on '{}'",
                    name, relation.target
                ))
            })
    }

    fn link_relation(
        &self,
        owner: &EntityMetadataBuilder,
        relation: &RelationBuilder,
    ) -> Result<RelationMetadata> {
        self.declared(&relation.target)?;
        let (referenced_property, _) = self.referenced(relation)?;

        let join_column = if relation.has_join_column() {
            Some(self.join_column(owner, relation)?)
        } else {
            None
        };

        let inverse_join = match relation.kind {
            RelationKind::OneToMany | RelationKind::OneToOne { owner: false } => {
                let (declaring, inverse) = self.inverse_of(relation)?;
                if !inverse.has_join_column() {
                    return Err(DbError::Metadata(format!(
                        "Inverse relation '{}' of '{}' does not own a join column",
                        inverse.property_name, relation.property_name
                    )));
                }
                let (inverse_referenced, _) = self.referenced(inverse)?;
                Some(InverseJoin {
                    table_name: declaring.table_name.clone(),
                    join_column: self.join_column(declaring, inverse)?,
                    referenced_property: inverse_referenced,
                    primary_columns: self.table_primary_columns(&declaring.target),
                })
            }
            _ => None,
        };

        let junction = match relation.kind {
            RelationKind::ManyToMany { owner: true } => Some(self.junction(owner, relation)?),
            RelationKind::ManyToMany { owner: false } => {
                let (declaring, inverse) = self.inverse_of(relation)?;
                if inverse.kind != (RelationKind::ManyToMany { owner: true }) {
                    return Err(DbError::Metadata(format!(
                        "Inverse relation '{}' of '{}' is not an owning many-to-many",
                        inverse.property_name, relation.property_name
                    )));
                }
                Some(self.junction(declaring, inverse)?)
            }
            _ => None,
        };

        Ok(RelationMetadata {
            property_name: relation.property_name.clone(),
            kind: relation.kind,
            target: relation.target.clone(),
            inverse_property: relation.inverse_property.clone(),
            cascade: relation.cascade,
            referenced_property,
            join_column,
            inverse_join,
            junction,
        })
    }
}
