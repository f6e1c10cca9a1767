//! Caller-owned domain objects.
//!
//! An [`EntityRef`] is a shared handle to a property bag. The engine never
//! owns entities: subjects, relation pointers and junction links all hold
//! clones of the same handle, and "the same entity" always means the same
//! handle ([`EntityRef::ptr_eq`]). Generated values are written back through
//! the handle once a unit of work has committed.

mod path;

pub use path::PropertyPath;

use crate::core::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type PropertyMap = BTreeMap<String, Property>;

#[derive(Debug, Clone)]
pub enum Property {
    Value(Value),
    /// Nested value object whose columns live in the owner's row.
    Embedded(PropertyMap),
    /// Single-valued relation. `None` is an explicit null pointer.
    One(Option<EntityRef>),
    Many(Vec<EntityRef>),
}

struct EntityState {
    target: String,
    properties: PropertyMap,
}

#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<EntityState>>);

impl EntityRef {
    pub fn new(target: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(EntityState {
            target: target.into(),
            properties: PropertyMap::new(),
        })))
    }

    /// Sets a scalar property; dotted paths create embedded objects on the way.
    pub fn with(self, path: &str, value: impl Into<Value>) -> Self {
        self.set_value(&PropertyPath::parse(path), value.into());
        self
    }

    pub fn with_relation(self, name: &str, related: &EntityRef) -> Self {
        self.set_relation(name, Some(related.clone()));
        self
    }

    pub fn with_null_relation(self, name: &str) -> Self {
        self.set_relation(name, None);
        self
    }

    pub fn with_collection(self, name: &str, items: Vec<EntityRef>) -> Self {
        self.write()
            .properties
            .insert(name.to_string(), Property::Many(items));
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, EntityState> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn target(&self) -> String {
        self.read().target.clone()
    }

    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Scalar value at `path`. `None` means the property is not set at all,
    /// `Some(Value::Null)` means it is explicitly null.
    pub fn value(&self, path: &PropertyPath) -> Option<Value> {
        let state = self.read();
        match lookup(&state.properties, path.segments())? {
            Property::Value(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set_value(&self, path: &PropertyPath, value: Value) {
        let mut state = self.write();
        let Some((last, parents)) = path.segments().split_last() else {
            return;
        };
        let mut map = &mut state.properties;
        for segment in parents {
            let entry = map
                .entry(segment.clone())
                .or_insert_with(|| Property::Embedded(PropertyMap::new()));
            if !matches!(entry, Property::Embedded(_)) {
                *entry = Property::Embedded(PropertyMap::new());
            }
            let Property::Embedded(inner) = entry else {
                return;
            };
            map = inner;
        }
        map.insert(last.clone(), Property::Value(value));
    }

    /// Removes the property at `path`, leaving it undefined.
    pub fn unset(&self, path: &PropertyPath) {
        let mut state = self.write();
        let Some((last, parents)) = path.segments().split_last() else {
            return;
        };
        let mut map = &mut state.properties;
        for segment in parents {
            match map.get_mut(segment) {
                Some(Property::Embedded(inner)) => map = inner,
                _ => return,
            }
        }
        map.remove(last);
    }

    /// Whether an embedded object is present at `path`.
    pub fn has_embedded(&self, path: &PropertyPath) -> bool {
        let state = self.read();
        matches!(
            lookup(&state.properties, path.segments()),
            Some(Property::Embedded(_))
        )
    }

    /// Single-valued relation. Outer `None`: property not set; inner `None`:
    /// explicit null pointer.
    pub fn relation(&self, name: &str) -> Option<Option<EntityRef>> {
        match self.read().properties.get(name)? {
            Property::One(related) => Some(related.clone()),
            _ => None,
        }
    }

    /// Convenience over [`relation`](Self::relation) for the common "is there
    /// a related entity" check.
    pub fn related(&self, name: &str) -> Option<EntityRef> {
        self.relation(name).flatten()
    }

    pub fn set_relation(&self, name: &str, related: Option<EntityRef>) {
        self.write()
            .properties
            .insert(name.to_string(), Property::One(related));
    }

    pub fn collection(&self, name: &str) -> Vec<EntityRef> {
        match self.read().properties.get(name) {
            Some(Property::Many(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    pub fn push_to_collection(&self, name: &str, item: EntityRef) {
        let mut state = self.write();
        let entry = state
            .properties
            .entry(name.to_string())
            .or_insert_with(|| Property::Many(Vec::new()));
        match entry {
            Property::Many(items) => items.push(item),
            other => *other = Property::Many(vec![item]),
        }
    }

    /// Whether the property named `name` holds either a single pointer to
    /// `other` or a collection containing it.
    pub fn points_at(&self, name: &str, other: &EntityRef) -> bool {
        match self.read().properties.get(name) {
            Some(Property::One(Some(related))) => related.ptr_eq(other),
            Some(Property::Many(items)) => items.iter().any(|item| item.ptr_eq(other)),
            _ => false,
        }
    }

    /// Copy of the current state as a new, unrelated handle. Scalar and
    /// embedded values are copied; relation pointers still refer to the
    /// same related handles.
    pub fn snapshot(&self) -> EntityRef {
        let state = self.read();
        EntityRef(Arc::new(RwLock::new(EntityState {
            target: state.target.clone(),
            properties: state.properties.clone(),
        })))
    }
}

fn lookup<'a>(map: &'a PropertyMap, segments: &[String]) -> Option<&'a Property> {
    let (first, rest) = segments.split_first()?;
    let property = map.get(first)?;
    if rest.is_empty() {
        return Some(property);
    }
    match property {
        Property::Embedded(inner) => lookup(inner, rest),
        _ => None,
    }
}

impl fmt::Debug for EntityRef {
    // Relations are printed by target only: object graphs are usually cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(state) = self.0.try_read() else {
            return f.write_str("EntityRef(<locked>)");
        };
        let mut out = f.debug_struct(&state.target);
        for (name, property) in &state.properties {
            match property {
                Property::Value(value) => out.field(name, value),
                Property::Embedded(inner) => out.field(name, &inner.keys().collect::<Vec<_>>()),
                Property::One(Some(related)) => out.field(name, &format_args!("-> {}", target_of(related))),
                Property::One(None) => out.field(name, &"null"),
                Property::Many(items) => out.field(name, &format_args!("[{} related]", items.len())),
            };
        }
        out.finish()
    }
}

fn target_of(entity: &EntityRef) -> String {
    entity
        .0
        .try_read()
        .map(|state| state.target.clone())
        .unwrap_or_else(|_| "<locked>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_and_null_are_distinct() {
        let post = EntityRef::new("Post").with("title", Value::Null);
        assert_eq!(post.value(&PropertyPath::new("title")), Some(Value::Null));
        assert_eq!(post.value(&PropertyPath::new("text")), None);
    }

    #[test]
    fn test_embedded_paths() {
        let post = EntityRef::new("Post").with("counters.likes", 3i64);
        let likes = PropertyPath::parse("counters.likes");
        assert!(post.has_embedded(&PropertyPath::new("counters")));
        assert_eq!(post.value(&likes), Some(Value::Integer(3)));

        post.unset(&likes);
        assert_eq!(post.value(&likes), None);
        assert!(post.has_embedded(&PropertyPath::new("counters")));
    }

    #[test]
    fn test_relations_and_identity() {
        let category = EntityRef::new("Category").with("id", 1i64);
        let post = EntityRef::new("Post").with_relation("category", &category);
        assert!(post.related("category").is_some_and(|c| c.ptr_eq(&category)));
        assert!(post.points_at("category", &category));

        let copy = category.snapshot();
        assert!(!copy.ptr_eq(&category));
        assert!(!post.points_at("category", &copy));

        post.set_relation("category", None);
        assert!(matches!(post.relation("category"), Some(None)));
        assert!(post.relation("author").is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let post = EntityRef::new("Post").with("title", "a");
        let snapshot = post.snapshot();
        post.set_value(&PropertyPath::new("title"), "b".into());
        assert_eq!(
            snapshot.value(&PropertyPath::new("title")),
            Some(Value::Text("a".into()))
        );
    }

    #[test]
    fn test_debug_survives_cycles() {
        let parent = EntityRef::new("Category");
        let child = EntityRef::new("Category").with_relation("parent", &parent);
        parent.push_to_collection("children", child.clone());
        let rendered = format!("{:?}", parent);
        assert!(rendered.contains("[1 related]"));
    }
}
