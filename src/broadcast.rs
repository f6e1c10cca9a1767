//! Batch-level lifecycle notifications.

use crate::core::Result;
use crate::entity::EntityRef;
use crate::subject::Subject;
use async_trait::async_trait;
use std::sync::Arc;

/// Receives the subjects of one unit of work, grouped by classification,
/// once before the statements run and once after commit.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_before_events_for_all(
        &self,
        inserts: &[&Subject],
        updates: &[&Subject],
        removes: &[&Subject],
    ) -> Result<()>;

    async fn broadcast_after_events_for_all(
        &self,
        inserts: &[&Subject],
        updates: &[&Subject],
        removes: &[&Subject],
    ) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn broadcast_before_events_for_all(
        &self,
        _inserts: &[&Subject],
        _updates: &[&Subject],
        _removes: &[&Subject],
    ) -> Result<()> {
        Ok(())
    }

    async fn broadcast_after_events_for_all(
        &self,
        _inserts: &[&Subject],
        _updates: &[&Subject],
        _removes: &[&Subject],
    ) -> Result<()> {
        Ok(())
    }
}

/// What a subscriber sees of one subject.
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub target: String,
    pub entity: Option<EntityRef>,
    pub database_entity: Option<EntityRef>,
}

impl EntityEvent {
    fn of(subject: &Subject) -> Self {
        Self {
            target: subject.metadata.target.clone(),
            entity: subject.entity.clone(),
            database_entity: subject.database_entity.clone(),
        }
    }
}

/// Per-entity hooks. Every hook defaults to doing nothing.
#[async_trait]
pub trait EntitySubscriber: Send + Sync {
    /// Entity target this subscriber listens to; `None` for all of them.
    fn listen_to(&self) -> Option<&str> {
        None
    }

    async fn before_insert(&self, _event: &EntityEvent) -> Result<()> {
        Ok(())
    }

    async fn after_insert(&self, _event: &EntityEvent) -> Result<()> {
        Ok(())
    }

    async fn before_update(&self, _event: &EntityEvent) -> Result<()> {
        Ok(())
    }

    async fn after_update(&self, _event: &EntityEvent) -> Result<()> {
        Ok(())
    }

    async fn before_remove(&self, _event: &EntityEvent) -> Result<()> {
        Ok(())
    }

    async fn after_remove(&self, _event: &EntityEvent) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Hook {
    Insert,
    Update,
    Remove,
}

/// Fans batch events out to registered subscribers, one subject and one
/// subscriber at a time, in registration order.
#[derive(Default, Clone)]
pub struct SubscriberBroadcaster {
    subscribers: Vec<Arc<dyn EntitySubscriber>>,
}

impl SubscriberBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(mut self, subscriber: Arc<dyn EntitySubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    fn listening<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Arc<dyn EntitySubscriber>> {
        self.subscribers
            .iter()
            .filter(move |subscriber| subscriber.listen_to().is_none_or(|t| t == target))
    }

    async fn dispatch(&self, subjects: &[&Subject], hook: Hook, before: bool) -> Result<()> {
        for subject in subjects {
            let event = EntityEvent::of(subject);
            for subscriber in self.listening(&subject.metadata.target) {
                match (hook, before) {
                    (Hook::Insert, true) => subscriber.before_insert(&event).await?,
                    (Hook::Insert, false) => subscriber.after_insert(&event).await?,
                    (Hook::Update, true) => subscriber.before_update(&event).await?,
                    (Hook::Update, false) => subscriber.after_update(&event).await?,
                    (Hook::Remove, true) => subscriber.before_remove(&event).await?,
                    (Hook::Remove, false) => subscriber.after_remove(&event).await?,
                }
            }
        }
        Ok(())
    }

    async fn broadcast(
        &self,
        inserts: &[&Subject],
        updates: &[&Subject],
        removes: &[&Subject],
        before: bool,
    ) -> Result<()> {
        self.dispatch(inserts, Hook::Insert, before).await?;
        self.dispatch(updates, Hook::Update, before).await?;
        self.dispatch(removes, Hook::Remove, before).await
    }
}

#[async_trait]
impl Broadcaster for SubscriberBroadcaster {
    async fn broadcast_before_events_for_all(
        &self,
        inserts: &[&Subject],
        updates: &[&Subject],
        removes: &[&Subject],
    ) -> Result<()> {
        self.broadcast(inserts, updates, removes, true).await
    }

    async fn broadcast_after_events_for_all(
        &self,
        inserts: &[&Subject],
        updates: &[&Subject],
        removes: &[&Subject],
    ) -> Result<()> {
        self.broadcast(inserts, updates, removes, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnType, Value};
    use crate::entity::PropertyPath;
    use crate::metadata::{ColumnMetadata, EntityMetadata, MetadataRegistry};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        target: Option<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EntitySubscriber for Recorder {
        fn listen_to(&self) -> Option<&str> {
            self.target.as_deref()
        }

        async fn before_insert(&self, event: &EntityEvent) -> Result<()> {
            if let Some(entity) = &event.entity {
                entity.set_value(&PropertyPath::new("title"), Value::from("stamped"));
            }
            self.seen.lock()?.push(format!("before_insert {}", event.target));
            Ok(())
        }

        async fn after_remove(&self, event: &EntityEvent) -> Result<()> {
            self.seen.lock()?.push(format!("after_remove {}", event.target));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_subscribers_filter_by_target() -> Result<()> {
        let registry = MetadataRegistry::builder()
            .entity(
                EntityMetadata::builder("Post", "post")
                    .column(ColumnMetadata::new("id", ColumnType::Integer).primary()),
            )
            .entity(
                EntityMetadata::builder("Tag", "tag")
                    .column(ColumnMetadata::new("id", ColumnType::Integer).primary()),
            )
            .build()?;
        let posts_only = Arc::new(Recorder {
            target: Some("Post".to_string()),
            ..Default::default()
        });
        let everything = Arc::new(Recorder::default());
        let broadcaster = SubscriberBroadcaster::new()
            .subscribe(posts_only.clone())
            .subscribe(everything.clone());

        let post = EntityRef::new("Post");
        let inserted = Subject::insert(registry.get("Post")?, post.clone());
        let removed = Subject::remove(
            registry.get("Tag")?,
            EntityRef::new("Tag").with("id", 1i64),
            None,
        );

        broadcaster
            .broadcast_before_events_for_all(&[&inserted], &[], &[&removed])
            .await?;
        broadcaster
            .broadcast_after_events_for_all(&[&inserted], &[], &[&removed])
            .await?;

        assert_eq!(*posts_only.seen.lock()?, vec!["before_insert Post"]);
        assert_eq!(
            *everything.seen.lock()?,
            vec!["before_insert Post", "after_remove Tag"]
        );
        assert_eq!(
            post.value(&PropertyPath::new("title")),
            Some(Value::Text("stamped".into()))
        );
        Ok(())
    }
}
