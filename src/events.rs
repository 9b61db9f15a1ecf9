// ChurchCMS backend — entity change notifications
//
// Content handlers publish a typed ChangeEvent after every successful
// write; the audit recorder and image tracker subscribe to the bus. The
// entities themselves know nothing about either subscriber. Dispatch is
// in-line (before the request completes) and observer failures are
// swallowed, so a broken subscriber can never fail the write it observed.

use std::sync::Arc;

use async_trait::async_trait;

// ── Entity kinds ────────────────────────────────────────────────────

/// Closed set of content entity kinds. The string tag doubles as the
/// polymorphic type marker stored in audit and image-log rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    HomeBanner,
    Sermon,
    Event,
    Branch,
    Merchandise,
    Book,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::HomeBanner,
        EntityKind::Sermon,
        EntityKind::Event,
        EntityKind::Branch,
        EntityKind::Merchandise,
        EntityKind::Book,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::HomeBanner => "HomeBanner",
            EntityKind::Sermon => "Sermon",
            EntityKind::Event => "Event",
            EntityKind::Branch => "Branch",
            EntityKind::Merchandise => "Merchandise",
            EntityKind::Book => "Book",
        }
    }

    pub fn parse(tag: &str) -> Option<EntityKind> {
        EntityKind::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

// ── Change events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// Stored-image reference carried on creation events.
#[derive(Debug, Clone)]
pub struct ImageField {
    pub path: String,
    pub size_bytes: Option<i64>,
}

impl ImageField {
    /// Build from an entity's optional image column. Empty paths count as
    /// "no image".
    pub fn from_row(path: &Option<String>, size_bytes: Option<i64>) -> Option<ImageField> {
        path.as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| ImageField {
                path: p.to_string(),
                size_bytes,
            })
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub kind: EntityKind,
    pub entity_id: i64,
    /// Display-text snapshot taken when the event was built; the row may
    /// already be gone by the time observers run.
    pub label: String,
    /// Present on creation events for entities persisted with an image.
    pub image: Option<ImageField>,
}

impl ChangeEvent {
    pub fn created(
        kind: EntityKind,
        entity_id: i64,
        label: impl Into<String>,
        image: Option<ImageField>,
    ) -> Self {
        Self {
            action: ChangeAction::Created,
            kind,
            entity_id,
            label: label.into(),
            image,
        }
    }

    pub fn updated(kind: EntityKind, entity_id: i64, label: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Updated,
            kind,
            entity_id,
            label: label.into(),
            image: None,
        }
    }

    pub fn deleted(kind: EntityKind, entity_id: i64, label: impl Into<String>) -> Self {
        Self {
            action: ChangeAction::Deleted,
            kind,
            entity_id,
            label: label.into(),
            image: None,
        }
    }
}

// ── Observer bus ────────────────────────────────────────────────────

#[async_trait]
pub trait ChangeObserver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct ChangeBus {
    observers: Vec<Arc<dyn ChangeObserver>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn ChangeObserver>) {
        tracing::debug!(observer = observer.name(), "change observer registered");
        self.observers.push(observer);
    }

    /// Deliver `event` to every observer before returning control to the
    /// caller. Observer errors are logged and swallowed: publishing must
    /// never fail the write that triggered it.
    pub async fn publish(&self, event: ChangeEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_change(&event).await {
                tracing::warn!(
                    observer = observer.name(),
                    kind = event.kind.as_str(),
                    entity_id = event.entity_id,
                    "change observer failed: {e:#}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl ChangeObserver for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        async fn on_change(&self, _event: &ChangeEvent) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ChangeObserver for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn on_change(&self, _event: &ChangeEvent) -> anyhow::Result<()> {
            anyhow::bail!("observer blew up")
        }
    }

    #[test]
    fn entity_kind_tags_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("NoSuchKind"), None);
    }

    #[test]
    fn image_field_ignores_empty_paths() {
        assert!(ImageField::from_row(&None, None).is_none());
        assert!(ImageField::from_row(&Some(String::new()), Some(10)).is_none());

        let img = ImageField::from_row(&Some("banners/easter.jpg".into()), Some(2048)).unwrap();
        assert_eq!(img.path, "banners/easter.jpg");
        assert_eq!(img.size_bytes, Some(2048));
    }

    #[tokio::test]
    async fn publish_reaches_every_observer() {
        let first = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let second = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });

        let mut bus = ChangeBus::new();
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        bus.publish(ChangeEvent::created(EntityKind::Sermon, 1, "Grace", None))
            .await;
        bus.publish(ChangeEvent::deleted(EntityKind::Sermon, 1, "Grace"))
            .await;

        assert_eq!(first.seen.load(Ordering::SeqCst), 2);
        assert_eq!(second.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_observer_does_not_stop_the_rest() {
        let counter = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });

        let mut bus = ChangeBus::new();
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(counter.clone());

        bus.publish(ChangeEvent::updated(EntityKind::Book, 7, "Hymnal"))
            .await;

        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
    }
}
