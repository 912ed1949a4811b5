//! Filter — which containers a subscription follows.

use serde::{Deserialize, Serialize};

use super::event::{LifecycleEvent, LifecycleKind};
use crate::docker::stream::StreamKind;

/// Declarative container selection. Criteria are OR-combined; with all of
/// `id`, `name` and `contains` empty the filter matches every container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    /// Prefix of the short container id. A non-empty prefix also makes the
    /// subscription end when that container detaches.
    pub id: String,
    /// Exact container name.
    pub name: String,
    /// Substring of the container name.
    pub contains: String,
    /// Reserved for per-stream selection; not consulted when matching.
    pub streams: Vec<StreamKind>,
}

impl SubscriptionFilter {
    pub fn match_all() -> Self {
        Self::default()
    }

    pub fn by_id(prefix: impl Into<String>) -> Self {
        Self { id: prefix.into(), ..Self::default() }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn containing(fragment: impl Into<String>) -> Self {
        Self { contains: fragment.into(), ..Self::default() }
    }

    pub fn is_match_all(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.contains.is_empty()
    }

    pub fn is_id_scoped(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        self.is_match_all()
            || (!self.id.is_empty() && event.id.starts_with(&self.id))
            || (!self.name.is_empty() && event.name == self.name)
            || (!self.contains.is_empty() && event.name.contains(&self.contains))
    }

    /// Whether `event` terminates a subscription using this filter: only a
    /// detach of the container an id-scoped filter points at does.
    pub fn ends_on(&self, event: &LifecycleEvent) -> bool {
        self.is_id_scoped()
            && event.kind == LifecycleKind::Detach
            && event.id.starts_with(&self.id)
    }
}
