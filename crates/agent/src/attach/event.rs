use serde::Serialize;

use crate::docker::inventory::ContainerRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Attach,
    Detach,
}

/// Notification that a container's log streams became available or went
/// away. One `Attach` per successful attachment, one `Detach` when it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub kind: LifecycleKind,
    pub id: String,
    pub name: String,
}

impl LifecycleEvent {
    pub fn attach(container: &ContainerRef) -> Self {
        Self::new(LifecycleKind::Attach, container)
    }

    pub fn detach(container: &ContainerRef) -> Self {
        Self::new(LifecycleKind::Detach, container)
    }

    fn new(kind: LifecycleKind, container: &ContainerRef) -> Self {
        Self {
            kind,
            id: container.id.clone(),
            name: container.name.clone(),
        }
    }

    pub fn is_attach(&self) -> bool {
        self.kind == LifecycleKind::Attach
    }

    pub fn is_detach(&self) -> bool {
        self.kind == LifecycleKind::Detach
    }
}
