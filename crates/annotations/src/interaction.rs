use foundation::AnnotationId;
use serde::{Deserialize, Serialize};

use crate::reconcile::AnnotationReconciler;
use crate::surface::AnnotationHandle;

/// Pointer interaction reported by a surface adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceEvent {
    Click {
        handle: AnnotationHandle,
        id: AnnotationId,
    },
    Hover {
        handle: AnnotationHandle,
    },
    Unhover {
        handle: AnnotationHandle,
    },
}

/// Interaction changes, expressed in record ids for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum InteractionEvent {
    Selected(AnnotationId),
    Deselected(AnnotationId),
    Hovered(AnnotationId),
    Unhovered(AnnotationId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Interaction {
    pub selected: Option<AnnotationId>,
    pub hovered: Option<AnnotationId>,
}

impl Interaction {
    /// Applies `event`, resolving handles through the reconciler.
    ///
    /// Events for handles the reconciler does not own are ignored, as is a
    /// click whose id disagrees with the handle's owner.
    pub fn apply(
        &mut self,
        event: &SurfaceEvent,
        reconciler: &AnnotationReconciler,
    ) -> Vec<InteractionEvent> {
        let mut out = Vec::new();
        match event {
            SurfaceEvent::Click { handle, id } => {
                if reconciler.id_for_handle(*handle) != Some(id) {
                    return out;
                }
                if self.selected.as_ref() == Some(id) {
                    return out;
                }
                if let Some(prev) = self.selected.replace(id.clone()) {
                    out.push(InteractionEvent::Deselected(prev));
                }
                out.push(InteractionEvent::Selected(id.clone()));
            }
            SurfaceEvent::Hover { handle } => {
                let Some(id) = reconciler.id_for_handle(*handle) else {
                    return out;
                };
                if self.hovered.as_ref() == Some(id) {
                    return out;
                }
                if let Some(prev) = self.hovered.replace(id.clone()) {
                    out.push(InteractionEvent::Unhovered(prev));
                }
                out.push(InteractionEvent::Hovered(id.clone()));
            }
            SurfaceEvent::Unhover { handle } => {
                let Some(id) = reconciler.id_for_handle(*handle) else {
                    return out;
                };
                if self.hovered.as_ref() == Some(id) {
                    self.hovered = None;
                    out.push(InteractionEvent::Unhovered(id.clone()));
                }
            }
        }
        out
    }

    /// Clears selection/hover pointing at annotations that are gone.
    pub fn retain_live(&mut self, reconciler: &AnnotationReconciler) -> Vec<InteractionEvent> {
        let mut out = Vec::new();
        if let Some(id) = self.selected.take_if(|id| !reconciler.contains(id.as_str())) {
            out.push(InteractionEvent::Deselected(id));
        }
        if let Some(id) = self.hovered.take_if(|id| !reconciler.contains(id.as_str())) {
            out.push(InteractionEvent::Unhovered(id));
        }
        out
    }

    pub fn clear_selection(&mut self) -> Option<InteractionEvent> {
        self.selected.take().map(InteractionEvent::Deselected)
    }
}
