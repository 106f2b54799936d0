use std::collections::{BTreeMap, BTreeSet, HashMap};

use foundation::{AnnotationId, AnnotationPoint, Coordinate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::surface::{AnnotationHandle, AnnotationSurface, SurfaceError};

/// A marker the reconciler has placed and still tracks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceAnnotation {
    pub id: AnnotationId,
    pub handle: AnnotationHandle,
    pub coordinate: Coordinate,
    pub label: String,
    /// Number of in-place moves since creation.
    pub revision: u32,
}

impl SurfaceAnnotation {
    pub fn matches(&self, point: &AnnotationPoint) -> bool {
        self.coordinate.same_position(&point.coordinate) && self.label == point.label
    }
}

pub type AnnotationMap = BTreeMap<AnnotationId, SurfaceAnnotation>;

/// Minimal operation set that turns `previous` into `next`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcilePlan {
    pub to_create: Vec<AnnotationPoint>,
    pub to_move: Vec<AnnotationPoint>,
    pub to_remove: Vec<AnnotationId>,
    /// Points excluded by the validity filter.
    pub rejected: usize,
}

impl ReconcilePlan {
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_move.len() + self.to_remove.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Diffs the tracked annotations against a freshly built point set.
///
/// Pure: nothing is touched until the plan is applied.
///
/// - Points with a blank id, a non-finite or out-of-range coordinate, or a
///   coordinate of exactly `(0, 0)` are dropped before diffing, so they never
///   reach `to_create`/`to_move`.
/// - A repeated id keeps its first occurrence.
/// - Unchanged points produce no operation; changed ones are moved in place.
pub fn plan(previous: &AnnotationMap, next: &[AnnotationPoint]) -> ReconcilePlan {
    let mut out = ReconcilePlan::default();
    let mut seen: BTreeSet<&AnnotationId> = BTreeSet::new();

    for point in next {
        if !point.is_plottable() {
            debug!(id = %point.id, coordinate = %point.coordinate, "rejecting unplottable point");
            out.rejected += 1;
            continue;
        }
        if !seen.insert(&point.id) {
            warn!(id = %point.id, "duplicate annotation id; keeping first occurrence");
            continue;
        }

        match previous.get(&point.id) {
            None => out.to_create.push(point.clone()),
            Some(existing) if existing.matches(point) => {}
            Some(_) => out.to_move.push(point.clone()),
        }
    }

    out.to_remove = previous
        .keys()
        .filter(|id| !seen.contains(id))
        .cloned()
        .collect();
    out
}

/// What an applied plan changed, by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<AnnotationId>,
    pub moved: Vec<AnnotationId>,
    pub removed: Vec<AnnotationId>,
    pub rejected: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.moved.is_empty() && self.removed.is_empty()
    }
}

/// Sole owner of the `id -> handle` map.
///
/// Per id the lifecycle is `absent -> created -> (moved)* -> removed ->
/// absent`. The map is updated after every successful surface call, so after
/// a failure it still describes exactly what was applied.
#[derive(Debug, Default)]
pub struct AnnotationReconciler {
    annotations: AnnotationMap,
    by_handle: HashMap<AnnotationHandle, AnnotationId>,
    needs_resync: bool,
}

impl AnnotationReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotations(&self) -> &AnnotationMap {
        &self.annotations
    }

    pub fn get(&self, id: &str) -> Option<&SurfaceAnnotation> {
        self.annotations.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.annotations.contains_key(id)
    }

    pub fn id_for_handle(&self, handle: AnnotationHandle) -> Option<&AnnotationId> {
        self.by_handle.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Set after a failed apply; cleared by [`resync`](Self::resync).
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Makes the next [`reconcile`](Self::reconcile) prune dead handles first.
    pub fn request_resync(&mut self) {
        self.needs_resync = true;
    }

    pub fn plan(&self, next: &[AnnotationPoint]) -> ReconcilePlan {
        plan(&self.annotations, next)
    }

    /// Plans against the tracked state and applies the result.
    ///
    /// When the previous apply failed, tracked entries the surface no longer
    /// reports live are dropped first so the diff starts from what is really
    /// on the map.
    pub fn reconcile<S>(
        &mut self,
        next: &[AnnotationPoint],
        surface: &mut S,
    ) -> Result<ReconcileReport, SurfaceError>
    where
        S: AnnotationSurface + ?Sized,
    {
        if self.needs_resync {
            self.resync(&*surface);
        }
        let plan = self.plan(next);
        self.apply(plan, surface)
    }

    /// Applies removes, then moves, then creates.
    ///
    /// The first surface error aborts the rest of the batch and is returned.
    pub fn apply<S>(
        &mut self,
        plan: ReconcilePlan,
        surface: &mut S,
    ) -> Result<ReconcileReport, SurfaceError>
    where
        S: AnnotationSurface + ?Sized,
    {
        let mut report = ReconcileReport {
            rejected: plan.rejected,
            ..ReconcileReport::default()
        };

        for id in plan.to_remove {
            let Some(handle) = self.annotations.get(&id).map(|a| a.handle) else {
                continue;
            };
            if let Err(err) = surface.remove_annotation(handle) {
                return Err(self.abort(err));
            }
            self.annotations.remove(&id);
            self.by_handle.remove(&handle);
            report.removed.push(id);
        }

        for point in plan.to_move {
            let Some(existing) = self.annotations.get(&point.id) else {
                continue;
            };
            let handle = existing.handle;
            let moved = !existing.coordinate.same_position(&point.coordinate);
            let relabeled = existing.label != point.label;

            if moved {
                if let Err(err) = surface.move_annotation(handle, point.coordinate) {
                    return Err(self.abort(err));
                }
                if let Some(a) = self.annotations.get_mut(&point.id) {
                    a.coordinate = point.coordinate;
                }
            }
            if relabeled {
                if let Err(err) = surface.relabel_annotation(handle, &point.label) {
                    return Err(self.abort(err));
                }
                if let Some(a) = self.annotations.get_mut(&point.id) {
                    a.label = point.label.clone();
                }
            }
            if let Some(a) = self.annotations.get_mut(&point.id) {
                a.revision = a.revision.saturating_add(1);
            }
            report.moved.push(point.id);
        }

        for point in plan.to_create {
            // `created` is only entered from `absent`.
            if self.annotations.contains_key(&point.id) {
                continue;
            }
            let handle = match surface.create_annotation(&point.id, point.coordinate, &point.label)
            {
                Ok(handle) => handle,
                Err(err) => return Err(self.abort(err)),
            };
            self.by_handle.insert(handle, point.id.clone());
            self.annotations.insert(
                point.id.clone(),
                SurfaceAnnotation {
                    id: point.id.clone(),
                    handle,
                    coordinate: point.coordinate,
                    label: point.label,
                    revision: 0,
                },
            );
            report.created.push(point.id);
        }

        Ok(report)
    }

    /// Drops tracked entries whose handles the surface no longer holds.
    ///
    /// Returns the number of entries dropped.
    pub fn resync<S>(&mut self, surface: &S) -> usize
    where
        S: AnnotationSurface + ?Sized,
    {
        let before = self.annotations.len();
        self.annotations.retain(|_, a| surface.is_live(a.handle));
        self.by_handle
            .retain(|handle, _| surface.is_live(*handle));
        self.needs_resync = false;

        let dropped = before - self.annotations.len();
        if dropped > 0 {
            debug!(dropped, "resync dropped annotations missing from surface");
        }
        dropped
    }

    /// Forgets every tracked annotation without touching the surface.
    pub fn reset(&mut self) {
        self.annotations.clear();
        self.by_handle.clear();
        self.needs_resync = false;
    }

    fn abort(&mut self, err: SurfaceError) -> SurfaceError {
        warn!(%err, "surface rejected operation; aborting batch");
        self.needs_resync = true;
        err
    }
}
