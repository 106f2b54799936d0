use foundation::{AnnotationId, Arena, Coordinate, Handle};
use geocode::ConfigError;
use serde::Serialize;

/// Handle to a live marker, issued by the surface on create.
pub type AnnotationHandle = Handle;

/// The surface rejected an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// Torn down or not yet initialized.
    NotReady,
    UnknownHandle(AnnotationHandle),
    Rejected(String),
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::NotReady => write!(f, "surface not ready"),
            SurfaceError::UnknownHandle(h) => write!(f, "unknown annotation handle {h}"),
            SurfaceError::Rejected(msg) => write!(f, "surface rejected operation: {msg}"),
        }
    }
}

impl std::error::Error for SurfaceError {}

/// Map surface capability: the only way markers are placed, moved or removed.
///
/// The reconciler is the sole caller of the mutating methods.
pub trait AnnotationSurface: Send {
    fn readiness(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn create_annotation(
        &mut self,
        id: &AnnotationId,
        coordinate: Coordinate,
        label: &str,
    ) -> Result<AnnotationHandle, SurfaceError>;

    fn move_annotation(
        &mut self,
        handle: AnnotationHandle,
        coordinate: Coordinate,
    ) -> Result<(), SurfaceError>;

    /// Surfaces without visible labels can ignore this.
    fn relabel_annotation(
        &mut self,
        _handle: AnnotationHandle,
        _label: &str,
    ) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn remove_annotation(&mut self, handle: AnnotationHandle) -> Result<(), SurfaceError>;

    /// Whether `handle` still refers to a marker on the surface.
    fn is_live(&self, handle: AnnotationHandle) -> bool;

    /// Operations applied since the previous call, for clients replaying
    /// the surface remotely. Surfaces without a journal return nothing.
    fn take_applied(&mut self) -> Vec<SurfaceOp> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryAnnotation {
    pub id: AnnotationId,
    pub coordinate: Coordinate,
    pub label: String,
}

/// One applied surface operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SurfaceOp {
    Create {
        handle: AnnotationHandle,
        id: AnnotationId,
        coordinate: Coordinate,
        label: String,
    },
    Move {
        handle: AnnotationHandle,
        coordinate: Coordinate,
    },
    Relabel {
        handle: AnnotationHandle,
        label: String,
    },
    Remove {
        handle: AnnotationHandle,
    },
}

/// In-memory surface that journals every applied operation.
///
/// Remote clients replay the journal on their own map; tests use it to
/// observe exactly what the reconciler did.
#[derive(Debug)]
pub struct MemorySurface {
    annotations: Arena<MemoryAnnotation>,
    journal: Vec<SurfaceOp>,
    ready: bool,
    reject_after: Option<usize>,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySurface {
    pub fn new() -> Self {
        Self {
            annotations: Arena::new(),
            journal: Vec::new(),
            ready: true,
            reject_after: None,
        }
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn get(&self, handle: AnnotationHandle) -> Option<&MemoryAnnotation> {
        self.annotations.get(handle)
    }

    #[cfg(test)]
    pub fn find(&self, id: &str) -> Option<(AnnotationHandle, &MemoryAnnotation)> {
        self.annotations.iter().find(|(_, a)| a.id.as_str() == id)
    }

    pub fn journal(&self) -> &[SurfaceOp] {
        &self.journal
    }

    pub fn take_journal(&mut self) -> Vec<SurfaceOp> {
        std::mem::take(&mut self.journal)
    }

    /// Drops every marker and refuses further operations until `restore`.
    pub fn tear_down(&mut self) {
        self.annotations.clear();
        self.ready = false;
    }

    pub fn restore(&mut self) {
        self.ready = true;
    }

    /// Accept `n` more operations, then reject everything.
    #[cfg(test)]
    pub fn reject_after(&mut self, n: usize) {
        self.reject_after = Some(n);
    }

    #[cfg(test)]
    pub fn accept_all(&mut self) {
        self.reject_after = None;
    }

    fn admit(&mut self) -> Result<(), SurfaceError> {
        if !self.ready {
            return Err(SurfaceError::NotReady);
        }
        match self.reject_after {
            Some(0) => Err(SurfaceError::Rejected("operation refused".to_string())),
            Some(n) => {
                self.reject_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl AnnotationSurface for MemorySurface {
    fn readiness(&self) -> Result<(), ConfigError> {
        if self.ready {
            Ok(())
        } else {
            Err(ConfigError::new("surface", "torn down"))
        }
    }

    fn create_annotation(
        &mut self,
        id: &AnnotationId,
        coordinate: Coordinate,
        label: &str,
    ) -> Result<AnnotationHandle, SurfaceError> {
        self.admit()?;
        let handle = self.annotations.insert(MemoryAnnotation {
            id: id.clone(),
            coordinate,
            label: label.to_string(),
        });
        self.journal.push(SurfaceOp::Create {
            handle,
            id: id.clone(),
            coordinate,
            label: label.to_string(),
        });
        Ok(handle)
    }

    fn move_annotation(
        &mut self,
        handle: AnnotationHandle,
        coordinate: Coordinate,
    ) -> Result<(), SurfaceError> {
        self.admit()?;
        let annotation = self
            .annotations
            .get_mut(handle)
            .ok_or(SurfaceError::UnknownHandle(handle))?;
        annotation.coordinate = coordinate;
        self.journal.push(SurfaceOp::Move { handle, coordinate });
        Ok(())
    }

    fn relabel_annotation(
        &mut self,
        handle: AnnotationHandle,
        label: &str,
    ) -> Result<(), SurfaceError> {
        self.admit()?;
        let annotation = self
            .annotations
            .get_mut(handle)
            .ok_or(SurfaceError::UnknownHandle(handle))?;
        annotation.label = label.to_string();
        self.journal.push(SurfaceOp::Relabel {
            handle,
            label: label.to_string(),
        });
        Ok(())
    }

    fn remove_annotation(&mut self, handle: AnnotationHandle) -> Result<(), SurfaceError> {
        self.admit()?;
        self.annotations
            .remove(handle)
            .ok_or(SurfaceError::UnknownHandle(handle))?;
        self.journal.push(SurfaceOp::Remove { handle });
        Ok(())
    }

    fn take_applied(&mut self) -> Vec<SurfaceOp> {
        self.take_journal()
    }

    fn is_live(&self, handle: AnnotationHandle) -> bool {
        self.ready && self.annotations.contains(handle)
    }
}

#[cfg(test)]
mod tests {
    use foundation::Coordinate;

    use super::{AnnotationSurface, MemorySurface, SurfaceError, SurfaceOp};

    #[test]
    fn journals_applied_operations() {
        let mut s = MemorySurface::new();
        let h = s
            .create_annotation(&"a".into(), Coordinate::new(1.0, 2.0), "A")
            .unwrap();
        s.move_annotation(h, Coordinate::new(3.0, 4.0)).unwrap();
        s.remove_annotation(h).unwrap();

        assert!(s.is_empty());
        assert_eq!(s.journal().len(), 3);
        assert!(matches!(s.journal()[1], SurfaceOp::Move { .. }));
        assert_eq!(s.take_journal().len(), 3);
        assert!(s.journal().is_empty());
    }

    #[test]
    fn stale_handles_are_unknown() {
        let mut s = MemorySurface::new();
        let h = s
            .create_annotation(&"a".into(), Coordinate::new(1.0, 2.0), "A")
            .unwrap();
        s.remove_annotation(h).unwrap();
        assert!(!s.is_live(h));
        assert_eq!(s.remove_annotation(h), Err(SurfaceError::UnknownHandle(h)));
    }

    #[test]
    fn torn_down_surface_refuses_operations() {
        let mut s = MemorySurface::new();
        let h = s
            .create_annotation(&"a".into(), Coordinate::new(1.0, 2.0), "A")
            .unwrap();
        s.tear_down();
        assert!(s.readiness().is_err());
        assert!(!s.is_live(h));
        assert_eq!(
            s.create_annotation(&"b".into(), Coordinate::new(1.0, 2.0), "B"),
            Err(SurfaceError::NotReady)
        );
        s.restore();
        assert!(s.readiness().is_ok());
        assert!(!s.is_live(h));
    }

    #[test]
    fn reject_after_counts_down() {
        let mut s = MemorySurface::new();
        s.reject_after(1);
        assert!(
            s.create_annotation(&"a".into(), Coordinate::new(1.0, 2.0), "A")
                .is_ok()
        );
        assert!(matches!(
            s.create_annotation(&"b".into(), Coordinate::new(1.0, 2.0), "B"),
            Err(SurfaceError::Rejected(_))
        ));
        s.accept_all();
        assert_eq!(s.len(), 1);
    }
}
