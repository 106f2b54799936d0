//! Marker synchronization: builds annotation points from location records and
//! reconciles them onto a map surface with minimal operations.

pub mod interaction;
pub mod points;
pub mod reconcile;
pub mod session;
pub mod source;
pub mod surface;

pub use interaction::*;
pub use points::*;
pub use reconcile::*;
pub use session::*;
pub use source::*;
pub use surface::*;
