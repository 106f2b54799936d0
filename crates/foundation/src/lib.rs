pub mod arena;
pub mod coordinate;
pub mod handles;
pub mod ids;
pub mod precision;
pub mod record;

// Foundation crate: the marker data model and small, well-tested primitives.
pub use arena::*;
pub use coordinate::*;
pub use handles::*;
pub use ids::*;
pub use record::*;
