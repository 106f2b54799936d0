//! Address resolution: resolver adapters and the per-session resolution cache.

pub mod cache;
pub mod context;
pub mod http;
pub mod resolver;
pub mod table;
pub mod throttle;

pub use cache::*;
pub use context::*;
pub use http::*;
pub use resolver::*;
pub use table::*;
pub use throttle::*;
