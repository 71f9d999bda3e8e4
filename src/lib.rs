// storage-router - front-door request router for a multi-cluster
// object-storage service.

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod liveness;
pub mod memoizer;
pub mod router;
pub mod selector;

pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use router::{Router, RouteDecision};
