pub mod body;
pub mod config;
pub mod error;
pub mod filter;
pub mod layer;
pub mod route;
pub mod service;
pub mod size;
pub mod stats;

// Public API re-exports
pub use body::{GuardedResponseBody, SizeGuardBody};
pub use config::*;
pub use error::*;
pub use filter::*;
pub use layer::*;
pub use route::*;
pub use service::SizeGuardService;
pub use size::*;
pub use stats::*;
