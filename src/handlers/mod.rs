//! HTTP API handlers - modular organization of the REST surface.

pub mod router;
pub mod state;
pub mod types;

pub mod context;
pub mod health;
pub mod ingest;
pub mod memories;

pub use router::{build_protected_routes, build_public_routes, build_router};
pub use state::{AppState, ServiceState};
