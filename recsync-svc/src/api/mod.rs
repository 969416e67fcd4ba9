//! HTTP API handlers for recsync-svc

pub mod buildinfo;
pub mod health;
pub mod recommend;

pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use recommend::generate_recommendation;
