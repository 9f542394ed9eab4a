//! Request routing
//!
//! Selects the target cluster for a request and computes the upstream URL.

mod path;
mod select;

pub use path::{build_target_url, is_watch_query};
pub use select::{cluster_selector, select_cluster};
