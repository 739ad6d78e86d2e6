//! API layer
//!
//! HTTP handlers for:
//! - Poll pages (index, voting, nominations, history)
//! - Account pages and OAuth callbacks
//! - Admin pages
//! - Metrics (Prometheus)

mod admin;
mod dto;
pub mod metrics;
mod oauth;
mod polls;
mod user;

pub use dto::*;

pub use admin::admin_router;
pub use metrics::{metrics_router, track_http};
pub use oauth::oauth_router;
pub use polls::polls_router;
pub use user::user_router;
