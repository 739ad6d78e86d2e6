//! Authentication
//!
//! Handles:
//! - Cookie sessions bound to a credential date
//! - Twitch, Discord and Patreon OAuth flows
//! - Request extractors for users and admins

mod middleware;
pub mod oauth;
pub mod session;

pub use middleware::{AdminUser, CurrentUser, MaybeUser};
pub use oauth::{OAuthClient, OAuthStates, ProviderConfig};
pub use session::{Session, SessionKeys, removal_cookie};
