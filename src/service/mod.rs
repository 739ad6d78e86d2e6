//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate the data layer, site settings and metadata providers.

mod account;
mod cycle;
mod nomination;
mod voting;

pub use account::{AccountService, OAuthGrant, ProfileUpdate};
pub use cycle::{CycleService, PastCycle};
pub use nomination::{MovieEdit, NominationForm, NominationService, PosterUpload};
pub use voting::{VoteOutcome, VotingService};
