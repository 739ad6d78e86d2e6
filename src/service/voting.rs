//! Voting service

use std::sync::Arc;

use crate::data::{DataConnector, User};
use crate::error::{AppError, Result};
use crate::settings::{Settings, keys};

/// Result of toggling a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Cast,
    Retracted,
}

/// Voting service
pub struct VotingService {
    db: Arc<dyn DataConnector>,
    settings: Settings,
}

impl VotingService {
    pub fn new(db: Arc<dyn DataConnector>, settings: Settings) -> Self {
        Self { db, settings }
    }

    /// Votes the user may still cast.
    ///
    /// Always 1 with unlimited votes, otherwise the cap minus the user's
    /// votes on active movies, never below zero.
    pub async fn available_votes(&self, user_id: i64) -> Result<i64> {
        if self.settings.flag(keys::UNLIMITED_VOTES).await? {
            return Ok(1);
        }
        let max_votes = self.settings.int(keys::MAX_USER_VOTES).await?;
        let active = self
            .db
            .get_user_votes(user_id)
            .await?
            .iter()
            .filter(|movie| movie.is_active())
            .count();
        let active = i64::try_from(active).unwrap_or(i64::MAX);
        Ok((max_votes - active).max(0))
    }

    async fn require_voting_enabled(&self) -> Result<()> {
        if self.settings.flag(keys::VOTING_ENABLED).await? {
            Ok(())
        } else {
            Err(AppError::PolicyDisabled("voting is disabled".to_string()))
        }
    }

    /// Record a vote for `movie_id`.
    ///
    /// # Errors
    /// - `PolicyDisabled` when voting is off or no votes are left
    /// - `Conflict` when the movie is not open for voting or already voted
    pub async fn cast(&self, user: &User, movie_id: i64) -> Result<()> {
        self.require_voting_enabled().await?;

        let movie = self.db.get_movie(movie_id).await?;
        if !movie.is_active() {
            return Err(AppError::Conflict(
                "movie is not open for voting".to_string(),
            ));
        }
        if !movie.approved {
            return Err(AppError::Conflict("movie awaits approval".to_string()));
        }
        if movie.voted_by(user.id) {
            return Err(AppError::Conflict("vote already recorded".to_string()));
        }
        if self.available_votes(user.id).await? <= 0 {
            return Err(AppError::PolicyDisabled("no more votes".to_string()));
        }

        self.db.add_vote(user.id, movie_id).await?;
        crate::metrics::VOTES_TOTAL.with_label_values(&["cast"]).inc();
        tracing::debug!(user_id = user.id, movie_id, "Vote cast");
        Ok(())
    }

    /// Remove the user's vote for `movie_id`.
    ///
    /// # Errors
    /// `NotFound` without a vote, `Conflict` once the movie is watched.
    pub async fn retract(&self, user: &User, movie_id: i64) -> Result<()> {
        self.require_voting_enabled().await?;
        self.db.delete_vote(user.id, movie_id).await?;
        crate::metrics::VOTES_TOTAL
            .with_label_values(&["retract"])
            .inc();
        tracing::debug!(user_id = user.id, movie_id, "Vote retracted");
        Ok(())
    }

    /// Retract an existing vote, otherwise cast one.
    pub async fn toggle(&self, user: &User, movie_id: i64) -> Result<VoteOutcome> {
        if self.db.user_voted_for_movie(user.id, movie_id).await? {
            self.retract(user, movie_id).await?;
            Ok(VoteOutcome::Retracted)
        } else {
            self.cast(user, movie_id).await?;
            Ok(VoteOutcome::Cast)
        }
    }
}
