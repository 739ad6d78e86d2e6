//! Cycle service
//!
//! Drives the open → selecting → closed life of a voting cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::data::{Cycle, DataConnector, Movie, round_to_second, sort_by_votes};
use crate::error::{AppError, Result};
use crate::settings::{Settings, keys};

/// Past cycle with the movies chosen when it closed
#[derive(Debug, Clone, serde::Serialize)]
pub struct PastCycle {
    pub cycle: Cycle,
    pub watched: Vec<Movie>,
}

/// Cycle service
pub struct CycleService {
    db: Arc<dyn DataConnector>,
    settings: Settings,
    /// Age in cycles past which unwatched votes are dropped on close, 0 disables
    vote_decay: i64,
}

impl CycleService {
    pub fn new(db: Arc<dyn DataConnector>, settings: Settings, vote_decay: i64) -> Self {
        Self {
            db,
            settings,
            vote_decay,
        }
    }

    /// The open cycle, if any
    pub async fn current(&self) -> Result<Option<Cycle>> {
        self.db.get_current_cycle().await
    }

    async fn require_current(&self) -> Result<Cycle> {
        self.current()
            .await?
            .ok_or_else(|| AppError::Conflict("no cycle is open".to_string()))
    }

    /// Open a new cycle and enable voting.
    ///
    /// # Errors
    /// `Conflict` while another cycle is still open.
    pub async fn start(&self, planned_end: Option<DateTime<Utc>>) -> Result<Cycle> {
        let id = self.db.add_cycle(planned_end.map(round_to_second)).await?;
        self.settings.set_bool(keys::VOTING_ENABLED, true).await?;
        tracing::info!(cycle_id = id, "Cycle started");
        self.db.get_cycle(id).await
    }

    /// First close stage: disable voting and rank the active movies.
    pub async fn begin_close(&self) -> Result<Vec<Movie>> {
        let cycle = self.require_current().await?;
        self.settings.set_bool(keys::VOTING_ENABLED, false).await?;
        tracing::info!(cycle_id = cycle.id, "Cycle close started, voting disabled");
        self.ranking().await
    }

    /// Active movies ordered by votes, then name.
    pub async fn ranking(&self) -> Result<Vec<Movie>> {
        let mut movies = self.db.get_active_movies().await?;
        sort_by_votes(&mut movies);
        Ok(movies)
    }

    /// Abort a started close and re-enable voting.
    pub async fn cancel_close(&self) -> Result<()> {
        self.require_current().await?;
        self.settings.set_bool(keys::VOTING_ENABLED, true).await?;
        tracing::info!("Cycle close cancelled, voting enabled");
        Ok(())
    }

    /// Second close stage: mark winners watched and end the cycle.
    ///
    /// Voting stays disabled until the next cycle starts. When a vote
    /// decay horizon is configured, stale votes are dropped afterwards.
    ///
    /// # Arguments
    /// * `winners` - Ids of the active movies selected by the admin
    /// * `ended` - End date, defaults to now
    ///
    /// # Errors
    /// `Conflict` without an open cycle or when a winner is not active.
    pub async fn finish_close(
        &self,
        winners: &[i64],
        ended: Option<DateTime<Utc>>,
    ) -> Result<Cycle> {
        let mut cycle = self.require_current().await?;

        let mut watched = Vec::with_capacity(winners.len());
        for id in winners {
            if watched.contains(id) {
                continue;
            }
            let movie = self.db.get_movie(*id).await?;
            if !movie.is_active() {
                return Err(AppError::Conflict(format!(
                    "movie {:?} is not active",
                    movie.name
                )));
            }
            watched.push(*id);
        }

        cycle.ended = Some(round_to_second(ended.unwrap_or_else(Utc::now)));
        cycle.watched = watched;
        self.db.update_cycle(&cycle).await?;
        self.settings.set_bool(keys::VOTING_ENABLED, false).await?;

        crate::metrics::CYCLES_CLOSED_TOTAL.inc();
        tracing::info!(
            cycle_id = cycle.id,
            winners = cycle.watched.len(),
            "Cycle closed"
        );

        if self.vote_decay > 0 {
            let removed = self.db.decay_votes(self.vote_decay).await?;
            crate::metrics::VOTES_DECAYED_TOTAL.inc_by(removed);
            tracing::info!(removed, age = self.vote_decay, "Stale votes decayed");
        }

        self.db.get_cycle(cycle.id).await
    }

    /// One page of ended cycles, newest first, with their watched movies.
    ///
    /// Pages past the addressable range are empty.
    pub async fn past_cycles(&self, page: i64, per_page: i64) -> Result<Vec<PastCycle>> {
        let Some(start) = page.max(0).checked_mul(per_page) else {
            return Ok(Vec::new());
        };
        let cycles = self.db.get_past_cycles(start, per_page).await?;
        let mut past = Vec::with_capacity(cycles.len());
        for cycle in cycles {
            let watched = self.db.get_movies_from_cycle(cycle.id).await?;
            past.push(PastCycle { cycle, watched });
        }
        Ok(past)
    }
}
