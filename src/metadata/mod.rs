//! Link and metadata pipeline
//!
//! Handles:
//! - Link normalization and classification
//! - Metadata lookup on Jikan (MyAnimeList) and TMDB (IMDb links)
//! - Poster download and resizing

pub mod jikan;
mod links;
mod poster;
pub mod tmdb;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub use links::{classify_link, imdb_id, mal_id, normalize_link, parse_link};
pub use poster::{MAX_POSTER_BYTES, POSTER_WIDTH, PosterStore};

use crate::data::{Link, LinkType};
use crate::error::{AppError, Result};
use crate::settings::{Settings, keys};

/// Fields derived from a provider for a new nomination
#[derive(Debug, Clone, PartialEq)]
pub struct MovieMetadata {
    /// Stable provider-scoped id, used for the poster file name
    pub provider_id: String,
    pub title: String,
    pub description: String,
    pub poster_url: Option<String>,
    pub duration: String,
    pub rating: f32,
    /// Tag names, the provider's sentinel tag first
    pub tags: Vec<String>,
}

/// Provider settings read from the config store per nomination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPolicy {
    pub jikan_enabled: bool,
    pub banned_types: Vec<String>,
    pub max_episodes: i64,
    pub max_mult_ep_length: i64,
    pub tmdb_enabled: bool,
    pub tmdb_token: String,
}

impl MetadataPolicy {
    pub async fn load(settings: &Settings) -> Result<Self> {
        let banned_types = settings
            .string(keys::JIKAN_BANNED_TYPES)
            .await?
            .split(',')
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        Ok(Self {
            jikan_enabled: settings.flag(keys::JIKAN_ENABLED).await?,
            banned_types,
            max_episodes: settings.int(keys::JIKAN_MAX_EPISODES).await?,
            max_mult_ep_length: settings.int(keys::MAX_MULT_EP_LENGTH).await?,
            tmdb_enabled: settings.flag(keys::TMDB_ENABLED).await?,
            tmdb_token: settings.string(keys::TMDB_TOKEN).await?,
        })
    }
}

/// Source of nomination metadata, keyed by a movie's source link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch metadata for the provider behind `source`.
    ///
    /// # Errors
    /// `Metadata` when the provider is disabled, rejects the entry or fails.
    async fn fetch(&self, source: &Link, policy: &MetadataPolicy) -> Result<MovieMetadata>;
}

/// Send a request and decode its JSON body, mapping failures to `Metadata`.
pub(crate) async fn fetch_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| AppError::Metadata(format!("provider request failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Metadata(format!(
            "provider answered with status {status}"
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AppError::Metadata(format!("unexpected provider response: {e}")))
}

/// Jikan and TMDB over HTTP
pub struct HttpMetadataSource {
    client: reqwest::Client,
    jikan_base_url: String,
    tmdb_base_url: String,
}

impl HttpMetadataSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            jikan_base_url: jikan::DEFAULT_BASE_URL.to_string(),
            tmdb_base_url: tmdb::DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point both providers at other hosts.
    pub fn with_base_urls(mut self, jikan: impl Into<String>, tmdb: impl Into<String>) -> Self {
        self.jikan_base_url = jikan.into();
        self.tmdb_base_url = tmdb.into();
        self
    }

    async fn dispatch(&self, source: &Link, policy: &MetadataPolicy) -> Result<MovieMetadata> {
        match source.link_type {
            LinkType::MyAnimeList => {
                if !policy.jikan_enabled {
                    return Err(AppError::Metadata(
                        "MyAnimeList lookups are disabled".to_string(),
                    ));
                }
                let id = mal_id(&source.url).ok_or_else(|| {
                    AppError::Metadata(format!("no anime id in {}", source.url))
                })?;
                jikan::fetch(&self.client, &self.jikan_base_url, id, policy).await
            }
            LinkType::Imdb => {
                if !policy.tmdb_enabled {
                    return Err(AppError::Metadata("IMDb lookups are disabled".to_string()));
                }
                let id = imdb_id(&source.url).ok_or_else(|| {
                    AppError::Metadata(format!("no title id in {}", source.url))
                })?;
                tmdb::fetch(&self.client, &self.tmdb_base_url, &id, policy).await
            }
            LinkType::Misc => Err(AppError::Metadata(
                "autofill needs an IMDb or MyAnimeList link first".to_string(),
            )),
        }
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, source: &Link, policy: &MetadataPolicy) -> Result<MovieMetadata> {
        let provider = source.link_type.as_str();
        let result = self.dispatch(source, policy).await;
        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::METADATA_FETCHES_TOTAL
            .with_label_values(&[provider, status])
            .inc();
        if let Err(error) = &result {
            tracing::warn!(%error, provider, url = %source.url, "Metadata lookup failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MetadataPolicy {
        MetadataPolicy {
            jikan_enabled: false,
            banned_types: Vec::new(),
            max_episodes: 0,
            max_mult_ep_length: 0,
            tmdb_enabled: false,
            tmdb_token: String::new(),
        }
    }

    #[tokio::test]
    async fn disabled_providers_are_rejected_without_requests() {
        let source = HttpMetadataSource::new(reqwest::Client::new())
            .with_base_urls("http://127.0.0.1:1", "http://127.0.0.1:1");

        for url in [
            "https://myanimelist.net/anime/199",
            "https://imdb.com/title/tt0133093",
            "https://example.com/film",
        ] {
            let link = parse_link(url).unwrap();
            let error = source.fetch(&link, &policy()).await.unwrap_err();
            assert!(matches!(error, AppError::Metadata(_)), "{url}");
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_metadata_error() {
        let source = HttpMetadataSource::new(reqwest::Client::new())
            .with_base_urls("http://127.0.0.1:1", "http://127.0.0.1:1");
        let mut policy = policy();
        policy.jikan_enabled = true;

        let link = parse_link("https://myanimelist.net/anime/199").unwrap();
        let error = source.fetch(&link, &policy).await.unwrap_err();
        assert!(matches!(error, AppError::Metadata(_)));
    }

    #[tokio::test]
    async fn policy_reads_banned_types_csv() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = crate::data::DocumentStore::open(&dir.path().join("data.json"))
            .await
            .unwrap();
        let settings = Settings::new(std::sync::Arc::new(store));
        settings
            .set_string(keys::JIKAN_BANNED_TYPES, " TV , ,Special")
            .await
            .unwrap();

        let policy = MetadataPolicy::load(&settings).await.unwrap();
        assert_eq!(policy.banned_types, vec!["TV", "Special"]);
        assert_eq!(policy.max_mult_ep_length, 120);
    }
}
