//! TMDB provider, looked up through IMDb ids

use serde::Deserialize;

use super::{MetadataPolicy, MovieMetadata, fetch_json};
use crate::error::{AppError, Result};

/// Sentinel tag attached to every IMDb entry
pub const IMDB_TAG: &str = "IMDB";

pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w300";

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Option<Vec<FindResult>>,
}

#[derive(Debug, Deserialize)]
struct FindResult {
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MovieDetail {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    runtime: Option<i64>,
    #[serde(default)]
    vote_average: Option<f64>,
    #[serde(default)]
    genres: Option<Vec<Genre>>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    #[serde(default)]
    name: Option<String>,
}

/// "H hr M min" for a runtime in minutes
pub fn format_runtime(minutes: i64) -> String {
    format!("{} hr {} min", minutes / 60, minutes % 60)
}

pub(super) async fn fetch(
    client: &reqwest::Client,
    base_url: &str,
    imdb_id: &str,
    policy: &MetadataPolicy,
) -> Result<MovieMetadata> {
    let base_url = base_url.trim_end_matches('/');
    let token = policy.tmdb_token.as_str();

    let found: FindResponse = fetch_json(
        client
            .get(format!("{base_url}/find/{imdb_id}"))
            .query(&[("api_key", token), ("external_source", "imdb_id")]),
    )
    .await?;
    let movie_id = found
        .movie_results
        .unwrap_or_default()
        .into_iter()
        .find_map(|result| result.id)
        .ok_or_else(|| AppError::Metadata(format!("no TMDB movie for {imdb_id}")))?;

    let detail: MovieDetail = fetch_json(
        client
            .get(format!("{base_url}/movie/{movie_id}"))
            .query(&[("api_key", token)]),
    )
    .await?;
    extract(detail, movie_id)
}

pub(super) fn extract(detail: MovieDetail, movie_id: u64) -> Result<MovieMetadata> {
    let title = detail
        .title
        .filter(|title| !title.trim().is_empty())
        .ok_or_else(|| AppError::Metadata("movie has no title".to_string()))?;
    let year = detail
        .release_date
        .as_deref()
        .and_then(|date| date.get(..4))
        .filter(|year| year.chars().all(|c| c.is_ascii_digit()));
    let title = match year {
        Some(year) => format!("{title} ({year})"),
        None => title,
    };

    let mut tags = vec![IMDB_TAG.to_string()];
    tags.extend(
        detail
            .genres
            .unwrap_or_default()
            .into_iter()
            .filter_map(|genre| genre.name),
    );

    Ok(MovieMetadata {
        provider_id: format!("tmdb-{}", detail.id.unwrap_or(movie_id)),
        title,
        description: detail.overview.unwrap_or_default(),
        poster_url: detail
            .poster_path
            .filter(|path| !path.is_empty())
            .map(|path| format!("{POSTER_BASE_URL}{path}")),
        duration: detail.runtime.map(format_runtime).unwrap_or_default(),
        rating: detail.vote_average.unwrap_or(0.0) as f32,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_runtime() {
        assert_eq!(format_runtime(136), "2 hr 16 min");
        assert_eq!(format_runtime(45), "0 hr 45 min");
    }

    #[test]
    fn maps_movie_detail() {
        let detail: MovieDetail = serde_json::from_value(serde_json::json!({
            "id": 603,
            "title": "The Matrix",
            "release_date": "1999-03-30",
            "overview": "A hacker learns the truth.",
            "poster_path": "/matrix.jpg",
            "runtime": 136,
            "vote_average": 8.2,
            "genres": [{"id": 28, "name": "Action"}, {"id": 878, "name": "Science Fiction"}]
        }))
        .unwrap();

        let metadata = extract(detail, 603).unwrap();
        assert_eq!(metadata.title, "The Matrix (1999)");
        assert_eq!(metadata.duration, "2 hr 16 min");
        assert_eq!(metadata.tags, vec!["IMDB", "Action", "Science Fiction"]);
        assert_eq!(
            metadata.poster_url.as_deref(),
            Some("https://image.tmdb.org/t/p/w300/matrix.jpg")
        );
        assert_eq!(metadata.provider_id, "tmdb-603");
    }

    #[test]
    fn missing_release_date_keeps_plain_title() {
        let detail: MovieDetail =
            serde_json::from_value(serde_json::json!({"title": "Untitled", "genres": null}))
                .unwrap();
        let metadata = extract(detail, 1).unwrap();
        assert_eq!(metadata.title, "Untitled");
        assert!(metadata.duration.is_empty());
    }
}
