//! Jikan (MyAnimeList) provider

use serde::Deserialize;

use super::{MetadataPolicy, MovieMetadata, fetch_json};
use crate::error::{AppError, Result};

/// Sentinel tag attached to every MyAnimeList entry
pub const MAL_TAG: &str = "MAL";

pub const DEFAULT_BASE_URL: &str = "https://api.jikan.moe/v3";

#[derive(Debug, Deserialize)]
pub(super) struct AnimeResponse {
    #[serde(default)]
    mal_id: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_english: Option<String>,
    #[serde(default)]
    synopsis: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    episodes: Option<i64>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    genres: Option<Vec<Genre>>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    #[serde(default)]
    name: Option<String>,
}

/// Minutes in a Jikan duration string ("1 hr 55 min", "24 min per ep").
pub fn duration_minutes(duration: &str) -> i64 {
    let words: Vec<&str> = duration.split_whitespace().collect();
    let mut minutes = 0;
    for pair in words.windows(2) {
        let Ok(value) = pair[0].parse::<i64>() else {
            continue;
        };
        match pair[1].trim_end_matches('.') {
            "hr" | "hrs" | "hour" | "hours" => minutes += value * 60,
            "min" | "mins" | "minutes" => minutes += value,
            _ => {}
        }
    }
    minutes
}

pub(super) async fn fetch(
    client: &reqwest::Client,
    base_url: &str,
    id: u64,
    policy: &MetadataPolicy,
) -> Result<MovieMetadata> {
    let url = format!("{}/anime/{id}", base_url.trim_end_matches('/'));
    let anime: AnimeResponse = fetch_json(client.get(&url)).await?;
    extract(anime, id, policy)
}

/// Apply the admin's filters and map the response.
pub(super) fn extract(anime: AnimeResponse, id: u64, policy: &MetadataPolicy) -> Result<MovieMetadata> {
    let kind = anime.kind.unwrap_or_default();
    if policy
        .banned_types
        .iter()
        .any(|banned| banned.eq_ignore_ascii_case(&kind))
    {
        return Err(AppError::Metadata(format!(
            "entries of type {kind} are not allowed"
        )));
    }

    let episodes = anime.episodes.unwrap_or(0);
    if policy.max_episodes > 0 && episodes > policy.max_episodes {
        return Err(AppError::Metadata(format!(
            "entry has {episodes} episodes, at most {} allowed",
            policy.max_episodes
        )));
    }

    let duration = anime.duration.unwrap_or_default();
    if episodes > 1 && policy.max_mult_ep_length > 0 {
        let total = duration_minutes(&duration) * episodes;
        if total > policy.max_mult_ep_length {
            return Err(AppError::Metadata(format!(
                "total runtime of {total} min exceeds {} min",
                policy.max_mult_ep_length
            )));
        }
    }

    let title = anime
        .title
        .filter(|title| !title.trim().is_empty())
        .ok_or_else(|| AppError::Metadata("entry has no title".to_string()))?;
    let title = match anime.title_english {
        Some(english) if !english.trim().is_empty() && !english.eq_ignore_ascii_case(&title) => {
            format!("{title} ({english})")
        }
        _ => title,
    };

    let mut tags = vec![MAL_TAG.to_string()];
    tags.extend(
        anime
            .genres
            .unwrap_or_default()
            .into_iter()
            .filter_map(|genre| genre.name),
    );

    Ok(MovieMetadata {
        provider_id: format!("mal-{}", anime.mal_id.unwrap_or(id)),
        title,
        description: anime.synopsis.unwrap_or_default(),
        poster_url: anime.image_url,
        duration,
        rating: anime.score.unwrap_or(0.0) as f32,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MetadataPolicy {
        MetadataPolicy {
            jikan_enabled: true,
            banned_types: vec!["TV".to_string(), "music".to_string()],
            max_episodes: 1,
            max_mult_ep_length: 120,
            tmdb_enabled: false,
            tmdb_token: String::new(),
        }
    }

    fn anime(json: serde_json::Value) -> AnimeResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn parses_duration_strings() {
        assert_eq!(duration_minutes("1 hr 55 min"), 115);
        assert_eq!(duration_minutes("24 min per ep"), 24);
        assert_eq!(duration_minutes("Unknown"), 0);
    }

    #[test]
    fn maps_movie_entry() {
        let metadata = extract(
            anime(serde_json::json!({
                "mal_id": 199,
                "title": "Sen to Chihiro no Kamikakushi",
                "title_english": "Spirited Away",
                "synopsis": "A girl in a spirit world.",
                "image_url": "https://cdn.example/199.jpg",
                "type": "Movie",
                "episodes": 1,
                "duration": "2 hr 5 min",
                "score": 8.78,
                "genres": [{"name": "Adventure"}, {"name": "Fantasy"}]
            })),
            199,
            &policy(),
        )
        .unwrap();

        assert_eq!(
            metadata.title,
            "Sen to Chihiro no Kamikakushi (Spirited Away)"
        );
        assert_eq!(metadata.tags, vec!["MAL", "Adventure", "Fantasy"]);
        assert_eq!(metadata.provider_id, "mal-199");
        assert_eq!(metadata.duration, "2 hr 5 min");
    }

    #[test]
    fn rejects_banned_types_case_insensitively() {
        let error = extract(
            anime(serde_json::json!({"title": "Song", "type": "Music", "episodes": 1})),
            5,
            &policy(),
        )
        .unwrap_err();
        assert!(matches!(error, AppError::Metadata(_)));
    }

    #[test]
    fn enforces_episode_caps() {
        let mut policy = policy();
        let too_many = serde_json::json!({
            "title": "OVA", "type": "OVA", "episodes": 6, "duration": "25 min per ep"
        });
        assert!(extract(anime(too_many.clone()), 1, &policy).is_err());

        policy.max_episodes = 0;
        assert!(extract(anime(too_many), 1, &policy).is_err());

        let short = serde_json::json!({
            "title": "Shorts", "type": "OVA", "episodes": 4, "duration": "12 min per ep"
        });
        assert!(extract(anime(short), 1, &policy).is_ok());
    }

    #[test]
    fn tolerates_missing_fields() {
        let metadata = extract(anime(serde_json::json!({"title": "Bare"})), 7, &policy()).unwrap();
        assert_eq!(metadata.provider_id, "mal-7");
        assert!(metadata.poster_url.is_none());
        assert_eq!(metadata.rating, 0.0);
    }
}
