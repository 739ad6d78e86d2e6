//! Link validation and classification

use lazy_static::lazy_static;
use regex::Regex;

use crate::data::{Link, LinkType};
use crate::error::{AppError, Result};

/// Hosts rewritten to their canonical form before storing.
const CANONICAL_HOSTS: &[(&str, &str)] = &[
    ("m.imdb.com", "imdb.com"),
    ("m.myanimelist.net", "myanimelist.net"),
];

lazy_static! {
    static ref HOST_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9:._+]{1,256}\.[A-Za-z0-9()]{1,6}[A-Za-z0-9%_:+./]*")
            .expect("host pattern is valid");
    static ref MAL_ID: Regex =
        Regex::new(r"myanimelist\.net/anime/(\d+)").expect("MAL pattern is valid");
    static ref IMDB_ID: Regex =
        Regex::new(r"imdb\.com/title/(tt\d+)").expect("IMDb pattern is valid");
}

/// Normalize a submitted link.
///
/// # Errors
/// `InvalidInput` when nothing that looks like a host remains.
pub fn normalize_link(raw: &str) -> Result<String> {
    let mut link = raw.trim().to_string();
    if let Some(cut) = link.find("/?") {
        link.truncate(cut);
    }

    let (scheme, rest) = match link.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest.to_string()),
        None => ("https".to_string(), link),
    };
    if scheme != "http" && scheme != "https" {
        return Err(AppError::InvalidInput(format!(
            "unsupported link scheme {scheme:?}"
        )));
    }

    let mut rest = rest;
    for (from, to) in CANONICAL_HOSTS {
        if let Some(tail) = rest.strip_prefix(from) {
            rest = format!("{to}{tail}");
            break;
        }
    }

    if !HOST_PATTERN.is_match(&rest) {
        return Err(AppError::InvalidInput(format!("{:?} is not a valid link", raw.trim())));
    }
    Ok(format!("{scheme}://{rest}"))
}

/// Provider classification by substring
pub fn classify_link(url: &str) -> LinkType {
    let lower = url.to_ascii_lowercase();
    if lower.contains("imdb") {
        LinkType::Imdb
    } else if lower.contains("myanimelist") {
        LinkType::MyAnimeList
    } else {
        LinkType::Misc
    }
}

/// Normalize and classify one submitted link.
pub fn parse_link(raw: &str) -> Result<Link> {
    let url = normalize_link(raw)?;
    Ok(Link {
        id: 0,
        link_type: classify_link(&url),
        url,
        is_source: false,
    })
}

/// MyAnimeList anime id from a link
pub fn mal_id(url: &str) -> Option<u64> {
    MAL_ID
        .captures(url)
        .and_then(|captures| captures.get(1))
        .and_then(|id| id.as_str().parse().ok())
}

/// IMDb title id (`tt...`) from a link
pub fn imdb_id(url: &str) -> Option<String> {
    IMDB_ID
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}
