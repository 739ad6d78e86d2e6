//! Poster storage
//!
//! Posters are decoded, resized to a fixed width and written as JPEG under
//! the posters directory. Movies without a poster point at [`UNKNOWN_POSTER`].

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::data::UNKNOWN_POSTER;
use crate::error::{AppError, Result};
use crate::security::random_token;

/// Width of every stored poster
pub const POSTER_WIDTH: u32 = 200;

/// Maximum accepted upload size
pub const MAX_POSTER_BYTES: usize = 10 * 1024 * 1024;

const MAX_STEM_LENGTH: usize = 64;
const UPLOAD_SUFFIX_LENGTH: usize = 12;
const PUBLIC_PREFIX: &str = "posters/";

/// Keep file names to a safe character set.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LENGTH)
        .collect();
    if stem.is_empty() {
        "poster".to_string()
    } else {
        stem
    }
}

fn resize(image: &DynamicImage) -> DynamicImage {
    let (width, height) = (image.width().max(1), image.height());
    let scaled_height = ((u64::from(height) * u64::from(POSTER_WIDTH)) / u64::from(width)).max(1);
    let scaled_height = u32::try_from(scaled_height).unwrap_or(u32::MAX);
    DynamicImage::ImageRgb8(
        image
            .resize_exact(POSTER_WIDTH, scaled_height, FilterType::Lanczos3)
            .to_rgb8(),
    )
}

/// Decode `bytes`, resize and write to `path`.
fn encode_to(bytes: &[u8], path: &Path) -> Result<()> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| AppError::InvalidInput(format!("unreadable image: {e}")))?;
    resize(&image)
        .save_with_format(path, ImageFormat::Jpeg)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to write poster: {e}")))
}

/// Writes posters into one directory
#[derive(Clone)]
pub struct PosterStore {
    dir: PathBuf,
    client: reqwest::Client,
}

impl PosterStore {
    pub fn new(dir: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            dir: dir.into(),
            client,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store an image and return the path a browser loads it from.
    ///
    /// # Errors
    /// `InvalidInput` when the bytes are not a decodable image.
    pub async fn store(&self, bytes: Vec<u8>, name: &str) -> Result<String> {
        if bytes.len() > MAX_POSTER_BYTES {
            return Err(AppError::InvalidInput(
                "poster exceeds the 10 MiB limit".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = format!("{}.jpg", file_stem(name));
        let path = self.dir.join(&file_name);
        tokio::task::spawn_blocking(move || encode_to(&bytes, &path))
            .await
            .map_err(|e| AppError::Internal(e.into()))??;

        tracing::debug!(file = %file_name, "Poster stored");
        Ok(format!("{PUBLIC_PREFIX}{file_name}"))
    }

    /// Store an uploaded poster under a fresh name derived from `title`.
    ///
    /// Titles that sanitize to the same stem still get separate files.
    pub async fn store_upload(&self, bytes: Vec<u8>, title: &str) -> Result<String> {
        let name = format!("{}-{}", file_stem(title), random_token(UPLOAD_SUFFIX_LENGTH));
        self.store(bytes, &name).await
    }

    /// Delete a poster written by this store.
    ///
    /// The unknown poster and paths outside the directory are left alone.
    pub async fn discard(&self, path: &str) {
        let Some(file_name) = path.strip_prefix(PUBLIC_PREFIX) else {
            return;
        };
        if file_name.is_empty()
            || file_name.starts_with('.')
            || file_name.contains(['/', '\\'])
        {
            return;
        }
        match tokio::fs::remove_file(self.dir.join(file_name)).await {
            Ok(()) => tracing::debug!(file = %file_name, "Poster discarded"),
            Err(error) => tracing::warn!(%error, file = %file_name, "Failed to discard poster"),
        }
    }

    /// Download a remote poster and store it.
    ///
    /// Never fails: any problem is logged and the unknown poster returned.
    pub async fn fetch(&self, url: &str, name: &str) -> String {
        match self.download(url).await {
            Ok(bytes) => match self.store(bytes, name).await {
                Ok(path) => path,
                Err(error) => {
                    tracing::warn!(%error, url, "Failed to store poster");
                    UNKNOWN_POSTER.to_string()
                }
            },
            Err(error) => {
                tracing::warn!(%error, url, "Failed to download poster");
                UNKNOWN_POSTER.to_string()
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
