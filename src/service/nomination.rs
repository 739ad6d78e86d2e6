//! Nomination service
//!
//! Turns a submitted nomination form into a stored movie, and carries the
//! moderation operations on nominated movies.

use std::sync::Arc;

use crate::data::{DataConnector, Link, Movie, Tag, UNKNOWN_POSTER, User};
use crate::error::{AppError, FormErrors, Result};
use crate::metadata::{MetadataPolicy, MetadataSource, PosterStore, parse_link};
use crate::settings::{Settings, keys};

/// Uploaded poster image
#[derive(Debug, Clone, Default)]
pub struct PosterUpload {
    pub bytes: Vec<u8>,
}

/// Submitted nomination form
#[derive(Debug, Clone, Default)]
pub struct NominationForm {
    pub title: String,
    pub description: String,
    /// One link per line, the first is the source link
    pub links: String,
    pub remarks: String,
    /// Fill title, description and poster from the source link's provider
    pub autofill: bool,
    pub poster: Option<PosterUpload>,
}

/// Admin edit of a stored movie; absent fields stay unchanged
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct MovieEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub remarks: Option<String>,
    pub duration: Option<String>,
    pub rating: Option<f32>,
}

/// Nomination service
pub struct NominationService {
    db: Arc<dyn DataConnector>,
    settings: Settings,
    metadata: Arc<dyn MetadataSource>,
    posters: PosterStore,
}

impl NominationService {
    pub fn new(
        db: Arc<dyn DataConnector>,
        settings: Settings,
        metadata: Arc<dyn MetadataSource>,
        posters: PosterStore,
    ) -> Self {
        Self {
            db,
            settings,
            metadata,
            posters,
        }
    }

    async fn parse_links(&self, raw: &str, errors: &mut FormErrors) -> Result<Vec<Link>> {
        let max_length = self.settings.int(keys::MAX_LINK_LENGTH).await?;
        let mut links: Vec<Link> = Vec::new();
        for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if line.chars().count() as i64 > max_length {
                errors.add("Links", format!("links must be at most {max_length} characters"));
                continue;
            }
            match parse_link(line) {
                Ok(link) => {
                    if !links
                        .iter()
                        .any(|existing| existing.url.eq_ignore_ascii_case(&link.url))
                    {
                        links.push(link);
                    }
                }
                Err(error) => errors.add("Links", error.to_string()),
            }
        }
        if links.is_empty() {
            errors.add("Links", "at least one link is required");
        }
        Ok(links)
    }

    /// Validate and store a nomination.
    ///
    /// # Errors
    /// `Form` with one message per rejected field; storage errors unchanged.
    pub async fn submit(&self, user: &User, form: NominationForm) -> Result<Movie> {
        let mut errors = FormErrors::new();

        let links = self.parse_links(&form.links, &mut errors).await?;

        let max_remarks = self.settings.int(keys::MAX_REMARKS_LENGTH).await?;
        let remarks = form.remarks.trim().to_string();
        if remarks.chars().count() as i64 > max_remarks {
            errors.add("Remarks", format!("must be at most {max_remarks} characters"));
        }

        if !form.autofill && !self.settings.flag(keys::FORMFILL_ENABLED).await? {
            errors.add("AutofillBox", "manual entry is disabled, use autofill");
        }
        errors.clone().into_result()?;

        if self.db.get_current_cycle().await?.is_none() {
            return Err(AppError::Conflict("no cycle is open".to_string()));
        }

        let mut movie = Movie::new(String::new(), user.id);
        movie.remarks = remarks;
        let mut tag_names = Vec::new();

        if form.autofill {
            let policy = MetadataPolicy::load(&self.settings).await?;
            let metadata = match self.metadata.fetch(&links[0], &policy).await {
                Ok(metadata) => metadata,
                Err(AppError::Metadata(message)) => {
                    errors.add("AutofillBox", message);
                    return Err(AppError::Form(errors));
                }
                Err(error) => return Err(error),
            };
            if self.db.check_movie_exists(&metadata.title).await? {
                errors.add("Title", format!("{:?} was already nominated", metadata.title));
                return Err(AppError::Form(errors));
            }

            movie.poster = match &metadata.poster_url {
                Some(url) => self.posters.fetch(url, &metadata.provider_id).await,
                None => UNKNOWN_POSTER.to_string(),
            };
            movie.name = metadata.title;
            movie.description = metadata.description;
            movie.duration = metadata.duration;
            movie.rating = metadata.rating;
            tag_names = metadata.tags;
        } else {
            let title = form.title.trim().to_string();
            let max_title = self.settings.int(keys::MAX_TITLE_LENGTH).await?;
            if title.is_empty() {
                errors.add("Title", "title is required");
            } else if title.chars().count() as i64 > max_title {
                errors.add("Title", format!("must be at most {max_title} characters"));
            } else if self.db.check_movie_exists(&title).await? {
                errors.add("Title", format!("{title:?} was already nominated"));
            }

            let max_description = self.settings.int(keys::MAX_DESCRIPTION_LENGTH).await?;
            let description = form.description.trim().to_string();
            if description.chars().count() as i64 > max_description {
                errors.add(
                    "Description",
                    format!("must be at most {max_description} characters"),
                );
            }
            errors.clone().into_result()?;

            if let Some(upload) = form.poster.filter(|upload| !upload.bytes.is_empty()) {
                match self.posters.store_upload(upload.bytes, &title).await {
                    Ok(path) => movie.poster = path,
                    Err(AppError::InvalidInput(message)) => {
                        errors.add("PosterFile", message);
                        return Err(AppError::Form(errors));
                    }
                    Err(error) => return Err(error),
                }
            }
            movie.name = title;
            movie.description = description;
        }

        movie.approved =
            user.is_admin() || !self.settings.flag(keys::ENTRIES_REQUIRE_APPROVAL).await?;

        let id = match self.persist(&mut movie, links, tag_names).await {
            Ok(id) => id,
            Err(error) => {
                self.discard_poster(&movie, form.autofill).await;
                return Err(error);
            }
        };
        crate::metrics::NOMINATIONS_TOTAL.inc();
        tracing::info!(movie_id = id, user_id = user.id, autofill = form.autofill, "Movie nominated");
        self.db.get_movie(id).await
    }

    async fn persist(
        &self,
        movie: &mut Movie,
        links: Vec<Link>,
        tag_names: Vec<String>,
    ) -> Result<i64> {
        for (position, mut link) in links.into_iter().enumerate() {
            link.id = self.db.add_link(&link).await?;
            link.is_source = position == 0;
            movie.links.push(link);
        }
        for name in tag_names {
            let mut tag = Tag::named(name);
            tag.id = self.db.add_tag(&tag).await?;
            if !movie.tags.iter().any(|existing| existing.id == tag.id) {
                movie.tags.push(tag);
            }
        }
        self.db.add_movie(movie).await
    }

    /// Remove the poster of a nomination that was not stored.
    ///
    /// Provider posters are named by provider id, so one is kept while a
    /// movie with the same title exists.
    async fn discard_poster(&self, movie: &Movie, autofill: bool) {
        if movie.poster == UNKNOWN_POSTER {
            return;
        }
        if autofill && self.db.check_movie_exists(&movie.name).await.unwrap_or(true) {
            return;
        }
        self.posters.discard(&movie.poster).await;
    }

    // =========================================================================
    // Moderation
    // =========================================================================

    pub async fn approve(&self, movie_id: i64) -> Result<Movie> {
        let mut movie = self.db.get_movie(movie_id).await?;
        movie.approved = true;
        self.db.update_movie(&movie).await?;
        tracing::info!(movie_id, "Movie approved");
        self.db.get_movie(movie_id).await
    }

    /// Soft-remove a movie; its votes are dropped.
    pub async fn remove(&self, movie_id: i64) -> Result<()> {
        self.db.remove_movie(movie_id).await?;
        tracing::info!(movie_id, "Movie removed");
        Ok(())
    }

    pub async fn edit(&self, movie_id: i64, edit: &MovieEdit) -> Result<Movie> {
        let mut movie = self.db.get_movie(movie_id).await?;
        if let Some(name) = &edit.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::InvalidInput("name must not be empty".to_string()));
            }
            movie.name = name.to_string();
        }
        if let Some(description) = &edit.description {
            movie.description = description.clone();
        }
        if let Some(remarks) = &edit.remarks {
            movie.remarks = remarks.clone();
        }
        if let Some(duration) = &edit.duration {
            movie.duration = duration.clone();
        }
        if let Some(rating) = edit.rating {
            if !(0.0..=10.0).contains(&rating) {
                return Err(AppError::InvalidInput(
                    "rating must be between 0 and 10".to_string(),
                ));
            }
            movie.rating = rating;
        }
        self.db.update_movie(&movie).await?;
        self.db.get_movie(movie_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AuthMethod, DocumentStore, LinkType, Privilege};
    use crate::metadata::{MockMetadataSource, MovieMetadata};

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Arc<dyn DataConnector>,
        settings: Settings,
        user: User,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let db: Arc<dyn DataConnector> = Arc::new(
            DocumentStore::open(&dir.path().join("data.json"))
                .await
                .unwrap(),
        );
        db.add_cycle(None).await.unwrap();
        let mut user = User::new("alice", "");
        user.auth_methods.push(AuthMethod::local("hash".to_string()));
        user.id = db.add_user(&user).await.unwrap();
        let settings = Settings::new(db.clone());
        Fixture {
            _dir: dir,
            db,
            settings,
            user,
        }
    }

    fn service(f: &Fixture, metadata: MockMetadataSource) -> NominationService {
        NominationService::new(
            f.db.clone(),
            f.settings.clone(),
            Arc::new(metadata),
            PosterStore::new(f._dir.path().join("posters"), reqwest::Client::new()),
        )
    }

    fn matrix() -> MovieMetadata {
        MovieMetadata {
            provider_id: "tmdb-603".to_string(),
            title: "The Matrix (1999)".to_string(),
            description: "A hacker learns the truth.".to_string(),
            poster_url: None,
            duration: "2 hr 16 min".to_string(),
            rating: 8.2,
            tags: vec!["IMDB".to_string(), "Action".to_string()],
        }
    }

    fn form(title: &str, links: &str) -> NominationForm {
        NominationForm {
            title: title.to_string(),
            links: links.to_string(),
            ..NominationForm::default()
        }
    }

    #[tokio::test]
    async fn autofill_uses_source_link_provider() {
        let f = fixture().await;
        let mut metadata = MockMetadataSource::new();
        metadata
            .expect_fetch()
            .withf(|link, _| link.link_type == LinkType::Imdb)
            .times(1)
            .returning(|_, _| Ok(matrix()));
        let nominations = service(&f, metadata);

        let mut submission = form(
            "",
            "https://www.imdb.com/title/tt0133093/?ref_=x\r\nhttps://example.com/matrix",
        );
        submission.autofill = true;
        let movie = nominations.submit(&f.user, submission).await.unwrap();

        assert_eq!(movie.name, "The Matrix (1999)");
        assert_eq!(movie.poster, UNKNOWN_POSTER);
        assert_eq!(movie.links.len(), 2);
        assert_eq!(
            movie.source_link().map(|link| link.url.as_str()),
            Some("https://www.imdb.com/title/tt0133093")
        );
        assert!(movie.tags.iter().any(|tag| tag.name == "IMDB"));
        assert!(movie.approved);
    }

    #[tokio::test]
    async fn autofill_rejects_duplicates_and_provider_errors() {
        let f = fixture().await;
        f.db.add_movie(&Movie::new("the  matrix (1999)", f.user.id))
            .await
            .unwrap();

        let mut metadata = MockMetadataSource::new();
        metadata.expect_fetch().returning(|_, _| Ok(matrix()));
        let mut submission = form("", "imdb.com/title/tt0133093");
        submission.autofill = true;
        let error = service(&f, metadata)
            .submit(&f.user, submission.clone())
            .await
            .unwrap_err();
        let AppError::Form(fields) = error else {
            panic!("expected form errors");
        };
        assert!(fields.get("Title").is_some());

        let mut failing = MockMetadataSource::new();
        failing
            .expect_fetch()
            .returning(|_, _| Err(AppError::Metadata("entries of type TV are not allowed".into())));
        let error = service(&f, failing)
            .submit(&f.user, submission)
            .await
            .unwrap_err();
        let AppError::Form(fields) = error else {
            panic!("expected form errors");
        };
        assert_eq!(
            fields.get("AutofillBox"),
            Some("entries of type TV are not allowed")
        );
    }

    #[tokio::test]
    async fn form_fill_reports_every_field() {
        let f = fixture().await;
        let mut metadata = MockMetadataSource::new();
        metadata.expect_fetch().never();
        let nominations = service(&f, metadata);

        let mut submission = form("  ", "not a link");
        submission.remarks = "x".repeat(201);
        let error = nominations.submit(&f.user, submission).await.unwrap_err();
        let AppError::Form(fields) = error else {
            panic!("expected form errors");
        };
        assert!(fields.get("Links").is_some());
        assert!(fields.get("Remarks").is_some());

        let error = nominations
            .submit(&f.user, form("", "https://example.com"))
            .await
            .unwrap_err();
        let AppError::Form(fields) = error else {
            panic!("expected form errors");
        };
        assert_eq!(fields.get("Title"), Some("title is required"));
    }

    #[tokio::test]
    async fn form_fill_stores_movie() {
        let f = fixture().await;
        let nominations = service(&f, MockMetadataSource::new());

        let mut submission = form("Heat (1995)", "https://example.com/heat");
        submission.description = "Cops and robbers.".to_string();
        let movie = nominations.submit(&f.user, submission).await.unwrap();
        assert_eq!(movie.name, "Heat (1995)");
        assert_eq!(movie.added_by, f.user.id);
        assert!(movie.tags.is_empty());
        assert!(f.db.check_movie_exists("heat (1995)").await.unwrap());
    }

    fn png() -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(40, 60)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[tokio::test]
    async fn nomination_without_open_cycle_writes_no_poster() {
        let f = fixture().await;
        let mut cycle = f.db.get_current_cycle().await.unwrap().unwrap();
        cycle.ended = Some(crate::data::round_to_second(chrono::Utc::now()));
        f.db.update_cycle(&cycle).await.unwrap();

        let mut metadata = MockMetadataSource::new();
        metadata.expect_fetch().never();
        let nominations = service(&f, metadata);

        let mut submission = form("Heat", "https://example.com/heat");
        submission.poster = Some(PosterUpload { bytes: png() });
        let error = nominations.submit(&f.user, submission).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)));

        let mut autofill = form("", "imdb.com/title/tt0133093");
        autofill.autofill = true;
        let error = nominations.submit(&f.user, autofill).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)));

        let posters = f._dir.path().join("posters");
        assert!(!posters.exists() || std::fs::read_dir(&posters).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn unstored_nomination_discards_its_poster() {
        let f = fixture().await;
        let nominations = service(&f, MockMetadataSource::new());

        let mut upload = Movie::new("Heat", f.user.id);
        upload.poster = nominations.posters.store_upload(png(), "Heat").await.unwrap();
        nominations.discard_poster(&upload, false).await;
        assert!(!f._dir.path().join(&upload.poster).exists());

        f.db.add_movie(&Movie::new("The Matrix (1999)", f.user.id))
            .await
            .unwrap();
        let mut shared = Movie::new("The Matrix (1999)", f.user.id);
        shared.poster = nominations.posters.store(png(), "tmdb-603").await.unwrap();
        nominations.discard_poster(&shared, true).await;
        assert!(f._dir.path().join(&shared.poster).is_file());

        let mut unused = Movie::new("Ronin", f.user.id);
        unused.poster = nominations.posters.store(png(), "tmdb-8195").await.unwrap();
        nominations.discard_poster(&unused, true).await;
        assert!(!f._dir.path().join(&unused.poster).exists());
    }

    #[tokio::test]
    async fn manual_entry_can_be_disabled() {
        let f = fixture().await;
        f.settings
            .set_bool(keys::FORMFILL_ENABLED, false)
            .await
            .unwrap();
        let error = service(&f, MockMetadataSource::new())
            .submit(&f.user, form("Heat", "https://example.com/heat"))
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Form(_)));
    }

    #[tokio::test]
    async fn approval_applies_to_non_admins_only() {
        let f = fixture().await;
        f.settings
            .set_bool(keys::ENTRIES_REQUIRE_APPROVAL, true)
            .await
            .unwrap();
        let nominations = service(&f, MockMetadataSource::new());

        let pending = nominations
            .submit(&f.user, form("Heat", "https://example.com/heat"))
            .await
            .unwrap();
        assert!(!pending.approved);

        let mut admin = f.user.clone();
        admin.privilege = Privilege::Admin;
        let approved = nominations
            .submit(&admin, form("Ronin", "https://example.com/ronin"))
            .await
            .unwrap();
        assert!(approved.approved);

        assert!(nominations.approve(pending.id).await.unwrap().approved);
    }

    #[tokio::test]
    async fn moderation_edits_and_removes() {
        let f = fixture().await;
        let nominations = service(&f, MockMetadataSource::new());
        let movie = nominations
            .submit(&f.user, form("Heat", "https://example.com/heat"))
            .await
            .unwrap();

        let edited = nominations
            .edit(
                movie.id,
                &MovieEdit {
                    duration: Some("2 hr 50 min".to_string()),
                    rating: Some(8.3),
                    ..MovieEdit::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.duration, "2 hr 50 min");
        assert!(
            nominations
                .edit(movie.id, &MovieEdit { rating: Some(11.0), ..MovieEdit::default() })
                .await
                .is_err()
        );

        nominations.remove(movie.id).await.unwrap();
        assert!(f.db.get_active_movies().await.unwrap().is_empty());
    }
}
