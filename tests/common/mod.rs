//! Common test utilities for E2E tests

use std::sync::Arc;

use moviepolls::data::Link;
use moviepolls::error::{AppError, Result};
use moviepolls::metadata::{MetadataPolicy, MetadataSource, MovieMetadata};
use moviepolls::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Metadata source answering every lookup from a fixed table
pub struct StaticMetadata;

#[async_trait::async_trait]
impl MetadataSource for StaticMetadata {
    async fn fetch(&self, source: &Link, _policy: &MetadataPolicy) -> Result<MovieMetadata> {
        if source.url.contains("tt0113277") {
            Ok(MovieMetadata {
                provider_id: "tmdb-949".to_string(),
                title: "Heat (1995)".to_string(),
                description: "A group of high-end professional thieves.".to_string(),
                poster_url: None,
                duration: "2 hr 50 min".to_string(),
                rating: 7.9,
                tags: vec!["IMDB".to_string(), "Crime".to_string()],
            })
        } else {
            Err(AppError::Metadata("unknown entry".to_string()))
        }
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        moviepolls::metrics::init_metrics();

        // Create temporary directory for the document store and posters
        let temp_dir = TempDir::new().unwrap();
        let config = config::AppConfig::for_directory(temp_dir.path());

        // Initialize app state
        let state = AppState::with_metadata_source(config, Arc::new(StaticMetadata))
            .await
            .unwrap();

        // Redirects are asserted on, not followed
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = moviepolls::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// GET with an optional session cookie
    pub async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            request = request.header("Cookie", cookie);
        }
        request.send().await.unwrap()
    }

    /// POST a urlencoded form with an optional session cookie
    pub async fn post_form(
        &self,
        path: &str,
        cookie: Option<&str>,
        form: &[(&str, &str)],
    ) -> reqwest::Response {
        let mut request = self.client.post(self.url(path)).form(form);
        if let Some(cookie) = cookie {
            request = request.header("Cookie", cookie);
        }
        request.send().await.unwrap()
    }

    /// Sign up a local user and return its session cookie.
    pub async fn signup(&self, name: &str, password: &str) -> String {
        let response = self
            .post_form(
                "/user/new",
                None,
                &[("Username", name), ("Password", password), ("Email", "")],
            )
            .await;
        assert_eq!(response.status(), 303, "signup of {name} failed");
        session_cookie(&response).expect("signup sets a session cookie")
    }

    /// Sign up a user and make it the site admin through the claim key.
    pub async fn signup_admin(&self, name: &str) -> String {
        let cookie = self.signup(name, "admin-password").await;
        let key = self
            .state
            .accounts
            .bootstrap_admin()
            .await
            .unwrap()
            .expect("no admin exists yet");

        let response = self
            .post_form(
                &format!("/auth/{}", key.url),
                Some(&cookie),
                &[("Key", key.key.as_str())],
            )
            .await;
        assert_eq!(response.status(), 303);
        cookie
    }

    /// Start a cycle as `admin`.
    pub async fn start_cycle(&self, admin: &str) {
        let response = self
            .post_form("/admin/cycles", Some(admin), &[("Action", "start")])
            .await;
        assert_eq!(response.status(), 200);
    }

    /// Nominate a movie by hand and return its id.
    pub async fn nominate(&self, cookie: &str, title: &str, link: &str) -> i64 {
        let response = self
            .post_form(
                "/add",
                Some(cookie),
                &[("Title", title), ("Links", link), ("Description", "")],
            )
            .await;
        assert_eq!(response.status(), 200, "nomination of {title} failed");
        let body: serde_json::Value = response.json().await.unwrap();
        body["movie"]["id"].as_i64().unwrap()
    }
}

/// `name=value` of the session cookie set by a response
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter(|value| value.starts_with("moviepoll-session="))
        .filter_map(|value| value.split(';').next())
        .map(str::to_string)
        .find(|pair| pair.len() > "moviepoll-session=".len())
}

/// Location header of a redirect
pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
