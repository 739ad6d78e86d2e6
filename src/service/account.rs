//! Account service
//!
//! Signup, login and credential management for site users, plus the
//! admin operations on accounts.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::data::{
    AuthMethod, AuthType, DELETED_USER_NAME, DataConnector, Privilege, User, next_credential_date,
    round_to_second,
};
use crate::error::{AppError, FormErrors, Result};
use crate::security::{UrlKey, UrlKeyKind, UrlKeys, hash_password};
use crate::settings::{Settings, keys};

const USER_PAGE_SIZE: i64 = 100;

/// Identity and tokens returned by an OAuth provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthGrant {
    pub ext_id: String,
    /// Display name suggested by the provider
    pub name: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Token expiry; becomes the method's `date`
    pub expires_at: DateTime<Utc>,
}

impl OAuthGrant {
    fn auth_method(&self, auth_type: AuthType) -> AuthMethod {
        AuthMethod::oauth(
            auth_type,
            self.ext_id.clone(),
            self.access_token.clone(),
            self.refresh_token.clone(),
            self.expires_at,
        )
    }
}

/// Profile fields a user may edit
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub notify_cycle_end: Option<bool>,
    pub notify_vote_selection: Option<bool>,
}

fn record_login(method: AuthType, result: &Result<User>) {
    let status = if result.is_ok() { "success" } else { "failure" };
    crate::metrics::LOGINS_TOTAL
        .with_label_values(&[method.as_str(), status])
        .inc();
}

/// Account service
pub struct AccountService {
    db: Arc<dyn DataConnector>,
    settings: Settings,
    url_keys: UrlKeys,
}

impl AccountService {
    pub fn new(db: Arc<dyn DataConnector>, settings: Settings, url_keys: UrlKeys) -> Self {
        Self {
            db,
            settings,
            url_keys,
        }
    }

    pub async fn get_user(&self, id: i64) -> Result<User> {
        self.db.get_user(id).await
    }

    async fn hash(&self, password: &str) -> Result<String> {
        Ok(hash_password(password, &self.settings.password_salt().await?))
    }

    async fn check_name(&self, name: &str, errors: &mut FormErrors) -> Result<()> {
        let min = self.settings.int(keys::MIN_NAME_LENGTH).await?;
        let max = self.settings.int(keys::MAX_NAME_LENGTH).await?;
        let length = name.chars().count() as i64;
        if length < min {
            errors.add("Username", format!("must be at least {min} characters"));
        } else if length > max {
            errors.add("Username", format!("must be at most {max} characters"));
        } else if name.eq_ignore_ascii_case(DELETED_USER_NAME) {
            errors.add("Username", "name is reserved");
        }
        Ok(())
    }

    async fn check_password(
        &self,
        field: &str,
        password: &str,
        errors: &mut FormErrors,
    ) -> Result<()> {
        let min = self.settings.int(keys::MIN_PASSWORD_LENGTH).await?;
        if (password.chars().count() as i64) < min {
            errors.add(field, format!("must be at least {min} characters"));
        }
        Ok(())
    }

    // =========================================================================
    // Local accounts
    // =========================================================================

    /// Create a user with a LOCAL login.
    ///
    /// # Errors
    /// - `PolicyDisabled` when local signup is off
    /// - `Form` for name or password outside the configured bounds
    /// - `Conflict` when the name is taken
    pub async fn signup_local(&self, name: &str, password: &str, email: &str) -> Result<User> {
        if !self.settings.signup_enabled(AuthType::Local).await? {
            return Err(AppError::PolicyDisabled(
                "local signup is disabled".to_string(),
            ));
        }

        let name = name.trim();
        let mut errors = FormErrors::new();
        self.check_name(name, &mut errors).await?;
        self.check_password("Password", password, &mut errors).await?;
        errors.into_result()?;

        if self.db.check_user_exists(name).await? {
            return Err(AppError::Conflict(format!("name {name:?} is already taken")));
        }

        let mut user = User::new(name, email.trim());
        user.auth_methods
            .push(AuthMethod::local(self.hash(password).await?));
        let id = self.db.add_user(&user).await?;
        tracing::info!(user_id = id, "Local account created");
        self.db.get_user(id).await
    }

    /// Authenticate by name and password.
    ///
    /// # Errors
    /// `Unauthorized` for unknown names or wrong passwords.
    pub async fn login_local(&self, name: &str, password: &str) -> Result<User> {
        let hash = self.hash(password).await?;
        let result = self.db.user_local_login(name.trim(), &hash).await;
        record_login(AuthType::Local, &result);
        result
    }

    /// Set a new password, or add a LOCAL login when the user has none.
    ///
    /// With an existing LOCAL login `current` must match it. The method's
    /// date moves forward, invalidating every session bound to it.
    pub async fn change_password(
        &self,
        user: &User,
        current: Option<&str>,
        new_password: &str,
    ) -> Result<User> {
        let mut errors = FormErrors::new();
        self.check_password("Password", new_password, &mut errors)
            .await?;

        if let Some(local) = user.auth_method(AuthType::Local) {
            let given = self.hash(current.unwrap_or_default()).await?;
            if local.password.as_deref() != Some(given.as_str()) {
                errors.add("CurrentPassword", "current password is wrong");
            }
        }
        errors.into_result()?;

        self.set_password(user, new_password).await
    }

    async fn set_password(&self, user: &User, new_password: &str) -> Result<User> {
        let hash = self.hash(new_password).await?;
        match user.auth_method(AuthType::Local) {
            Some(local) => {
                let mut local = local.clone();
                local.password = Some(hash);
                local.date = next_credential_date(local.date);
                self.db.update_auth_method(&local).await?;
            }
            None => {
                self.db
                    .add_user_auth_method(user.id, &AuthMethod::local(hash))
                    .await?;
            }
        }
        tracing::info!(user_id = user.id, "Password changed");
        self.db.get_user(user.id).await
    }

    // =========================================================================
    // OAuth accounts
    // =========================================================================

    /// Log in through an existing provider binding, storing the new tokens.
    ///
    /// # Errors
    /// `NotFound` when no user is bound to the provider account.
    pub async fn login_oauth(&self, auth_type: AuthType, grant: &OAuthGrant) -> Result<User> {
        self.settings.require_oauth(auth_type).await?;
        let result = self.refresh_binding(auth_type, grant).await;
        record_login(auth_type, &result);
        result
    }

    async fn refresh_binding(&self, auth_type: AuthType, grant: &OAuthGrant) -> Result<User> {
        let user = self.db.user_oauth_login(auth_type, &grant.ext_id).await?;
        if let Some(method) = user.auth_method(auth_type) {
            let mut method = method.clone();
            method.access_token = Some(grant.access_token.clone());
            if grant.refresh_token.is_some() {
                method.refresh_token = grant.refresh_token.clone();
            }
            method.date = round_to_second(grant.expires_at);
            self.db.update_auth_method(&method).await?;
        }
        self.db.get_user(user.id).await
    }

    /// Store refreshed tokens for an existing binding.
    pub async fn update_tokens(&self, method: &AuthMethod, grant: &OAuthGrant) -> Result<()> {
        let mut method = method.clone();
        method.access_token = Some(grant.access_token.clone());
        if grant.refresh_token.is_some() {
            method.refresh_token = grant.refresh_token.clone();
        }
        method.date = next_credential_date(method.date).max(round_to_second(grant.expires_at));
        self.db.update_auth_method(&method).await
    }

    /// Create a user from a provider identity.
    ///
    /// # Errors
    /// - `PolicyDisabled` when signup through the provider is off
    /// - `Conflict` when the provider account or name is already in use
    pub async fn signup_oauth(&self, auth_type: AuthType, grant: &OAuthGrant) -> Result<User> {
        if !self.settings.signup_enabled(auth_type).await? {
            return Err(AppError::PolicyDisabled(format!(
                "signup with {auth_type} is disabled"
            )));
        }
        if self.db.check_oauth_usage(&grant.ext_id, auth_type).await? {
            return Err(AppError::Conflict(format!(
                "this {auth_type} account is already linked"
            )));
        }

        let max = self.settings.int(keys::MAX_NAME_LENGTH).await?;
        let mut name: String = grant
            .name
            .trim()
            .chars()
            .take(usize::try_from(max).unwrap_or(0))
            .collect();
        if name.is_empty() || name.eq_ignore_ascii_case(DELETED_USER_NAME) {
            name = format!("{}-{}", auth_type.as_str().to_lowercase(), grant.ext_id);
        }
        if self.db.check_user_exists(&name).await? {
            return Err(AppError::Conflict(format!("name {name:?} is already taken")));
        }

        let mut user = User::new(name, grant.email.trim());
        user.auth_methods.push(grant.auth_method(auth_type));
        let id = self.db.add_user(&user).await?;
        tracing::info!(user_id = id, provider = %auth_type, "OAuth account created");
        self.db.get_user(id).await
    }

    /// Bind a provider account to a logged-in user.
    ///
    /// # Errors
    /// `Conflict` when the user already has this provider or the provider
    /// account belongs to someone else.
    pub async fn link_oauth(
        &self,
        user: &User,
        auth_type: AuthType,
        grant: &OAuthGrant,
    ) -> Result<User> {
        self.settings.require_oauth(auth_type).await?;
        if user.has_auth(auth_type) {
            return Err(AppError::Conflict(format!(
                "a {auth_type} login is already linked"
            )));
        }
        if self.db.check_oauth_usage(&grant.ext_id, auth_type).await? {
            return Err(AppError::Conflict(format!(
                "this {auth_type} account is already linked"
            )));
        }

        self.db
            .add_user_auth_method(user.id, &grant.auth_method(auth_type))
            .await?;
        tracing::info!(user_id = user.id, provider = %auth_type, "Login method linked");
        self.db.get_user(user.id).await
    }

    /// Drop one login method.
    ///
    /// Returns the updated user; the caller re-establishes the session with
    /// its preferred remaining method.
    ///
    /// # Errors
    /// `NotFound` when the method is not bound, `Conflict` for the last one.
    pub async fn remove_auth_method(&self, user: &User, auth_type: AuthType) -> Result<User> {
        self.db.remove_user_auth_method(user.id, auth_type).await?;
        tracing::info!(user_id = user.id, method = %auth_type, "Login method removed");
        self.db.get_user(user.id).await
    }

    pub async fn update_profile(&self, user: &User, update: &ProfileUpdate) -> Result<User> {
        let mut updated = self.db.get_user(user.id).await?;
        if let Some(email) = &update.email {
            updated.email = email.trim().to_string();
        }
        if let Some(flag) = update.notify_cycle_end {
            updated.notify_cycle_end = flag;
        }
        if let Some(flag) = update.notify_vote_selection {
            updated.notify_vote_selection = flag;
        }
        self.db.update_user_fields(&updated).await?;
        self.db.get_user(user.id).await
    }

    // =========================================================================
    // URL keys
    // =========================================================================

    /// Issue a password reset link for `user_id`.
    pub async fn request_password_reset(&self, user_id: i64) -> Result<UrlKey> {
        let user = self.db.get_user(user_id).await?;
        if user.is_deleted() {
            return Err(AppError::NotFound);
        }
        let key = self
            .url_keys
            .issue(UrlKeyKind::PasswordReset { user_id })
            .await;
        tracing::info!(user_id, "Password reset issued");
        Ok(key)
    }

    /// Kind of a live key, without consuming it.
    pub async fn inspect_url_key(&self, url: &str, key: &str) -> Result<UrlKeyKind> {
        Ok(self.url_keys.verify(url, key).await?.kind)
    }

    /// Redeem a password reset key.
    pub async fn reset_password(&self, url: &str, key: &str, new_password: &str) -> Result<User> {
        let UrlKeyKind::PasswordReset { user_id } = self.url_keys.verify(url, key).await?.kind
        else {
            return Err(AppError::NotFound);
        };

        let mut errors = FormErrors::new();
        self.check_password("Password", new_password, &mut errors)
            .await?;
        errors.into_result()?;

        self.url_keys.consume(url, key).await?;
        let user = self.db.get_user(user_id).await?;
        self.set_password(&user, new_password).await
    }

    /// Issue the admin claim key when no admin exists.
    ///
    /// The claim path is printed to stdout, not logged.
    pub async fn bootstrap_admin(&self) -> Result<Option<UrlKey>> {
        if self.has_admin().await? {
            return Ok(None);
        }

        let key = self.url_keys.issue(UrlKeyKind::AdminAuth).await;
        let host = self.settings.string(keys::HOST_ADDRESS).await?;
        println!(
            "No admin account exists. Log in and visit {}{} to claim it.",
            host.trim_end_matches('/'),
            key.path()
        );
        Ok(Some(key))
    }

    async fn has_admin(&self) -> Result<bool> {
        let mut offset = 0;
        loop {
            let users = self.db.get_users(offset, USER_PAGE_SIZE).await?;
            if users.iter().any(User::is_admin) {
                return Ok(true);
            }
            if (users.len() as i64) < USER_PAGE_SIZE {
                return Ok(false);
            }
            offset += USER_PAGE_SIZE;
        }
    }

    /// Redeem the admin claim key for the logged-in user.
    pub async fn claim_admin(&self, user: &User, url: &str, key: &str) -> Result<User> {
        if self.url_keys.verify(url, key).await?.kind != UrlKeyKind::AdminAuth {
            return Err(AppError::NotFound);
        }
        self.url_keys.consume(url, key).await?;

        let mut updated = self.db.get_user(user.id).await?;
        updated.privilege = Privilege::Admin;
        self.db.update_user_fields(&updated).await?;
        tracing::info!(user_id = user.id, "Admin claimed");
        self.db.get_user(user.id).await
    }

    // =========================================================================
    // Admin operations
    // =========================================================================

    /// `NotFound` unless `user` is an admin, so admin pages stay hidden.
    pub fn check_admin_rights(user: &User) -> Result<()> {
        if user.is_admin() {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    /// Anonymize a user, keeping their votes.
    pub async fn soft_delete(&self, user_id: i64) -> Result<()> {
        let mut user = self.db.get_user(user_id).await?;
        user.name = DELETED_USER_NAME.to_string();
        user.email = String::new();
        user.notify_cycle_end = false;
        user.notify_vote_selection = false;
        user.privilege = Privilege::User;
        user.auth_methods.clear();
        self.db.update_user(&user).await?;
        tracing::info!(user_id, "User deleted");
        Ok(())
    }

    /// Remove a user with their votes and login methods.
    pub async fn purge(&self, user_id: i64) -> Result<()> {
        self.db.get_user(user_id).await?;
        self.db.purge_user(user_id).await?;
        tracing::info!(user_id, "User purged");
        Ok(())
    }

    /// Reserved.
    pub async fn ban(&self, user_id: i64) -> Result<()> {
        self.db.get_user(user_id).await?;
        Err(AppError::PolicyDisabled(
            "banning users is not supported".to_string(),
        ))
    }

    /// One page of users ordered by id
    pub async fn list_users(&self, offset: i64, count: i64) -> Result<Vec<User>> {
        self.db.get_users(offset.max(0), count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DocumentStore, Movie};

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Arc<dyn DataConnector>,
        settings: Settings,
        accounts: AccountService,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let db: Arc<dyn DataConnector> = Arc::new(
            DocumentStore::open(&dir.path().join("data.json"))
                .await
                .unwrap(),
        );
        let settings = Settings::new(db.clone());
        let accounts = AccountService::new(db.clone(), settings.clone(), UrlKeys::new());
        Fixture {
            _dir: dir,
            db,
            settings,
            accounts,
        }
    }

    fn grant(ext_id: &str, name: &str) -> OAuthGrant {
        OAuthGrant {
            ext_id: ext_id.to_string(),
            name: name.to_string(),
            email: format!("{name}@example.com"),
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    async fn enable(settings: &Settings, auth_type: AuthType) {
        let keys = crate::settings::provider_keys(auth_type).unwrap();
        settings.set_bool(keys.enabled, true).await.unwrap();
        settings.set_bool(keys.signup_enabled, true).await.unwrap();
    }

    #[tokio::test]
    async fn local_signup_and_login() {
        let f = fixture().await;
        let user = f
            .accounts
            .signup_local("alice", "correct horse", "a@example.com")
            .await
            .unwrap();
        assert!(user.has_auth(AuthType::Local));

        let logged_in = f.accounts.login_local("ALICE", "correct horse").await.unwrap();
        assert_eq!(logged_in.id, user.id);
        assert!(matches!(
            f.accounts.login_local("alice", "wrong password").await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn signup_validates_and_rejects_duplicates() {
        let f = fixture().await;
        let error = f.accounts.signup_local("al", "short", "").await.unwrap_err();
        let AppError::Form(fields) = error else {
            panic!("expected form errors");
        };
        assert!(fields.get("Username").is_some());
        assert!(fields.get("Password").is_some());

        f.accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        assert!(matches!(
            f.accounts.signup_local("Alice", "password2", "").await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn disabled_local_signup_is_refused() {
        let f = fixture().await;
        f.settings
            .set_bool(keys::LOCAL_SIGNUP_ENABLED, false)
            .await
            .unwrap();
        assert!(matches!(
            f.accounts.signup_local("alice", "password1", "").await,
            Err(AppError::PolicyDisabled(_))
        ));
    }

    #[tokio::test]
    async fn last_login_method_cannot_be_removed() {
        let f = fixture().await;
        let user = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        assert!(matches!(
            f.accounts.remove_auth_method(&user, AuthType::Local).await,
            Err(AppError::Conflict(_))
        ));
        assert!(f.db.get_user(user.id).await.unwrap().has_auth(AuthType::Local));
    }

    #[tokio::test]
    async fn removing_a_method_leaves_the_preferred_one() {
        let f = fixture().await;
        enable(&f.settings, AuthType::Twitch).await;
        let user = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        let user = f
            .accounts
            .link_oauth(&user, AuthType::Twitch, &grant("t-1", "alice"))
            .await
            .unwrap();

        let user = f
            .accounts
            .remove_auth_method(&user, AuthType::Local)
            .await
            .unwrap();
        assert_eq!(
            user.preferred_auth_method().map(|method| method.auth_type),
            Some(AuthType::Twitch)
        );
    }

    #[tokio::test]
    async fn stale_user_copy_keeps_linked_methods() {
        let f = fixture().await;
        enable(&f.settings, AuthType::Discord).await;
        let signed_up = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        let stale = f.db.get_user(signed_up.id).await.unwrap();

        f.accounts
            .link_oauth(&stale, AuthType::Discord, &grant("d-1", "alice"))
            .await
            .unwrap();
        let user = f
            .accounts
            .update_profile(
                &stale,
                &ProfileUpdate {
                    email: Some("alice@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(user.email, "alice@example.com");
        assert!(user.has_auth(AuthType::Discord));
        assert!(user.has_auth(AuthType::Local));
        assert_eq!(
            f.db.user_discord_login("d-1").await.unwrap().id,
            signed_up.id
        );

        let key = f.accounts.bootstrap_admin().await.unwrap().unwrap();
        let admin = f
            .accounts
            .claim_admin(&stale, &key.url, &key.key)
            .await
            .unwrap();
        assert!(admin.is_admin());
        assert_eq!(admin.email, "alice@example.com");
        assert!(admin.has_auth(AuthType::Discord));
    }

    #[tokio::test]
    async fn removing_a_method_through_a_stale_copy() {
        let f = fixture().await;
        enable(&f.settings, AuthType::Twitch).await;
        let stale = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        f.accounts
            .link_oauth(&stale, AuthType::Twitch, &grant("t-1", "alice"))
            .await
            .unwrap();

        let user = f
            .accounts
            .remove_auth_method(&stale, AuthType::Local)
            .await
            .unwrap();
        assert!(!user.has_auth(AuthType::Local));
        assert!(user.has_auth(AuthType::Twitch));

        assert!(matches!(
            f.accounts.remove_auth_method(&stale, AuthType::Twitch).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn deleted_name_is_reserved_in_any_case() {
        let f = fixture().await;
        for name in [DELETED_USER_NAME, "[Deleted]", "[DELETED]"] {
            let error = f
                .accounts
                .signup_local(name, "password1", "")
                .await
                .unwrap_err();
            let AppError::Form(fields) = error else {
                panic!("expected form errors for {name}");
            };
            assert!(fields.get("Username").is_some());
        }
    }

    #[tokio::test]
    async fn oauth_signup_login_and_conflicts() {
        let f = fixture().await;
        assert!(matches!(
            f.accounts
                .signup_oauth(AuthType::Discord, &grant("d-1", "bobby"))
                .await,
            Err(AppError::PolicyDisabled(_))
        ));

        enable(&f.settings, AuthType::Discord).await;
        let user = f
            .accounts
            .signup_oauth(AuthType::Discord, &grant("d-1", "bobby"))
            .await
            .unwrap();
        assert_eq!(user.name, "bobby");

        let logged_in = f
            .accounts
            .login_oauth(AuthType::Discord, &grant("d-1", "bobby"))
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);

        assert!(matches!(
            f.accounts
                .signup_oauth(AuthType::Discord, &grant("d-1", "other"))
                .await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn password_reset_moves_the_credential_date() {
        let f = fixture().await;
        let user = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        let before = user.auth_method(AuthType::Local).unwrap().date;

        let key = f.accounts.request_password_reset(user.id).await.unwrap();
        assert!(
            f.accounts
                .reset_password(&key.url, &key.key, "x")
                .await
                .is_err()
        );
        let user = f
            .accounts
            .reset_password(&key.url, &key.key, "new password")
            .await
            .unwrap();

        assert!(user.auth_method(AuthType::Local).unwrap().date > before);
        assert!(f.accounts.login_local("alice", "new password").await.is_ok());
        assert!(
            f.accounts
                .reset_password(&key.url, &key.key, "another one")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn change_password_requires_current_one() {
        let f = fixture().await;
        let user = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        assert!(matches!(
            f.accounts
                .change_password(&user, Some("wrong"), "password2")
                .await,
            Err(AppError::Form(_))
        ));
        f.accounts
            .change_password(&user, Some("password1"), "password2")
            .await
            .unwrap();
        assert!(f.accounts.login_local("alice", "password2").await.is_ok());
    }

    #[tokio::test]
    async fn soft_delete_keeps_votes() {
        let f = fixture().await;
        let user = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        f.db.add_cycle(None).await.unwrap();
        let movie = f.db.add_movie(&Movie::new("Heat", user.id)).await.unwrap();
        f.db.add_vote(user.id, movie).await.unwrap();

        f.accounts.soft_delete(user.id).await.unwrap();
        let deleted = f.db.get_user(user.id).await.unwrap();
        assert!(deleted.is_deleted());
        assert!(f.db.user_voted_for_movie(user.id, movie).await.unwrap());

        f.accounts.purge(user.id).await.unwrap();
        assert!(!f.db.user_voted_for_movie(user.id, movie).await.unwrap());
    }

    #[tokio::test]
    async fn admin_bootstrap_and_claim() {
        let f = fixture().await;
        let user = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        assert!(AccountService::check_admin_rights(&user).is_err());

        let key = f.accounts.bootstrap_admin().await.unwrap().unwrap();
        let admin = f
            .accounts
            .claim_admin(&user, &key.url, &key.key)
            .await
            .unwrap();
        assert!(admin.is_admin());
        assert!(AccountService::check_admin_rights(&admin).is_ok());

        assert!(f.accounts.bootstrap_admin().await.unwrap().is_none());
        assert!(
            f.accounts
                .claim_admin(&user, &key.url, &key.key)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn ban_is_reserved() {
        let f = fixture().await;
        let user = f
            .accounts
            .signup_local("alice", "password1", "")
            .await
            .unwrap();
        assert!(matches!(
            f.accounts.ban(user.id).await,
            Err(AppError::PolicyDisabled(_))
        ));
    }
}
