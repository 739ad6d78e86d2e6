//! Scenarios every backend must pass.
//!
//! Each test runs once per registered backend on a fresh temporary store.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use super::*;
use crate::config::DatabaseConfig;

async fn stores() -> Vec<(TempDir, Arc<dyn DataConnector>)> {
    let mut stores = Vec::new();
    for backend in available_backends() {
        let dir = TempDir::new().unwrap();
        let file = if *backend == "json" {
            "data.json"
        } else {
            "polls.db"
        };
        let config = DatabaseConfig {
            backend: backend.to_string(),
            path: dir.path().join(file),
        };
        let store = connect(&config).await.unwrap();
        stores.push((dir, store));
    }
    stores
}

async fn add_local_user(db: &dyn DataConnector, name: &str) -> i64 {
    let mut user = User::new(name, format!("{name}@example.com"));
    user.auth_methods
        .push(AuthMethod::local(format!("hash-of-{name}")));
    db.add_user(&user).await.unwrap()
}

async fn close_current_cycle(db: &dyn DataConnector, watched: Vec<i64>) -> i64 {
    let mut cycle = db.get_current_cycle().await.unwrap().unwrap();
    cycle.ended = Some(Utc::now());
    cycle.watched = watched;
    db.update_cycle(&cycle).await.unwrap();
    cycle.id
}

fn imdb_link(url: &str) -> Link {
    Link {
        id: 0,
        url: url.to_string(),
        link_type: LinkType::Imdb,
        is_source: false,
    }
}

// =============================================================================
// Cycles
// =============================================================================

#[tokio::test]
async fn only_one_cycle_can_be_open() {
    for (_dir, db) in stores().await {
        let first = db.add_cycle(None).await.unwrap();
        let error = db.add_cycle(None).await.unwrap_err();
        assert!(
            matches!(error, AppError::Conflict(_)),
            "{}: {error:?}",
            db.backend()
        );

        close_current_cycle(db.as_ref(), vec![]).await;
        let second = db.add_cycle(None).await.unwrap();
        assert!(second > first, "{}", db.backend());
        assert_eq!(
            db.get_current_cycle().await.unwrap().map(|c| c.id),
            Some(second)
        );
    }
}

#[tokio::test]
async fn reopening_a_closed_cycle_conflicts_with_the_open_one() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let closed = close_current_cycle(db.as_ref(), vec![]).await;
        db.add_cycle(None).await.unwrap();

        let mut cycle = db.get_cycle(closed).await.unwrap();
        cycle.ended = None;
        let error = db.update_cycle(&cycle).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());
    }
}

#[tokio::test]
async fn past_cycles_are_newest_first_and_windowed() {
    for (_dir, db) in stores().await {
        for _ in 0..4 {
            db.add_cycle(None).await.unwrap();
            close_current_cycle(db.as_ref(), vec![]).await;
        }
        db.add_cycle(None).await.unwrap();

        let ids: Vec<i64> = db
            .get_past_cycles(0, 10)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![4, 3, 2, 1], "{}", db.backend());

        let window: Vec<i64> = db
            .get_past_cycles(1, 2)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(window, vec![3, 2], "{}", db.backend());

        let negative = db.get_past_cycles(-1, 1).await.unwrap();
        assert_eq!(negative.len(), 1);
        assert_eq!(negative[0].id, 4);
    }
}

#[tokio::test]
async fn old_cycles_keep_their_dates_and_winners() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let movie = db.add_movie(&Movie::new("Heat", 1)).await.unwrap();
        close_current_cycle(db.as_ref(), vec![]).await;

        let ended = round_to_second(Utc::now() - chrono::Duration::days(30));
        let old = Cycle {
            id: 0,
            planned_end: None,
            ended: Some(ended),
            watched: vec![movie],
        };
        let id = db.add_old_cycle(&old).await.unwrap();

        let stored = db.get_cycle(id).await.unwrap();
        assert_eq!(stored.ended, Some(ended), "{}", db.backend());
        assert_eq!(stored.watched, vec![movie]);
        assert_eq!(db.get_movie(movie).await.unwrap().cycle_watched, Some(id));
    }
}

// =============================================================================
// Movies
// =============================================================================

#[tokio::test]
async fn movies_require_an_open_cycle() {
    for (_dir, db) in stores().await {
        let error = db.add_movie(&Movie::new("Alien", 1)).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());

        let cycle = db.add_cycle(None).await.unwrap();
        let id = db.add_movie(&Movie::new("Alien", 1)).await.unwrap();
        let movie = db.get_movie(id).await.unwrap();
        assert_eq!(movie.cycle_added, cycle);
        assert_eq!(movie.cycle_watched, None);
    }
}

#[tokio::test]
async fn duplicate_titles_are_rejected_on_normalized_name() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        db.add_movie(&Movie::new("The Matrix (1999)", 1))
            .await
            .unwrap();

        assert!(db.check_movie_exists("the  matrix (1999)").await.unwrap());
        assert!(!db.check_movie_exists("The Matrix Reloaded").await.unwrap());

        let error = db
            .add_movie(&Movie::new(" THE MATRIX   (1999) ", 2))
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());
    }
}

#[tokio::test]
async fn movie_links_keep_order_and_source_flag() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let mut movie = Movie::new("Paprika", 1);
        movie.links = vec![
            Link {
                link_type: LinkType::MyAnimeList,
                ..imdb_link("https://myanimelist.net/anime/1943")
            },
            imdb_link("https://imdb.com/title/tt0851578"),
        ];
        movie.tags = vec![Tag::named("MAL"), Tag::named("Sci-Fi"), Tag::named("mal")];
        let id = db.add_movie(&movie).await.unwrap();

        let stored = db.get_movie(id).await.unwrap();
        assert_eq!(stored.links.len(), 2, "{}", db.backend());
        assert!(stored.links[0].is_source);
        assert!(!stored.links[1].is_source);
        assert_eq!(stored.links[0].link_type, LinkType::MyAnimeList);
        assert_eq!(stored.tags.len(), 2);

        let source = db.get_link(stored.links[0].id).await.unwrap();
        assert!(source.is_source);
    }
}

#[tokio::test]
async fn watched_requires_an_ended_cycle() {
    for (_dir, db) in stores().await {
        let cycle = db.add_cycle(None).await.unwrap();
        let id = db.add_movie(&Movie::new("Solaris", 1)).await.unwrap();

        let mut movie = db.get_movie(id).await.unwrap();
        movie.cycle_watched = Some(cycle);
        let error = db.update_movie(&movie).await.unwrap_err();
        assert!(
            matches!(error, AppError::InvalidInput(_)),
            "{}",
            db.backend()
        );

        let mut open = db.get_cycle(cycle).await.unwrap();
        open.watched = vec![id];
        assert!(db.update_cycle(&open).await.is_err());
    }
}

#[tokio::test]
async fn update_movie_edits_fields_and_links() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let id = db.add_movie(&Movie::new("Stalker", 1)).await.unwrap();

        let mut movie = db.get_movie(id).await.unwrap();
        movie.description = "A guide leads two men".to_string();
        movie.rating = 8.1;
        movie.links = vec![imdb_link("https://imdb.com/title/tt0079944")];
        movie.approved = false;
        db.update_movie(&movie).await.unwrap();

        let stored = db.get_movie(id).await.unwrap();
        assert_eq!(stored.description, "A guide leads two men");
        assert!((stored.rating - 8.1).abs() < 0.001, "{}", db.backend());
        assert_eq!(stored.links.len(), 1);
        assert!(!stored.approved);
    }
}

#[tokio::test]
async fn removed_movies_drop_votes_and_leave_the_active_list() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let user = add_local_user(db.as_ref(), "alice").await;
        let id = db.add_movie(&Movie::new("Cube", user)).await.unwrap();
        db.add_vote(user, id).await.unwrap();

        db.remove_movie(id).await.unwrap();
        assert!(db.get_active_movies().await.unwrap().is_empty());
        assert!(!db.user_voted_for_movie(user, id).await.unwrap());
        assert!(db.get_movie(id).await.unwrap().removed, "{}", db.backend());

        let error = db.add_vote(user, id).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)));
    }
}

#[tokio::test]
async fn watched_movies_cannot_be_removed() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let id = db.add_movie(&Movie::new("Ran", 1)).await.unwrap();
        close_current_cycle(db.as_ref(), vec![id]).await;

        let error = db.remove_movie(id).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());
    }
}

#[tokio::test]
async fn search_matches_every_token() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        db.add_movie(&Movie::new("The Thing", 1)).await.unwrap();
        db.add_movie(&Movie::new("Thing From Outer Space", 1))
            .await
            .unwrap();
        db.add_movie(&Movie::new("Halloween", 1)).await.unwrap();

        let found = db.search_movie_titles("THING the").await.unwrap();
        let names: Vec<_> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["The Thing"], "{}", db.backend());
        assert_eq!(db.search_movie_titles("thing").await.unwrap().len(), 2);
    }
}

// =============================================================================
// Tags & links
// =============================================================================

#[tokio::test]
async fn tags_and_links_are_idempotent() {
    for (_dir, db) in stores().await {
        let tag = db.add_tag(&Tag::named("Horror")).await.unwrap();
        assert_eq!(db.add_tag(&Tag::named("horror")).await.unwrap(), tag);
        assert_eq!(db.find_tag("HORROR").await.unwrap(), tag);

        let link = db
            .add_link(&imdb_link("https://imdb.com/title/tt0078748"))
            .await
            .unwrap();
        assert_eq!(
            db.add_link(&imdb_link("https://IMDB.com/title/tt0078748"))
                .await
                .unwrap(),
            link,
            "{}",
            db.backend()
        );
        assert!(matches!(
            db.find_link("https://example.com").await,
            Err(AppError::NotFound)
        ));

        db.delete_tag(tag).await.unwrap();
        assert!(matches!(db.get_tag(tag).await, Err(AppError::NotFound)));
        db.delete_link(link).await.unwrap();
        assert!(matches!(db.get_link(link).await, Err(AppError::NotFound)));
    }
}

// =============================================================================
// Users & auth
// =============================================================================

#[tokio::test]
async fn user_names_are_unique_case_insensitively() {
    for (_dir, db) in stores().await {
        add_local_user(db.as_ref(), "Alice").await;
        assert!(db.check_user_exists("alice").await.unwrap());

        let mut duplicate = User::new("ALICE", "");
        duplicate.auth_methods.push(AuthMethod::local("x".into()));
        let error = db.add_user(&duplicate).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());
    }
}

#[tokio::test]
async fn external_ids_are_unique_per_type() {
    for (_dir, db) in stores().await {
        let twitch = AuthMethod::oauth(
            AuthType::Twitch,
            "12345".into(),
            "access".into(),
            None,
            Utc::now(),
        );
        db.add_auth_method(&twitch).await.unwrap();
        assert!(
            db.check_oauth_usage("12345", AuthType::Twitch)
                .await
                .unwrap()
        );
        assert!(
            !db.check_oauth_usage("12345", AuthType::Discord)
                .await
                .unwrap()
        );

        let error = db.add_auth_method(&twitch).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());

        let discord = AuthMethod {
            auth_type: AuthType::Discord,
            ..twitch.clone()
        };
        db.add_auth_method(&discord).await.unwrap();
    }
}

#[tokio::test]
async fn login_queries_find_bound_users() {
    for (_dir, db) in stores().await {
        let mut user = User::new("bob", "");
        user.auth_methods.push(AuthMethod::local("hashed".into()));
        user.auth_methods.push(AuthMethod::oauth(
            AuthType::Discord,
            "d-1".into(),
            "token".into(),
            Some("refresh".into()),
            Utc::now(),
        ));
        let id = db.add_user(&user).await.unwrap();

        assert_eq!(db.user_local_login("BOB", "hashed").await.unwrap().id, id);
        assert!(matches!(
            db.user_local_login("bob", "wrong").await,
            Err(AppError::Unauthorized)
        ));
        assert_eq!(db.user_discord_login("d-1").await.unwrap().id, id);
        assert!(matches!(
            db.user_twitch_login("d-1").await,
            Err(AppError::NotFound)
        ));

        let stored = db.get_user(id).await.unwrap();
        assert_eq!(stored.auth_methods.len(), 2, "{}", db.backend());
    }
}

#[tokio::test]
async fn update_auth_method_refuses_unknown_ids() {
    for (_dir, db) in stores().await {
        let mut method = AuthMethod::local("hash".into());
        method.id = 999;
        let error = db.update_auth_method(&method).await.unwrap_err();
        assert!(matches!(error, AppError::NotFound), "{}", db.backend());
    }
}

#[tokio::test]
async fn update_auth_method_changes_password_and_date() {
    for (_dir, db) in stores().await {
        let id = add_local_user(db.as_ref(), "carol").await;
        let mut method = db
            .get_user(id)
            .await
            .unwrap()
            .auth_method(AuthType::Local)
            .cloned()
            .unwrap();
        method.password = Some("new-hash".into());
        method.date = next_credential_date(method.date);
        db.update_auth_method(&method).await.unwrap();

        let stored = db.get_auth_method(method.id).await.unwrap();
        assert_eq!(stored.password.as_deref(), Some("new-hash"));
        assert_eq!(stored.date, method.date, "{}", db.backend());
    }
}

#[tokio::test]
async fn users_with_auth_honours_exclusive_flag() {
    for (_dir, db) in stores().await {
        let local_only = add_local_user(db.as_ref(), "local").await;
        let mut both = User::new("both", "");
        both.auth_methods.push(AuthMethod::local("h".into()));
        both.auth_methods.push(AuthMethod::oauth(
            AuthType::Patreon,
            "p".into(),
            "t".into(),
            None,
            Utc::now(),
        ));
        let both = db.add_user(&both).await.unwrap();

        let all: Vec<i64> = db
            .get_users_with_auth(AuthType::Local, false)
            .await
            .unwrap()
            .iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(all, vec![local_only, both], "{}", db.backend());

        let exclusive: Vec<i64> = db
            .get_users_with_auth(AuthType::Local, true)
            .await
            .unwrap()
            .iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(exclusive, vec![local_only]);
    }
}

#[tokio::test]
async fn update_user_is_an_upsert_and_drops_unlisted_methods() {
    for (_dir, db) in stores().await {
        let id = add_local_user(db.as_ref(), "dave").await;
        let mut user = db.get_user(id).await.unwrap();
        let local_id = user.auth_methods[0].id;

        user.name = DELETED_USER_NAME.to_string();
        user.email.clear();
        user.auth_methods.clear();
        db.update_user(&user).await.unwrap();

        let stored = db.get_user(id).await.unwrap();
        assert!(stored.is_deleted(), "{}", db.backend());
        assert!(matches!(
            db.get_auth_method(local_id).await,
            Err(AppError::NotFound)
        ));

        // A second soft-deleted user may share the placeholder name.
        let other = add_local_user(db.as_ref(), "erin").await;
        let mut other_user = db.get_user(other).await.unwrap();
        other_user.name = DELETED_USER_NAME.to_string();
        other_user.auth_methods.clear();
        db.update_user(&other_user).await.unwrap();

        let mut fresh = User::new("frank", "");
        fresh.id = 77;
        fresh.auth_methods.push(AuthMethod::local("h".into()));
        db.update_user(&fresh).await.unwrap();
        assert_eq!(db.get_user(77).await.unwrap().name, "frank");
    }
}

#[tokio::test]
async fn user_fields_update_leaves_methods_bound() {
    for (_dir, db) in stores().await {
        let id = add_local_user(db.as_ref(), "gina").await;
        let stale = db.get_user(id).await.unwrap();

        let discord = AuthMethod::oauth(
            AuthType::Discord,
            "d-9".into(),
            "t".into(),
            None,
            Utc::now(),
        );
        db.add_user_auth_method(id, &discord).await.unwrap();

        let mut update = stale.clone();
        update.email = "gina@example.org".into();
        update.privilege = Privilege::Mod;
        db.update_user_fields(&update).await.unwrap();

        let stored = db.get_user(id).await.unwrap();
        assert_eq!(stored.email, "gina@example.org");
        assert_eq!(stored.privilege, Privilege::Mod);
        assert!(stored.has_auth(AuthType::Discord), "{}", db.backend());
        assert!(stored.has_auth(AuthType::Local));

        let mut missing = stale.clone();
        missing.id = 404;
        assert!(matches!(
            db.update_user_fields(&missing).await,
            Err(AppError::NotFound)
        ));
    }
}

#[tokio::test]
async fn user_auth_methods_are_added_and_removed_one_at_a_time() {
    for (_dir, db) in stores().await {
        let id = add_local_user(db.as_ref(), "hank").await;
        let other = add_local_user(db.as_ref(), "ivy").await;

        let twitch = AuthMethod::oauth(
            AuthType::Twitch,
            "t-9".into(),
            "t".into(),
            None,
            Utc::now(),
        );
        db.add_user_auth_method(id, &twitch).await.unwrap();
        assert!(matches!(
            db.add_user_auth_method(id, &twitch).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            db.add_user_auth_method(other, &twitch).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            db.add_user_auth_method(999, &AuthMethod::local("h".into())).await,
            Err(AppError::NotFound)
        ));

        db.remove_user_auth_method(id, AuthType::Local).await.unwrap();
        let stored = db.get_user(id).await.unwrap();
        assert_eq!(stored.auth_methods.len(), 1, "{}", db.backend());
        assert!(stored.has_auth(AuthType::Twitch));

        assert!(matches!(
            db.remove_user_auth_method(id, AuthType::Twitch).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            db.remove_user_auth_method(id, AuthType::Discord).await,
            Err(AppError::NotFound)
        ));
    }
}

#[tokio::test]
async fn users_are_paged_by_id() {
    for (_dir, db) in stores().await {
        for name in ["u1", "u2", "u3"] {
            add_local_user(db.as_ref(), name).await;
        }
        let page: Vec<String> = db
            .get_users(1, 5)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(page, vec!["u2", "u3"], "{}", db.backend());
    }
}

#[tokio::test]
async fn purge_user_removes_votes_and_methods() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let user = add_local_user(db.as_ref(), "gina").await;
        let method = db.get_user(user).await.unwrap().auth_methods[0].id;
        let movie = db.add_movie(&Movie::new("Memento", user)).await.unwrap();
        db.add_vote(user, movie).await.unwrap();

        db.purge_user(user).await.unwrap();
        assert!(matches!(db.get_user(user).await, Err(AppError::NotFound)));
        assert!(matches!(
            db.get_auth_method(method).await,
            Err(AppError::NotFound)
        ));
        assert!(
            db.get_movie(movie).await.unwrap().votes.is_empty(),
            "{}",
            db.backend()
        );
    }
}

// =============================================================================
// Votes
// =============================================================================

#[tokio::test]
async fn votes_are_unique_and_reversible() {
    for (_dir, db) in stores().await {
        let cycle = db.add_cycle(None).await.unwrap();
        let user = add_local_user(db.as_ref(), "hank").await;
        let movie = db.add_movie(&Movie::new("Tenet", user)).await.unwrap();
        let before = db.get_movie(movie).await.unwrap().votes;

        db.add_vote(user, movie).await.unwrap();
        assert!(db.user_voted_for_movie(user, movie).await.unwrap());
        let votes = db.get_movie(movie).await.unwrap().votes;
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].cycle_added, cycle);

        let error = db.add_vote(user, movie).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());

        db.delete_vote(user, movie).await.unwrap();
        assert_eq!(db.get_movie(movie).await.unwrap().votes, before);
        assert!(matches!(
            db.delete_vote(user, movie).await,
            Err(AppError::NotFound)
        ));
    }
}

#[tokio::test]
async fn votes_need_an_open_cycle() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let movie = db.add_movie(&Movie::new("Brazil", 1)).await.unwrap();
        close_current_cycle(db.as_ref(), vec![]).await;

        let error = db.add_vote(1, movie).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)), "{}", db.backend());
    }
}

#[tokio::test]
async fn closing_a_cycle_keeps_winner_votes_as_history() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let a = add_local_user(db.as_ref(), "a-user").await;
        let b = add_local_user(db.as_ref(), "b-user").await;
        let c = add_local_user(db.as_ref(), "c-user").await;
        let movie = db.add_movie(&Movie::new("Vertigo", a)).await.unwrap();
        for user in [a, b, c] {
            db.add_vote(user, movie).await.unwrap();
        }

        let closed = close_current_cycle(db.as_ref(), vec![movie]).await;

        let stored = db.get_movie(movie).await.unwrap();
        assert_eq!(stored.cycle_watched, Some(closed), "{}", db.backend());
        assert_eq!(stored.votes.len(), 3);
        assert!(db.get_active_movies().await.unwrap().is_empty());
        assert_eq!(db.get_cycle(closed).await.unwrap().watched, vec![movie]);
        assert_eq!(
            db.get_movies_from_cycle(closed).await.unwrap()[0].id,
            movie
        );

        let error = db.delete_vote(a, movie).await.unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)));
    }
}

#[tokio::test]
async fn decay_removes_old_unwatched_votes() {
    for (_dir, db) in stores().await {
        let user = add_local_user(db.as_ref(), "ivy").await;

        // Cycle 1: votes on X (stays unwatched) and W (watched at close).
        db.add_cycle(None).await.unwrap();
        let x = db.add_movie(&Movie::new("X", user)).await.unwrap();
        let w = db.add_movie(&Movie::new("W", user)).await.unwrap();
        db.add_vote(user, x).await.unwrap();
        db.add_vote(user, w).await.unwrap();
        close_current_cycle(db.as_ref(), vec![w]).await;

        for _ in 2..=3 {
            db.add_cycle(None).await.unwrap();
            close_current_cycle(db.as_ref(), vec![]).await;
        }

        // Cycle 4: vote on Y.
        db.add_cycle(None).await.unwrap();
        let y = db.add_movie(&Movie::new("Y", user)).await.unwrap();
        db.add_vote(user, y).await.unwrap();
        close_current_cycle(db.as_ref(), vec![]).await;

        db.add_cycle(None).await.unwrap();

        assert_eq!(db.decay_votes(0).await.unwrap(), 0);
        assert_eq!(db.decay_votes(2).await.unwrap(), 1, "{}", db.backend());
        assert!(!db.user_voted_for_movie(user, x).await.unwrap());
        assert!(db.user_voted_for_movie(user, y).await.unwrap());
        assert!(db.user_voted_for_movie(user, w).await.unwrap());

        assert_eq!(db.decay_votes(50).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn user_votes_and_movies_are_listed() {
    for (_dir, db) in stores().await {
        db.add_cycle(None).await.unwrap();
        let user = add_local_user(db.as_ref(), "jack").await;
        let mine = db.add_movie(&Movie::new("Mine", user)).await.unwrap();
        let other = db.add_movie(&Movie::new("Other", 999)).await.unwrap();
        db.add_vote(user, other).await.unwrap();

        let voted: Vec<i64> = db
            .get_user_votes(user)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(voted, vec![other], "{}", db.backend());

        let added: Vec<i64> = db
            .get_user_movies(user)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(added, vec![mine]);
    }
}

// =============================================================================
// Config store
// =============================================================================

#[tokio::test]
async fn config_values_are_typed() {
    for (_dir, db) in stores().await {
        assert!(matches!(
            db.get_cfg_int("MaxUserVotes").await,
            Err(AppError::NoValue(_))
        ));

        db.set_cfg_int("MaxUserVotes", 7).await.unwrap();
        assert_eq!(db.get_cfg_int("MaxUserVotes").await.unwrap(), 7);
        assert!(
            matches!(
                db.get_cfg_string("MaxUserVotes").await,
                Err(AppError::ConfigType { .. })
            ),
            "{}",
            db.backend()
        );
        assert!(matches!(
            db.get_cfg_bool("MaxUserVotes").await,
            Err(AppError::ConfigType { .. })
        ));

        db.set_cfg_bool("MaxUserVotes", true).await.unwrap();
        assert!(db.get_cfg_bool("MaxUserVotes").await.unwrap());

        db.set_cfg_string("NoticeBanner", "Movie night on Friday")
            .await
            .unwrap();
        assert_eq!(
            db.get_cfg_string("NoticeBanner").await.unwrap(),
            "Movie night on Friday"
        );

        db.delete_cfg_key("NoticeBanner").await.unwrap();
        assert!(db.get_cfg_value("NoticeBanner").await.unwrap().is_none());
    }
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn reopening_preserves_entities() {
    for (dir, db) in stores().await {
        let backend = db.backend();
        let planned = round_to_second(Utc::now() + chrono::Duration::days(7));
        db.add_cycle(Some(planned)).await.unwrap();
        let user = add_local_user(db.as_ref(), "kate").await;
        let mut movie = Movie::new("Persona", user);
        movie.links = vec![imdb_link("https://imdb.com/title/tt0060827")];
        movie.tags = vec![Tag::named("Drama")];
        movie.rating = 8.0;
        let movie = db.add_movie(&movie).await.unwrap();
        db.add_vote(user, movie).await.unwrap();
        db.set_cfg_bool("VotingEnabled", true).await.unwrap();

        let before_movie = db.get_movie(movie).await.unwrap();
        let before_user = db.get_user(user).await.unwrap();
        let before_cycle = db.get_current_cycle().await.unwrap();
        drop(db);

        let file = if backend == "json" {
            "data.json"
        } else {
            "polls.db"
        };
        let reopened = connect(&DatabaseConfig {
            backend: backend.to_string(),
            path: dir.path().join(file),
        })
        .await
        .unwrap();

        assert_eq!(reopened.get_movie(movie).await.unwrap(), before_movie);
        assert_eq!(reopened.get_user(user).await.unwrap(), before_user);
        assert_eq!(reopened.get_current_cycle().await.unwrap(), before_cycle);
        assert_eq!(
            before_cycle.and_then(|c| c.planned_end),
            Some(planned),
            "{backend}"
        );
        assert!(reopened.get_cfg_bool("VotingEnabled").await.unwrap());
    }
}
