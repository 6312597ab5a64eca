//! Two tabs sharing one durable store, each with its own tab storage

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;

use wishare_core::config::SessionConfig;
use wishare_core::storage::{FileStorage, MemoryStorage, Storage};
use wishare_core::{AuthSession, SessionNamespace, SessionState, TokenPair};

fn token(offset_secs: i64) -> String {
    let claims = json!({ "exp": Utc::now().timestamp() + offset_secs });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"tabs")).unwrap()
}

fn tab(durable: Arc<dyn Storage>) -> AuthSession {
    AuthSession::new(durable, Arc::new(MemoryStorage::new()), SessionConfig::default())
}

#[test]
fn fresh_tab_falls_back_to_legacy_pointer() {
    let durable: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    durable.set_item("current_user_id", "7").unwrap();

    let tab_a = tab(durable.clone());
    tab_a.registry().set_current_user_id("42").unwrap();
    let tab_b = tab(durable.clone());

    assert_eq!(tab_a.registry().get_current_user_id().as_deref(), Some("42"));
    assert_eq!(tab_b.registry().get_current_user_id().as_deref(), Some("7"));
}

#[test]
fn two_logins_in_two_tabs_stay_separate() {
    let durable: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let tab_a = tab(durable.clone());
    let tab_b = tab(durable.clone());

    let teacher = TokenPair::new(token(3600), token(86400));
    let student = TokenPair::new(token(3600), token(86400));
    tab_a.login(Some("42"), &teacher).unwrap();
    tab_b.login(Some("7"), &student).unwrap();

    assert_eq!(tab_a.require_tokens().unwrap(), teacher);
    assert_eq!(tab_b.require_tokens().unwrap(), student);

    tab_b.logout().unwrap();

    assert_eq!(tab_b.state(), SessionState::NoTokens);
    assert_eq!(tab_a.state(), SessionState::Valid);
    assert_eq!(tab_a.namespace(), SessionNamespace::ForUser("42".to_string()));
}

#[test]
fn unnamespaced_clear_leaves_user_tokens() {
    let durable: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let session = tab(durable.clone());
    let store = session.store();

    store
        .set_tokens(&TokenPair::new("a", "r"), &SessionNamespace::Default)
        .unwrap();
    store
        .set_tokens(
            &TokenPair::new("a42", "r42"),
            &SessionNamespace::ForUser("42".to_string()),
        )
        .unwrap();

    store.clear_tokens(&SessionNamespace::Default).unwrap();

    assert_eq!(durable.get_item("access_token").unwrap(), None);
    assert_eq!(durable.get_item("refresh_token").unwrap(), None);
    assert_eq!(durable.get_item("access_token_42").unwrap().as_deref(), Some("a42"));
    assert_eq!(durable.get_item("refresh_token_42").unwrap().as_deref(), Some("r42"));
}

#[test]
fn file_backed_tab_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let open = |tab_id: &str| {
        AuthSession::new(
            Arc::new(FileStorage::durable(dir.path())),
            Arc::new(FileStorage::for_tab(dir.path(), tab_id)),
            SessionConfig::default(),
        )
    };

    let pair = TokenPair::new(token(-1), token(3600));
    open("a").login(Some("42"), &pair).unwrap();

    // Same tab id after a "reload": same user, expired access but usable
    let reloaded = open("a");
    assert_eq!(reloaded.namespace(), SessionNamespace::ForUser("42".to_string()));
    assert!(reloaded.is_usable());
    assert_eq!(reloaded.tokens_info().access_expired, Some(true));
    assert_eq!(reloaded.tokens_info().refresh_expired, Some(false));
    assert_eq!(reloaded.state(), SessionState::NeedsRefresh);

    // A new tab only sees the login through the legacy pointer
    let other = open("b");
    other.registry().set_current_user_id("7").unwrap();
    assert_eq!(other.state(), SessionState::NoTokens);
    assert_eq!(open("a").state(), SessionState::NeedsRefresh);
}
