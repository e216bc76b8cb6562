mod common;

use common::MemoryBackend;
use lostfound::cache::{QueryCache, QueryKey};
use lostfound::error::Error;
use lostfound::hooks::{AuthHooks, Items};
use lostfound::models::{ItemType, Role};
use lostfound::validation::{LoginForm, RegisterForm};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn auth(backend: &Arc<MemoryBackend>) -> (AuthHooks, QueryCache) {
    let cache = QueryCache::new();
    (AuthHooks::new(backend.clone(), cache.clone()), cache)
}

fn register(email: &str) -> RegisterForm {
    RegisterForm {
        full_name: "Siti Rahma".to_string(),
        email: email.to_string(),
        password: "rahasia123".to_string(),
        confirm_password: "rahasia123".to_string(),
    }
}

fn login(email: &str, password: &str) -> LoginForm {
    LoginForm {
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_sign_up_creates_profile_and_signs_in() {
    let backend = MemoryBackend::new();
    let (auth, _) = auth(&backend);

    let outcome = auth.sign_up(&register("siti@example.com")).await.unwrap();

    assert!(outcome.signed_in);
    let profile = outcome.profile.unwrap();
    assert_eq!(profile.role, Role::User);
    assert_eq!(profile.full_name.as_deref(), Some("Siti Rahma"));
    assert!(backend.world.profile(outcome.user_id).is_some());

    let viewer = auth.viewer().await.unwrap();
    assert!(viewer.is_authenticated());
    assert!(!viewer.is_admin());
    assert_eq!(viewer.user_id(), Some(outcome.user_id));
    assert_eq!(viewer.email(), Some("siti@example.com"));
}

#[tokio::test]
async fn test_sign_up_with_confirmation_inserts_profile_after_sign_in() {
    let backend = MemoryBackend::new();
    backend.world.require_confirmation.store(true, Ordering::SeqCst);
    let (auth, _) = auth(&backend);

    let outcome = auth.sign_up(&register("siti@example.com")).await.unwrap();

    assert!(outcome.signed_in);
    assert_eq!(backend.call_count("insert_profile"), 2);
    assert!(backend.world.profile(outcome.user_id).is_some());
}

#[tokio::test]
async fn test_failed_sign_in_after_sign_up_is_tolerated() {
    let backend = MemoryBackend::new();
    backend.fail_next("sign_in", Error::Network("connection reset".into()));
    let (auth, _) = auth(&backend);

    let outcome = auth.sign_up(&register("siti@example.com")).await.unwrap();

    assert!(!outcome.signed_in);
    assert!(backend.world.profile(outcome.user_id).is_some());
}

#[tokio::test]
async fn test_unconfirmed_sign_up_defers_profile_to_first_sign_in() {
    let backend = MemoryBackend::new();
    backend.world.require_confirmation.store(true, Ordering::SeqCst);
    backend.fail_next("sign_in", Error::Auth("Email not confirmed".into()));
    let (auth, _) = auth(&backend);

    let outcome = auth.sign_up(&register("siti@example.com")).await.unwrap();

    assert!(!outcome.signed_in);
    assert!(outcome.profile.is_none());
    assert_eq!(backend.calls(), vec!["sign_up", "insert_profile", "sign_in"]);
    assert!(backend.world.profile(outcome.user_id).is_none());

    // once confirmed, signing in creates the profile from the sign-up metadata
    auth.sign_in(&login("siti@example.com", "rahasia123"))
        .await
        .unwrap();
    let profile = backend.world.profile(outcome.user_id).unwrap();
    assert_eq!(profile.role, Role::User);
    assert_eq!(profile.full_name.as_deref(), Some("Siti Rahma"));
    assert_eq!(profile.email.as_deref(), Some("siti@example.com"));

    let viewer = auth.viewer().await.unwrap();
    assert_eq!(viewer.profile.map(|p| p.id), Some(outcome.user_id));
}

#[tokio::test]
async fn test_sign_in_leaves_existing_profile_alone() {
    let backend = MemoryBackend::new();
    backend.world.add_user("budi@example.com", "secret1", Role::Admin);
    let (auth, _) = auth(&backend);

    auth.sign_in(&login("budi@example.com", "secret1"))
        .await
        .unwrap();

    assert_eq!(backend.call_count("insert_profile"), 0);
    assert_eq!(backend.world.profiles.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_sign_up_surfaces_provider_message() {
    let backend = MemoryBackend::new();
    backend
        .world
        .add_user("siti@example.com", "rahasia123", Role::User);
    let (auth, _) = auth(&backend);

    let err = auth.sign_up(&register("siti@example.com")).await.unwrap_err();
    assert_eq!(err.to_string(), "User already registered");
    assert_eq!(backend.call_count("insert_profile"), 0);
}

#[tokio::test]
async fn test_invalid_register_form_is_not_sent() {
    let backend = MemoryBackend::new();
    let (auth, _) = auth(&backend);

    let mut form = register("siti@example.com");
    form.confirm_password = "berbeda123".to_string();
    match auth.sign_up(&form).await {
        Err(Error::Validation(errors)) => {
            assert_eq!(errors.get("confirm_password"), Some("Passwords do not match"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_bad_credentials_return_provider_message_verbatim() {
    let backend = MemoryBackend::new();
    backend.world.add_user("budi@example.com", "secret1", Role::User);
    let (auth, _) = auth(&backend);

    let err = auth
        .sign_in(&login("budi@example.com", "wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid login credentials");
    assert!(!auth.viewer().await.unwrap().is_authenticated());
}

#[tokio::test]
async fn test_sign_in_invalidates_session_and_profiles() {
    let backend = MemoryBackend::new();
    let id = backend.world.add_user("budi@example.com", "secret1", Role::User);
    let (auth, cache) = auth(&backend);

    let mark = cache.log_len();
    auth.sign_in(&login("budi@example.com", "secret1"))
        .await
        .unwrap();

    assert!(cache.was_invalidated_since(mark, &QueryKey::session()));
    assert!(cache.was_invalidated_since(mark, &QueryKey::profile(id)));
    assert!(backend.has_session());
}

#[tokio::test]
async fn test_session_is_refetched_every_time() {
    let backend = MemoryBackend::new();
    let (auth, _) = auth(&backend);

    for _ in 0..3 {
        assert!(auth.session().await.unwrap().is_none());
    }
    assert_eq!(backend.call_count("current_session"), 3);
}

#[tokio::test]
async fn test_sign_out_clears_cache() {
    let backend = MemoryBackend::new();
    backend.world.add_user("budi@example.com", "secret1", Role::User);
    backend.world.seed_item(ItemType::Lost, "Payung", None);
    backend.login_as("budi@example.com");
    let cache = QueryCache::new();
    let auth = AuthHooks::new(backend.clone(), cache.clone());
    let items = Items::new(backend.clone(), cache.clone());

    items.list_by_type(ItemType::Lost).await.unwrap();
    auth.viewer().await.unwrap();
    assert!(!cache.is_empty());

    let mut rx = cache.subscribe(QueryKey::items(ItemType::Lost));
    auth.sign_out().await.unwrap();

    assert!(cache.is_empty());
    assert!(rx.has_changed().unwrap());
    assert!(!auth.viewer().await.unwrap().is_authenticated());
}

#[tokio::test]
async fn test_failed_sign_out_still_clears_local_state() {
    let backend = MemoryBackend::new();
    backend.world.add_user("budi@example.com", "secret1", Role::User);
    backend.world.seed_item(ItemType::Found, "Kunci", None);
    backend.login_as("budi@example.com");
    let cache = QueryCache::new();
    let auth = AuthHooks::new(backend.clone(), cache.clone());
    Items::new(backend.clone(), cache.clone())
        .list_by_type(ItemType::Found)
        .await
        .unwrap();

    backend.fail_next("sign_out", Error::Network("offline".into()));
    let result = auth.sign_out().await;

    assert!(matches!(result, Err(Error::Network(_))));
    assert!(cache.is_empty());
    assert!(!backend.has_session());
}

#[tokio::test]
async fn test_set_role_is_admin_only() {
    let backend = MemoryBackend::new();
    let user = backend.world.add_user("budi@example.com", "secret1", Role::User);
    backend.world.add_user("admin@example.com", "secret1", Role::Admin);
    let (auth, cache) = auth(&backend);

    backend.login_as("budi@example.com");
    let err = auth.set_role(user, Role::Admin).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    assert_eq!(backend.call_count("update_profile_role"), 0);
    assert_eq!(backend.world.profile(user).unwrap().role, Role::User);

    // a different client, so the cached viewer from above is not reused
    let admin_backend = backend.participant();
    admin_backend.login_as("admin@example.com");
    let admin = AuthHooks::new(admin_backend.clone(), cache.clone());
    cache.clear();

    let profiles = admin.profiles().await.unwrap();
    assert_eq!(profiles.len(), 2);

    let mark = cache.log_len();
    let updated = admin.set_role(user, Role::Admin).await.unwrap();
    assert_eq!(updated.role, Role::Admin);
    assert_eq!(backend.world.profile(user).unwrap().role, Role::Admin);
    assert!(cache.was_invalidated_since(mark, &QueryKey::profiles()));
    assert!(cache.was_invalidated_since(mark, &QueryKey::profile(user)));
}

#[tokio::test]
async fn test_viewer_without_profile_is_plain_user() {
    let backend = MemoryBackend::new();
    let id = backend.world.add_user("budi@example.com", "secret1", Role::Admin);
    backend.world.profiles.lock().unwrap().retain(|p| p.id != id);
    backend.login_as("budi@example.com");
    let (auth, _) = auth(&backend);

    let viewer = auth.viewer().await.unwrap();
    assert!(viewer.is_authenticated());
    assert!(viewer.profile.is_none());
    assert!(!viewer.is_admin());
    assert_eq!(viewer.role(), Role::User);
}
