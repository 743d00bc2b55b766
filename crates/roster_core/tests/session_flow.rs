mod common;

use common::{harness, registration};
use parking_lot::Mutex;
use roster_core::local::OutboxKind;
use roster_core::{
    DocumentStore, DocumentWrite, ErrorCategory, IdentityProvider, ProfileUpdate, RegistrationInput, SessionManager, SessionObserver,
    SessionPhase, Specialty, UserView,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

type Events = Arc<Mutex<Vec<Option<String>>>>;

fn record_events(session: &SessionManager) -> (Events, SessionObserver) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let observer = session.observe_session_changes(move |view: Option<&UserView>| {
        sink.lock().push(view.map(|view| view.id.clone()));
    });
    (events, observer)
}

#[tokio::test]
async fn register_then_login_returns_same_user() {
    let h = harness();
    let registered = h
        .session
        .register(&registration("Ana@Example.com"))
        .await
        .expect("register should succeed");

    assert_eq!(registered.email_address, "ana@example.com");
    assert_eq!(registered.name.as_deref(), Some("Ana Pérez"));
    assert_eq!(registered.age, Some(25));
    assert_eq!(registered.specialty, Some(Specialty::Software));
    assert!(registered.profile_complete);
    assert_eq!(registered.display_name.as_deref(), Some("Ana Pérez"));
    assert_eq!(h.session.phase(), SessionPhase::SignedIn);

    h.session.logout().await.expect("logout should succeed");
    assert!(h.session.current_user().is_none());

    let logged_in = h
        .session
        .login("ana@example.com", "secret1")
        .await
        .expect("login should succeed");
    assert_eq!(logged_in.id, registered.id);
    assert_eq!(logged_in.age, Some(25));
    assert!(logged_in.last_login_at.is_some());
    assert_eq!(h.session.current_user(), Some(logged_in));
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials_and_leaves_session_signed_out() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");

    let error = h
        .session
        .login("ana@example.com", "wrong-password")
        .await
        .expect_err("login should fail");
    assert_eq!(error.category, ErrorCategory::InvalidCredentials);
    assert_eq!(error.message, ErrorCategory::InvalidCredentials.user_message());
    assert_eq!(h.session.phase(), SessionPhase::SignedOut);
    assert!(h.session.current_user().is_none());

    let missing = h
        .session
        .login("nobody@example.com", "secret1")
        .await
        .expect_err("unknown account");
    assert_eq!(missing.category, ErrorCategory::AccountNotFound);
}

#[tokio::test]
async fn profile_write_failure_still_signs_in_without_profile_fields() {
    let h = harness();
    h.store.fail_set.store(true, Ordering::SeqCst);

    let view = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed despite profile write failure");

    assert_eq!(h.store.set_calls.load(Ordering::SeqCst), 1);
    assert_eq!(view.email_address, "ana@example.com");
    assert_eq!(view.age, None);
    assert_eq!(view.specialty, None);
    assert!(!view.has_profile());
    assert_eq!(h.identity.account_count(), 1);
    assert_eq!(h.session.phase(), SessionPhase::SignedIn);
}

#[tokio::test]
async fn missing_profile_can_be_completed_later() {
    let h = harness();
    h.store.fail_set.store(true, Ordering::SeqCst);
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.store.fail_set.store(false, Ordering::SeqCst);

    let view = h
        .session
        .update_profile(&ProfileUpdate {
            name: Some("Ana".to_string()),
            age: Some(30),
            specialty: Some("Diseño".to_string()),
        })
        .await
        .expect("update should create the profile");

    assert_eq!(view.name.as_deref(), Some("Ana"));
    assert_eq!(view.age, Some(30));
    assert_eq!(view.specialty, Some(Specialty::Design));
    assert_eq!(view.display_name.as_deref(), Some("Ana"));
    assert_eq!(h.session.current_user(), Some(view));
}

#[tokio::test]
async fn registered_email_is_rejected_before_sign_up() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");

    let error = h
        .session
        .register(&registration(" ANA@example.com "))
        .await
        .expect_err("duplicate email");
    assert_eq!(error.category, ErrorCategory::EmailInUse);
    assert_eq!(h.identity.account_count(), 1);
    assert_eq!(h.session.phase(), SessionPhase::SignedOut);
}

#[tokio::test]
async fn failed_precheck_falls_through_to_provider() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");
    h.store.fail_query.store(true, Ordering::SeqCst);

    let error = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect_err("provider rejects duplicate");
    assert_eq!(error.category, ErrorCategory::EmailInUse);

    let fresh = h
        .session
        .register(&registration("bea@example.com"))
        .await
        .expect("unchecked registration should still succeed");
    assert_eq!(fresh.email_address, "bea@example.com");
}

#[tokio::test]
async fn invalid_registration_input_never_reaches_provider() {
    let h = harness();
    let weak = h
        .session
        .register(&RegistrationInput::new("Ana", "ana@example.com", "123", 25, "Software"))
        .await
        .expect_err("short password");
    assert_eq!(weak.category, ErrorCategory::WeakCredential);

    let underage = h
        .session
        .register(&RegistrationInput::new("Ana", "ana@example.com", "secret1", 17, "Software"))
        .await
        .expect_err("underage");
    assert_eq!(underage.category, ErrorCategory::InvalidInput);

    let bad_email = h
        .session
        .register(&RegistrationInput::new("Ana", "ana@", "secret1", 20, "Software"))
        .await
        .expect_err("malformed email");
    assert_eq!(bad_email.category, ErrorCategory::InvalidInput);

    assert_eq!(h.identity.account_count(), 0);
    assert_eq!(h.session.phase(), SessionPhase::SignedOut);
}

#[tokio::test]
async fn observers_get_one_callback_per_transition_until_unsubscribed() {
    let h = harness();
    let (events, observer) = record_events(&h.session);

    let view = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");
    h.session.logout().await.expect("second logout is a no-op");
    h.session
        .login("ana@example.com", "secret1")
        .await
        .expect("login should succeed");

    assert!(observer.unsubscribe());
    assert!(!observer.unsubscribe());
    h.session.logout().await.expect("logout should succeed");

    let events = events.lock().clone();
    assert_eq!(
        events,
        vec![Some(view.id.clone()), None, Some(view.id.clone())]
    );
}

#[tokio::test]
async fn dropping_observer_handle_stops_callbacks() {
    let h = harness();
    let (events, observer) = record_events(&h.session);
    drop(observer);

    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn provider_revocation_signs_out_once() {
    let h = harness();
    let view = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    let (events, _observer) = record_events(&h.session);

    assert!(h.identity.revoke_sessions(&view.id));
    assert_eq!(h.session.phase(), SessionPhase::SignedOut);
    assert!(h.session.current_user().is_none());

    h.session.logout().await.expect("logout after revocation is a no-op");
    assert_eq!(events.lock().clone(), vec![None]);
}

#[tokio::test]
async fn change_password_reauthenticates_and_replaces_password() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    let (events, _observer) = record_events(&h.session);

    let wrong = h
        .session
        .change_password("not-it", "another1")
        .await
        .expect_err("wrong current password");
    assert_eq!(wrong.category, ErrorCategory::InvalidCredentials);
    assert_eq!(h.session.phase(), SessionPhase::SignedIn);

    let weak = h
        .session
        .change_password("secret1", "123")
        .await
        .expect_err("weak new password");
    assert_eq!(weak.category, ErrorCategory::WeakCredential);

    h.session
        .change_password("secret1", "another1")
        .await
        .expect("change should succeed");
    assert_eq!(h.session.phase(), SessionPhase::SignedIn);
    assert!(events.lock().is_empty());

    h.session.logout().await.expect("logout should succeed");
    let old = h
        .session
        .login("ana@example.com", "secret1")
        .await
        .expect_err("old password no longer works");
    assert_eq!(old.category, ErrorCategory::InvalidCredentials);
    h.session
        .login("ana@example.com", "another1")
        .await
        .expect("new password works");
}

#[tokio::test]
async fn signed_out_operations_report_not_signed_in() {
    let h = harness();
    let change = h
        .session
        .change_password("secret1", "another1")
        .await
        .expect_err("not signed in");
    assert_eq!(change.category, ErrorCategory::NotSignedIn);

    let update = h
        .session
        .update_profile(&ProfileUpdate {
            age: Some(40),
            ..ProfileUpdate::default()
        })
        .await
        .expect_err("not signed in");
    assert_eq!(update.category, ErrorCategory::NotSignedIn);

    let refresh = h.session.refresh_user().await.expect_err("not signed in");
    assert_eq!(refresh.category, ErrorCategory::NotSignedIn);

    h.session.logout().await.expect("logout while signed out is ok");
}

#[tokio::test]
async fn concurrent_logins_are_serialized() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");
    let (events, _observer) = record_events(&h.session);

    let (first, second) = tokio::join!(
        h.session.login("ana@example.com", "secret1"),
        h.session.login("ana@example.com", "secret1"),
    );
    let first = first.expect("first login should succeed");
    let second = second.expect("second login should succeed");
    assert_eq!(first.id, second.id);
    assert_eq!(h.session.phase(), SessionPhase::SignedIn);
    // Signing in again as the same user is not a new transition.
    assert_eq!(events.lock().clone(), vec![Some(first.id)]);
}

#[tokio::test]
async fn switching_user_while_signed_in_notifies_new_user() {
    let h = harness();
    let ana = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    let (events, _observer) = record_events(&h.session);

    let bea = h
        .session
        .register(&registration("bea@example.com"))
        .await
        .expect("register should succeed");
    h.session
        .login("bea@example.com", "secret1")
        .await
        .expect("login should succeed");

    assert_ne!(ana.id, bea.id);
    assert_eq!(events.lock().clone(), vec![Some(bea.id)]);
}

#[tokio::test]
async fn revocation_during_login_leaves_session_signed_out() {
    let h = harness();
    let view = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");
    let (events, _observer) = record_events(&h.session);

    let identity = h.identity.clone();
    let uid = view.id.clone();
    h.store.before_get(move || {
        identity.revoke_sessions(&uid);
    });

    let error = h
        .session
        .login("ana@example.com", "secret1")
        .await
        .expect_err("revoked login must not commit");
    assert_eq!(error.category, ErrorCategory::NotSignedIn);
    assert_eq!(h.session.phase(), SessionPhase::SignedOut);
    assert!(h.session.current_user().is_none());
    assert!(h.identity.current_credential().is_none());
    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn revocation_during_refresh_reports_not_signed_in() {
    let h = harness();
    let view = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    let (events, _observer) = record_events(&h.session);

    let identity = h.identity.clone();
    let uid = view.id.clone();
    h.store.before_get(move || {
        identity.revoke_sessions(&uid);
    });

    let error = h
        .session
        .refresh_user()
        .await
        .expect_err("refresh after revocation");
    assert_eq!(error.category, ErrorCategory::NotSignedIn);
    assert_eq!(h.session.phase(), SessionPhase::SignedOut);
    assert!(h.session.current_user().is_none());
    assert_eq!(events.lock().clone(), vec![None]);
}

#[tokio::test]
async fn last_login_update_failure_still_signs_in() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");
    let first = h
        .session
        .login("ana@example.com", "secret1")
        .await
        .expect("login should succeed");
    assert!(first.last_login_at.is_some());
    h.session.logout().await.expect("logout should succeed");

    h.store.fail_update.store(true, Ordering::SeqCst);
    let second = h
        .session
        .login("ana@example.com", "secret1")
        .await
        .expect("login should succeed when the timestamp update fails");

    assert_eq!(second.id, first.id);
    assert_eq!(second.age, Some(25));
    assert_eq!(second.specialty, Some(Specialty::Software));
    assert_eq!(second.last_login_at, first.last_login_at);
    assert_eq!(h.session.phase(), SessionPhase::SignedIn);
}

#[tokio::test]
async fn profile_read_failure_yields_identity_only_view() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session.logout().await.expect("logout should succeed");
    h.store.fail_get.store(true, Ordering::SeqCst);

    let view = h
        .session
        .login("ana@example.com", "secret1")
        .await
        .expect("login should succeed without profile");
    assert_eq!(view.email_address, "ana@example.com");
    assert_eq!(view.age, None);
}

#[tokio::test]
async fn restore_adopts_provider_session() {
    let h = harness();
    let view = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");

    let relaunched = SessionManager::new(h.identity.clone(), h.store.clone(), Default::default());
    let (events, _observer) = record_events(&relaunched);
    let restored = relaunched
        .restore_session()
        .await
        .expect("provider session should be restored");

    assert_eq!(restored.id, view.id);
    assert_eq!(restored.age, Some(25));
    assert_eq!(events.lock().clone(), vec![Some(view.id)]);
}

#[tokio::test]
async fn email_flows_use_provider_outbox() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    h.session
        .send_verification_email()
        .await
        .expect("verification should send");
    h.session
        .reset_password(" ANA@example.com")
        .await
        .expect("reset should send");

    let kinds: Vec<OutboxKind> = h.identity.outbox().into_iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            OutboxKind::Verification,
            OutboxKind::Verification,
            OutboxKind::PasswordReset
        ]
    );

    let unknown = h
        .session
        .reset_password("nobody@example.com")
        .await
        .expect_err("unknown account");
    assert_eq!(unknown.category, ErrorCategory::AccountNotFound);
}

#[tokio::test]
async fn refresh_picks_up_verified_email() {
    let h = harness();
    let view = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");
    assert!(!view.email_verified);

    h.identity
        .verify_email("ana@example.com")
        .expect("verify should succeed");
    let refreshed = h.session.refresh_user().await.expect("refresh should succeed");
    assert!(refreshed.email_verified);
}

#[tokio::test]
async fn legacy_email_field_is_caught_by_precheck() {
    let h = harness();
    h.store
        .inner()
        .set_document(
            "users",
            "legacy-uid",
            DocumentWrite::new()
                .set("nombre", "Ana")
                .set("correo", "ana@example.com"),
        )
        .await
        .expect("seed should succeed");

    let error = h
        .session
        .register(&registration("ana@example.com"))
        .await
        .expect_err("legacy profile already uses this email");
    assert_eq!(error.category, ErrorCategory::EmailInUse);
    assert_eq!(h.identity.account_count(), 0);
    assert!(h
        .session
        .check_email_registered("ANA@example.com")
        .await
        .expect("check should succeed"));
}

#[tokio::test]
async fn check_email_registered_queries_profiles() {
    let h = harness();
    h.session
        .register(&registration("ana@example.com"))
        .await
        .expect("register should succeed");

    assert!(h
        .session
        .check_email_registered("Ana@Example.com")
        .await
        .expect("check should succeed"));
    assert!(!h
        .session
        .check_email_registered("bea@example.com")
        .await
        .expect("check should succeed"));

    h.store.fail_query.store(true, Ordering::SeqCst);
    let error = h
        .session
        .check_email_registered("ana@example.com")
        .await
        .expect_err("query failure surfaces");
    assert_eq!(error.category, ErrorCategory::NetworkUnavailable);
}

#[tokio::test]
async fn minimal_valid_registration_keeps_age() {
    let h = harness();
    let view = h
        .session
        .register(&RegistrationInput::new("A", "a@b.com", "abcdef", 20, "Software"))
        .await
        .expect("register should succeed");
    assert_eq!(view.age, Some(20));
    assert_eq!(view.specialty, Some(Specialty::Software));

    h.session.logout().await.expect("logout should succeed");
    let error = h
        .session
        .login("a@b.com", "wrong")
        .await
        .expect_err("wrong password");
    assert_eq!(error.category, ErrorCategory::InvalidCredentials);
}
