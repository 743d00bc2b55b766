//! Session state machine.
//!
//! # Responsibility
//! - Own the credential and the reconciled user view.
//! - Run login/register/logout/password flows against the identity provider.
//! - Notify session observers once per sign-in and sign-out transition.
//!
//! # Invariants
//! - A `UserView` exists iff the machine is `SignedIn` (or re-authenticating
//!   an existing session).
//! - A flow that saw a sign-out after its provider call never commits a
//!   session; it reports `NotSignedIn` instead.
//! - Signing in again as the user already signed in is not a transition and
//!   does not notify observers.
//! - At most one credential-changing flow runs at a time; later calls wait.
//! - Only the identity-provider outcome decides success of login/register;
//!   profile reads and writes around it are best-effort.
//! - Provider error codes are classified before leaving this module.

use crate::config::CoreConfig;
use crate::error::{CoreResult, ErrorCategory, UserFacingError};
use crate::model::document::DocumentWrite;
use crate::model::fields::FieldAliasTable;
use crate::model::identity::Credential;
use crate::model::profile::{
    ProfileDocument, ProfileUpdate, RegistrationInput, FIELD_CREATED_AT, FIELD_EMAIL,
    FIELD_LAST_LOGIN_AT, FIELD_UID, FIELD_UPDATED_AT,
};
use crate::model::user_view::UserView;
use crate::model::validation::{normalize_email, require_password};
use crate::provider::{
    DocumentStore, IdentityProvider, ListenerRegistration, ProviderError, QueryDescriptor,
};
use crate::service::reconciler::reconcile;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Session observer callback: `Some` after sign-in, `None` after sign-out.
pub type SessionCallback = Arc<dyn Fn(Option<&UserView>) + Send + Sync>;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    SignedOut,
    Authenticating,
    SignedIn,
}

#[derive(Clone)]
struct ActiveSession {
    credential: Credential,
    view: UserView,
}

enum SessionState {
    SignedOut,
    /// `previous` is the session being re-authenticated or replaced.
    Authenticating { previous: Option<ActiveSession> },
    SignedIn(ActiveSession),
}

/// Shared state reachable from provider listeners and observer handles.
struct SessionCore {
    state: Mutex<SessionState>,
    observers: Mutex<Vec<(u64, SessionCallback)>>,
    next_observer_id: AtomicU64,
    /// Bumped by every sign-out, including ones that found no session.
    sign_out_generation: AtomicU64,
    /// Serializes a state change with its notification.
    transitions: Mutex<()>,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::SignedOut),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            sign_out_generation: AtomicU64::new(0),
            transitions: Mutex::new(()),
        }
    }

    fn phase(&self) -> SessionPhase {
        match &*self.state.lock() {
            SessionState::SignedOut => SessionPhase::SignedOut,
            SessionState::Authenticating { .. } => SessionPhase::Authenticating,
            SessionState::SignedIn(_) => SessionPhase::SignedIn,
        }
    }

    fn active_session(&self) -> Option<ActiveSession> {
        match &*self.state.lock() {
            SessionState::SignedIn(session) => Some(session.clone()),
            SessionState::Authenticating { previous } => previous.clone(),
            SessionState::SignedOut => None,
        }
    }

    fn sign_out_generation(&self) -> u64 {
        self.sign_out_generation.load(Ordering::SeqCst)
    }

    fn begin_authenticating(&self) {
        let mut state = self.state.lock();
        let previous = match std::mem::replace(&mut *state, SessionState::SignedOut) {
            SessionState::SignedIn(session) => Some(session),
            SessionState::Authenticating { previous } => previous,
            SessionState::SignedOut => None,
        };
        *state = SessionState::Authenticating { previous };
    }

    /// Returns to the state before `begin_authenticating`, without notifying.
    fn abort_authenticating(&self) {
        let mut state = self.state.lock();
        if let SessionState::Authenticating { previous } =
            std::mem::replace(&mut *state, SessionState::SignedOut)
        {
            if let Some(session) = previous {
                *state = SessionState::SignedIn(session);
            }
        }
    }

    /// Keeps the current view under a freshly issued credential.
    ///
    /// Returns `false` when a sign-out happened after `generation` was read.
    fn finish_reauthentication(&self, generation: u64, credential: Credential) -> bool {
        let _transition = self.transitions.lock();
        let mut state = self.state.lock();
        let previous = match std::mem::replace(&mut *state, SessionState::SignedOut) {
            SessionState::Authenticating { previous } => previous,
            other => {
                *state = other;
                return false;
            }
        };
        match previous {
            Some(session) if self.sign_out_generation() == generation => {
                *state = SessionState::SignedIn(ActiveSession {
                    credential,
                    view: session.view,
                });
                true
            }
            _ => false,
        }
    }

    /// Commits a signed-in session and notifies when the user changed.
    ///
    /// Returns `false`, leaving the machine signed out, when a sign-out
    /// happened after `generation` was read.
    fn complete_sign_in(&self, generation: u64, credential: Credential, view: UserView) -> bool {
        let _transition = self.transitions.lock();
        let announce = {
            let mut state = self.state.lock();
            if self.sign_out_generation() != generation {
                if matches!(*state, SessionState::Authenticating { .. }) {
                    *state = SessionState::SignedOut;
                }
                return false;
            }
            let same_user = match &*state {
                SessionState::SignedIn(session)
                | SessionState::Authenticating {
                    previous: Some(session),
                } => session.credential.user_id() == credential.user_id(),
                _ => false,
            };
            *state = SessionState::SignedIn(ActiveSession {
                credential,
                view: view.clone(),
            });
            !same_user
        };
        if announce {
            self.notify(Some(&view));
        }
        true
    }

    /// Replaces the active session without a transition notification.
    ///
    /// Returns `false` when there is no session left to replace.
    fn replace_session(&self, generation: u64, credential: Credential, view: UserView) -> bool {
        let _transition = self.transitions.lock();
        if self.sign_out_generation() != generation {
            return false;
        }
        let mut state = self.state.lock();
        match &mut *state {
            SessionState::SignedIn(session)
            | SessionState::Authenticating {
                previous: Some(session),
            } => {
                *session = ActiveSession { credential, view };
                true
            }
            _ => false,
        }
    }

    /// Moves to `SignedOut`; notifies only when a session actually ended.
    fn complete_sign_out(&self) -> bool {
        let _transition = self.transitions.lock();
        self.sign_out_generation.fetch_add(1, Ordering::SeqCst);
        let ended = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, SessionState::SignedOut) {
                SessionState::SignedIn(_) => true,
                SessionState::Authenticating { previous } => {
                    *state = SessionState::Authenticating { previous: None };
                    previous.is_some()
                }
                SessionState::SignedOut => false,
            }
        };
        if ended {
            self.notify(None);
        }
        ended
    }

    fn notify(&self, view: Option<&UserView>) {
        let observers: Vec<SessionCallback> = self
            .observers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in observers {
            callback(view);
        }
    }

    fn add_observer(&self, callback: SessionCallback) -> u64 {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, callback));
        id
    }

    fn remove_observer(&self, id: u64) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }
}

/// Handle for one session observer. Dropping it unsubscribes.
pub struct SessionObserver {
    core: Weak<SessionCore>,
    id: u64,
    active: AtomicBool,
}

impl SessionObserver {
    /// Stops further callbacks. Returns `true` only for the first call.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        match self.core.upgrade() {
            Some(core) => core.remove_observer(self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for SessionObserver {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Single-owner session state machine.
///
/// Construct once per process and share by `Arc`.
pub struct SessionManager {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    config: CoreConfig,
    core: Arc<SessionCore>,
    auth_gate: tokio::sync::Mutex<()>,
    _provider_listener: ListenerRegistration,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        config: CoreConfig,
    ) -> Self {
        let core = Arc::new(SessionCore::new());
        let listener_core = Arc::downgrade(&core);
        let provider_id = identity.provider_id().to_string();
        let provider_listener = identity.observe(Arc::new(move |credential: Option<&Credential>| {
            if credential.is_some() {
                // Sign-ins are reported by the flow that requested them.
                return;
            }
            if let Some(core) = listener_core.upgrade() {
                if core.complete_sign_out() {
                    info!(
                        "event=session_signed_out module=session status=ok source=provider provider={}",
                        provider_id
                    );
                }
            }
        }));

        Self {
            identity,
            store,
            config,
            core,
            auth_gate: tokio::sync::Mutex::new(()),
            _provider_listener: provider_listener,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.phase()
    }

    /// Current reconciled view, `None` while signed out.
    pub fn current_user(&self) -> Option<UserView> {
        self.core.active_session().map(|session| session.view)
    }

    /// Registers a session observer.
    ///
    /// The callback runs once per sign-in (`Some`) and sign-out (`None`), in
    /// transition order. It must not block or change session state itself.
    pub fn observe_session_changes(
        &self,
        callback: impl Fn(Option<&UserView>) + Send + Sync + 'static,
    ) -> SessionObserver {
        let callback: SessionCallback = Arc::new(callback);
        let id = self.core.add_observer(callback);
        SessionObserver {
            core: Arc::downgrade(&self.core),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Signs in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> CoreResult<UserView> {
        let _gate = self.auth_gate.lock().await;
        let started_at = Instant::now();
        let email = normalize_email(email);
        info!("event=session_login module=session status=start");

        self.core.begin_authenticating();
        let credential = match self.identity.sign_in(&email, password).await {
            Ok(credential) => credential,
            Err(err) => {
                self.core.abort_authenticating();
                return Err(self.fail("login", started_at, &err));
            }
        };

        let generation = self.core.sign_out_generation();
        let uid = credential.user_id().to_string();
        self.touch_last_login(&uid).await;
        let profile = self.fetch_profile(&uid, "login").await;

        let view = reconcile(credential.identity(), profile.as_ref());
        if !self.core.complete_sign_in(generation, credential, view.clone()) {
            return Err(self.signed_out_during("login", &uid));
        }
        info!(
            "event=session_login module=session status=ok uid={} profile={} duration_ms={}",
            uid,
            profile.is_some(),
            started_at.elapsed().as_millis()
        );
        Ok(view)
    }

    /// Creates an account and its profile document.
    ///
    /// A profile write failure does not fail registration and the identity
    /// account is kept; the returned view then lacks profile fields.
    pub async fn register(&self, input: &RegistrationInput) -> CoreResult<UserView> {
        let _gate = self.auth_gate.lock().await;
        let started_at = Instant::now();
        info!("event=session_register module=session status=start");

        let input = input.normalized();
        if let Err(err) = input.validate(self.config.min_password_len, self.config.min_age) {
            let error = UserFacingError::from(err);
            warn!(
                "event=session_register module=session status=error stage=validate error_category={} detail={}",
                error.category, error.detail
            );
            return Err(error);
        }

        self.core.begin_authenticating();
        match self.is_email_registered(&input.email).await {
            Ok(true) => {
                self.core.abort_authenticating();
                let error = UserFacingError::new(
                    ErrorCategory::EmailInUse,
                    "a profile with this email already exists",
                );
                warn!(
                    "event=session_register module=session status=error stage=precheck error_category={}",
                    error.category
                );
                return Err(error);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(
                    "event=email_precheck module=session status=skipped error_code={} error={}",
                    err.code, err.message
                );
            }
        }

        let mut credential = match self.identity.sign_up(&input.email, &input.password).await {
            Ok(credential) => credential,
            Err(err) => {
                self.core.abort_authenticating();
                return Err(self.fail("register", started_at, &err));
            }
        };
        let generation = self.core.sign_out_generation();
        let uid = credential.user_id().to_string();

        match self
            .identity
            .update_display_name(&credential, &input.name)
            .await
        {
            Ok(identity) => credential = credential.with_identity(identity),
            Err(err) => warn!(
                "event=display_name_update module=session status=error uid={} error_code={} error={}",
                uid, err.code, err.message
            ),
        }

        let write = input.profile_write(&uid, credential.identity().email_verified);
        let profile = match self
            .store
            .set_document(&self.config.users_collection, &uid, write)
            .await
        {
            Ok(()) => Some(
                self.fetch_profile(&uid, "register")
                    .await
                    .unwrap_or_else(|| ProfileDocument::from_registration(&uid, &input)),
            ),
            Err(err) => {
                warn!(
                    "event=profile_write_failed module=session status=error uid={} error_code={} error={}",
                    uid, err.code, err.message
                );
                None
            }
        };

        if self.config.send_verification_on_register {
            if let Err(err) = self.identity.send_email_verification(&credential).await {
                warn!(
                    "event=verification_email module=session status=error uid={} error_code={} error={}",
                    uid, err.code, err.message
                );
            }
        }

        let view = reconcile(credential.identity(), profile.as_ref());
        if !self.core.complete_sign_in(generation, credential, view.clone()) {
            return Err(self.signed_out_during("register", &uid));
        }
        info!(
            "event=session_register module=session status=ok uid={} profile={} duration_ms={}",
            uid,
            profile.is_some(),
            started_at.elapsed().as_millis()
        );
        Ok(view)
    }

    /// Ends the current session. Succeeds without effect when signed out.
    pub async fn logout(&self) -> CoreResult<()> {
        let _gate = self.auth_gate.lock().await;
        let started_at = Instant::now();
        let Some(session) = self.core.active_session() else {
            debug!("event=session_logout module=session status=skipped reason=signed_out");
            return Ok(());
        };

        if let Err(err) = self.identity.sign_out(&session.credential).await {
            return Err(self.fail("logout", started_at, &err));
        }
        self.core.complete_sign_out();
        info!(
            "event=session_logout module=session status=ok uid={} duration_ms={}",
            session.credential.user_id(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Adopts a session the provider already holds, e.g. after relaunch.
    pub async fn restore_session(&self) -> Option<UserView> {
        let _gate = self.auth_gate.lock().await;
        if let Some(session) = self.core.active_session() {
            return Some(session.view);
        }
        let credential = self.identity.current_credential()?;
        let generation = self.core.sign_out_generation();
        let uid = credential.user_id().to_string();

        self.core.begin_authenticating();
        let profile = self.fetch_profile(&uid, "restore").await;
        let view = reconcile(credential.identity(), profile.as_ref());
        if !self.core.complete_sign_in(generation, credential, view.clone()) {
            self.signed_out_during("restore", &uid);
            return None;
        }
        info!(
            "event=session_restore module=session status=ok uid={} profile={}",
            uid,
            profile.is_some()
        );
        Some(view)
    }

    /// Rebuilds the current view from a fresh identity snapshot and profile read.
    pub async fn refresh_user(&self) -> CoreResult<UserView> {
        let _gate = self.auth_gate.lock().await;
        let session = self
            .core
            .active_session()
            .ok_or_else(UserFacingError::not_signed_in)?;
        let generation = self.core.sign_out_generation();
        let credential = match self.identity.current_credential() {
            Some(current) if current.user_id() == session.credential.user_id() => current,
            _ => session.credential,
        };
        let uid = credential.user_id().to_string();

        let profile = self.fetch_profile(&uid, "refresh").await;
        let view = reconcile(credential.identity(), profile.as_ref());
        if !self.core.replace_session(generation, credential, view.clone()) {
            return Err(self.signed_out_during("refresh", &uid));
        }
        debug!("event=session_refresh module=session status=ok uid={uid}");
        Ok(view)
    }

    /// Applies profile changes for the signed-in user.
    ///
    /// The profile write is authoritative here; a missing profile document is
    /// created. Display-name sync with the provider is best-effort.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> CoreResult<UserView> {
        let _gate = self.auth_gate.lock().await;
        let started_at = Instant::now();
        let update = update.normalized();
        update.validate(self.config.min_age)?;
        let session = self
            .core
            .active_session()
            .ok_or_else(UserFacingError::not_signed_in)?;
        if update.is_empty() {
            return Ok(session.view);
        }
        let generation = self.core.sign_out_generation();

        let mut credential = session.credential;
        let uid = credential.user_id().to_string();
        if let Some(name) = update.name.as_deref() {
            if credential.identity().display_name.as_deref() != Some(name) {
                match self.identity.update_display_name(&credential, name).await {
                    Ok(identity) => credential = credential.with_identity(identity),
                    Err(err) => warn!(
                        "event=display_name_update module=session status=error uid={} error_code={} error={}",
                        uid, err.code, err.message
                    ),
                }
            }
        }

        let users = self.config.users_collection.as_str();
        let existing = self
            .store
            .get_document(users, &uid)
            .await
            .map_err(|err| self.fail("update_profile", started_at, &err))?;
        let write_result = match existing {
            Some(_) => self.store.update_document(users, &uid, update.to_write()).await,
            None => {
                let write = update
                    .to_write()
                    .set(FIELD_UID, uid.as_str())
                    .set(FIELD_EMAIL, credential.identity().email_address.as_str())
                    .server_timestamp(FIELD_CREATED_AT);
                self.store.set_document(users, &uid, write).await
            }
        };
        write_result.map_err(|err| self.fail("update_profile", started_at, &err))?;

        let profile = self.fetch_profile(&uid, "update_profile").await;
        let view = reconcile(credential.identity(), profile.as_ref());
        if !self.core.replace_session(generation, credential, view.clone()) {
            return Err(self.signed_out_during("update_profile", &uid));
        }
        info!(
            "event=session_update_profile module=session status=ok uid={} duration_ms={}",
            uid,
            started_at.elapsed().as_millis()
        );
        Ok(view)
    }

    /// Sends a password reset email.
    pub async fn reset_password(&self, email: &str) -> CoreResult<()> {
        let started_at = Instant::now();
        let email = normalize_email(email);
        self.identity
            .send_password_reset(&email)
            .await
            .map_err(|err| self.fail("reset_password", started_at, &err))?;
        info!("event=session_reset_password module=session status=ok");
        Ok(())
    }

    /// Re-authenticates with `current_password`, then sets `new_password`.
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> CoreResult<()> {
        let _gate = self.auth_gate.lock().await;
        let started_at = Instant::now();
        let session = self
            .core
            .active_session()
            .ok_or_else(UserFacingError::not_signed_in)?;
        require_password(new_password, self.config.min_password_len)?;
        let uid = session.credential.user_id().to_string();

        self.core.begin_authenticating();
        let fresh = match self
            .identity
            .reauthenticate(&session.credential, current_password)
            .await
        {
            Ok(fresh) => fresh,
            Err(err) => {
                self.core.abort_authenticating();
                return Err(self.fail("change_password", started_at, &err));
            }
        };

        let generation = self.core.sign_out_generation();
        let outcome = self.identity.change_password(&fresh, new_password).await;
        let still_signed_in = self.core.finish_reauthentication(generation, fresh);
        outcome.map_err(|err| self.fail("change_password", started_at, &err))?;
        if !still_signed_in {
            return Err(self.signed_out_during("change_password", &uid));
        }

        let touch = DocumentWrite::new().server_timestamp(FIELD_UPDATED_AT);
        if let Err(err) = self
            .store
            .update_document(&self.config.users_collection, &uid, touch)
            .await
        {
            warn!(
                "event=profile_touch module=session status=error uid={} error_code={} error={}",
                uid, err.code, err.message
            );
        }
        info!(
            "event=session_change_password module=session status=ok uid={} duration_ms={}",
            uid,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Sends a verification email to the signed-in user.
    pub async fn send_verification_email(&self) -> CoreResult<()> {
        let started_at = Instant::now();
        let session = self
            .core
            .active_session()
            .ok_or_else(UserFacingError::not_signed_in)?;
        self.identity
            .send_email_verification(&session.credential)
            .await
            .map_err(|err| self.fail("send_verification_email", started_at, &err))?;
        info!(
            "event=session_send_verification module=session status=ok uid={}",
            session.credential.user_id()
        );
        Ok(())
    }

    /// Reports whether a profile with this email exists in the users collection.
    pub async fn check_email_registered(&self, email: &str) -> CoreResult<bool> {
        let started_at = Instant::now();
        self.is_email_registered(&normalize_email(email))
            .await
            .map_err(|err| self.fail("check_email", started_at, &err))
    }

    /// Matches the canonical email field and its legacy names.
    async fn is_email_registered(&self, normalized_email: &str) -> Result<bool, ProviderError> {
        let aliases = FieldAliasTable::profiles();
        let legacy = aliases
            .entries()
            .iter()
            .find(|entry| entry.canonical == FIELD_EMAIL)
            .map(|entry| entry.legacy.as_slice())
            .unwrap_or_default();
        for field in std::iter::once(FIELD_EMAIL).chain(legacy.iter().map(String::as_str)) {
            let query = QueryDescriptor::collection(self.config.users_collection.as_str())
                .where_eq(field, normalized_email)
                .limit(1);
            if !self.store.query(&query).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fetch_profile(&self, uid: &str, op: &str) -> Option<ProfileDocument> {
        match self
            .store
            .get_document(&self.config.users_collection, uid)
            .await
        {
            Ok(Some(document)) => Some(ProfileDocument::from_document(&document)),
            Ok(None) => {
                info!(
                    "event=profile_fetch module=session status=skipped reason=missing op={op} uid={uid}"
                );
                None
            }
            Err(err) => {
                warn!(
                    "event=profile_fetch module=session status=error op={} uid={} error_code={} error={}",
                    op, uid, err.code, err.message
                );
                None
            }
        }
    }

    async fn touch_last_login(&self, uid: &str) {
        let write = DocumentWrite::new()
            .server_timestamp(FIELD_LAST_LOGIN_AT)
            .server_timestamp(FIELD_UPDATED_AT);
        match self
            .store
            .update_document(&self.config.users_collection, uid, write)
            .await
        {
            Ok(()) => debug!("event=last_login_update module=session status=ok uid={uid}"),
            Err(err) => warn!(
                "event=last_login_update module=session status=error uid={} error_code={} error={}",
                uid, err.code, err.message
            ),
        }
    }

    fn signed_out_during(&self, op: &str, uid: &str) -> UserFacingError {
        warn!("event=session_{op} module=session status=error reason=signed_out_during_flow uid={uid}");
        UserFacingError::not_signed_in()
    }

    fn fail(&self, op: &str, started_at: Instant, err: &ProviderError) -> UserFacingError {
        let error = UserFacingError::from(err);
        warn!(
            "event=session_{} module=session status=error duration_ms={} error_category={} error_code={} detail={}",
            op,
            started_at.elapsed().as_millis(),
            error.category,
            err.code,
            error.detail
        );
        error
    }
}
