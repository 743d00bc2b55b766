//! In-process identity provider.
//!
//! # Responsibility
//! - Keep email/password accounts with Argon2id password hashes.
//! - Issue opaque session tokens and report session changes to observers.
//! - Record outgoing verification and reset emails in an outbox.
//!
//! # Invariants
//! - Accounts are keyed by normalized email; ids never change.
//! - Observers are invoked outside the provider lock.
//! - Revoked or replaced tokens fail with `auth/user-token-expired`.

use crate::model::document::Timestamp;
use crate::model::identity::{Credential, IdentityRecord, UserId};
use crate::model::validation::{is_valid_email, normalize_email};
use crate::provider::{
    AuthStateListener, IdentityProvider, ListenerRegistration, ProviderError, ProviderResult,
};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const PROVIDER_ID: &str = "local";

/// Tunables for [`LocalIdentityProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentitySettings {
    pub min_password_len: usize,
    /// Consecutive wrong passwords before sign-in is throttled.
    pub max_failed_attempts: u32,
    /// Maximum credential age accepted by `change_password`.
    pub recent_login_window: Duration,
}

impl Default for LocalIdentitySettings {
    fn default() -> Self {
        Self {
            min_password_len: 6,
            max_failed_attempts: 5,
            recent_login_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxKind {
    Verification,
    PasswordReset,
}

/// One email the provider would have sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub kind: OutboxKind,
    pub recipient: String,
}

struct Account {
    id: UserId,
    email: String,
    password_hash: String,
    display_name: Option<String>,
    email_verified: bool,
    disabled: bool,
    failed_attempts: u32,
}

impl Account {
    fn record(&self) -> IdentityRecord {
        IdentityRecord {
            id: self.id.clone(),
            email_address: self.email.clone(),
            display_name: self.display_name.clone(),
            email_verified: self.email_verified,
        }
    }
}

struct IssuedToken {
    user_id: UserId,
    issued_at: Timestamp,
}

#[derive(Default)]
struct ProviderState {
    /// Keyed by normalized email.
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, IssuedToken>,
    current: Option<String>,
    outbox: Vec<OutboxMessage>,
}

impl ProviderState {
    fn account_by_id(&self, user_id: &str) -> Option<&Account> {
        self.accounts.values().find(|account| account.id == user_id)
    }

    fn account_by_id_mut(&mut self, user_id: &str) -> Option<&mut Account> {
        self.accounts
            .values_mut()
            .find(|account| account.id == user_id)
    }

    fn issue(&mut self, user_id: &str) -> (String, Timestamp) {
        let token = Uuid::new_v4().simple().to_string();
        let issued_at = now();
        self.tokens.insert(
            token.clone(),
            IssuedToken {
                user_id: user_id.to_string(),
                issued_at,
            },
        );
        (token, issued_at)
    }

    /// Resolves a credential to its live account, rejecting stale tokens.
    fn authorize(&self, credential: &Credential) -> ProviderResult<&Account> {
        let issued = self
            .tokens
            .get(credential.token())
            .filter(|issued| issued.user_id == credential.user_id())
            .ok_or_else(|| error("auth/user-token-expired", "session is no longer valid"))?;
        let account = self
            .account_by_id(&issued.user_id)
            .ok_or_else(|| error("auth/user-not-found", "account no longer exists"))?;
        if account.disabled {
            return Err(error("auth/user-disabled", "account is disabled"));
        }
        Ok(account)
    }

    /// Drops every token of `user_id`; returns whether the current session ended.
    fn revoke_user(&mut self, user_id: &str) -> bool {
        self.tokens.retain(|_, issued| issued.user_id != user_id);
        let ended = self
            .current
            .as_ref()
            .is_some_and(|token| !self.tokens.contains_key(token));
        if ended {
            self.current = None;
        }
        ended
    }
}

struct ProviderInner {
    settings: LocalIdentitySettings,
    hasher: Argon2<'static>,
    state: Mutex<ProviderState>,
    listeners: Mutex<BTreeMap<u64, AuthStateListener>>,
    next_listener_id: AtomicU64,
}

/// [`IdentityProvider`] keeping accounts in memory.
#[derive(Clone)]
pub struct LocalIdentityProvider {
    inner: Arc<ProviderInner>,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self::with_settings(LocalIdentitySettings::default())
    }

    pub fn with_settings(settings: LocalIdentitySettings) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                settings,
                hasher: password_hasher(),
                state: Mutex::new(ProviderState::default()),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Emails sent so far, oldest first.
    pub fn outbox(&self) -> Vec<OutboxMessage> {
        self.inner.state.lock().outbox.clone()
    }

    pub fn account_count(&self) -> usize {
        self.inner.state.lock().accounts.len()
    }

    /// Marks an account's email as verified, as a verification link would.
    pub fn verify_email(&self, email: &str) -> ProviderResult<()> {
        let mut state = self.inner.state.lock();
        let account = state
            .accounts
            .get_mut(&normalize_email(email))
            .ok_or_else(|| error("auth/user-not-found", "no account for this email"))?;
        account.email_verified = true;
        Ok(())
    }

    /// Disables an account and ends all of its sessions.
    pub fn disable_account(&self, email: &str) -> ProviderResult<()> {
        let ended = {
            let mut state = self.inner.state.lock();
            let account = state
                .accounts
                .get_mut(&normalize_email(email))
                .ok_or_else(|| error("auth/user-not-found", "no account for this email"))?;
            account.disabled = true;
            let user_id = account.id.clone();
            state.revoke_user(&user_id)
        };
        info!("event=account_disable module=local_identity status=ok session_ended={ended}");
        if ended {
            self.emit(None);
        }
        Ok(())
    }

    /// Invalidates every token of `user_id`, e.g. after a server-side logout.
    pub fn revoke_sessions(&self, user_id: &str) -> bool {
        let ended = self.inner.state.lock().revoke_user(user_id);
        info!("event=sessions_revoke module=local_identity status=ok session_ended={ended}");
        if ended {
            self.emit(None);
        }
        ended
    }

    fn emit(&self, credential: Option<&Credential>) {
        let listeners: Vec<AuthStateListener> =
            self.inner.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(credential);
        }
    }

    fn hash(&self, password: &str) -> ProviderResult<String> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes)
            .map_err(|err| error("auth/internal-error", err.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| error("auth/internal-error", err.to_string()))?;
        let phc = self
            .inner
            .hasher
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| error("auth/internal-error", err.to_string()))?;
        Ok(phc.to_string())
    }

    fn verify(&self, hash: &str, password: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .inner
                .hasher
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    fn check_new_password(&self, password: &str) -> ProviderResult<()> {
        if password.chars().count() < self.inner.settings.min_password_len {
            return Err(error(
                "auth/weak-password",
                format!(
                    "password should be at least {} characters",
                    self.inner.settings.min_password_len
                ),
            ));
        }
        Ok(())
    }
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn sign_in(&self, email: &str, password: &str) -> ProviderResult<Credential> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(error("auth/invalid-email", "email address is badly formatted"));
        }

        let credential = {
            let mut state = self.inner.state.lock();
            let account = state
                .accounts
                .get_mut(&email)
                .ok_or_else(|| error("auth/user-not-found", "no account for this email"))?;
            if account.disabled {
                return Err(error("auth/user-disabled", "account is disabled"));
            }
            if account.failed_attempts >= self.inner.settings.max_failed_attempts {
                warn!("event=sign_in module=local_identity status=throttled");
                return Err(error(
                    "auth/too-many-requests",
                    "too many failed sign-in attempts",
                ));
            }
            if !self.verify(&account.password_hash, password) {
                account.failed_attempts += 1;
                return Err(error("auth/wrong-password", "password is invalid"));
            }
            account.failed_attempts = 0;
            let record = account.record();
            let (token, issued_at) = state.issue(&record.id);
            state.current = Some(token.clone());
            Credential::new(token, record, issued_at)
        };

        info!(
            "event=sign_in module=local_identity status=ok uid={}",
            credential.user_id()
        );
        self.emit(Some(&credential));
        Ok(credential)
    }

    async fn sign_up(&self, email: &str, password: &str) -> ProviderResult<Credential> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(error("auth/invalid-email", "email address is badly formatted"));
        }
        self.check_new_password(password)?;
        if self.inner.state.lock().accounts.contains_key(&email) {
            return Err(error(
                "auth/email-already-in-use",
                "email address is already in use",
            ));
        }
        let password_hash = self.hash(password)?;

        let credential = {
            let mut state = self.inner.state.lock();
            if state.accounts.contains_key(&email) {
                return Err(error(
                    "auth/email-already-in-use",
                    "email address is already in use",
                ));
            }
            let account = Account {
                id: Uuid::new_v4().simple().to_string(),
                email: email.clone(),
                password_hash,
                display_name: None,
                email_verified: false,
                disabled: false,
                failed_attempts: 0,
            };
            let record = account.record();
            state.accounts.insert(email, account);
            let (token, issued_at) = state.issue(&record.id);
            state.current = Some(token.clone());
            Credential::new(token, record, issued_at)
        };

        info!(
            "event=sign_up module=local_identity status=ok uid={}",
            credential.user_id()
        );
        self.emit(Some(&credential));
        Ok(credential)
    }

    async fn sign_out(&self, credential: &Credential) -> ProviderResult<()> {
        let ended = {
            let mut state = self.inner.state.lock();
            state.tokens.remove(credential.token());
            let ended = state.current.as_deref() == Some(credential.token());
            if ended {
                state.current = None;
            }
            ended
        };
        if ended {
            self.emit(None);
        }
        Ok(())
    }

    fn observe(&self, listener: AuthStateListener) -> ListenerRegistration {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, listener);
        let weak = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().remove(&id);
            }
        })
    }

    fn current_credential(&self) -> Option<Credential> {
        let state = self.inner.state.lock();
        let token = state.current.as_ref()?;
        let issued = state.tokens.get(token)?;
        let account = state.account_by_id(&issued.user_id)?;
        Some(Credential::new(
            token.clone(),
            account.record(),
            issued.issued_at,
        ))
    }

    async fn reauthenticate(
        &self,
        credential: &Credential,
        current_password: &str,
    ) -> ProviderResult<Credential> {
        let mut state = self.inner.state.lock();
        let password_hash = state.authorize(credential)?.password_hash.clone();
        if !self.verify(&password_hash, current_password) {
            if let Some(account) = state.account_by_id_mut(credential.user_id()) {
                account.failed_attempts += 1;
            }
            return Err(error("auth/wrong-password", "password is invalid"));
        }

        let record = state
            .account_by_id(credential.user_id())
            .map(Account::record)
            .ok_or_else(|| error("auth/user-not-found", "account no longer exists"))?;
        state.tokens.remove(credential.token());
        let (token, issued_at) = state.issue(&record.id);
        if state.current.as_deref() == Some(credential.token()) {
            state.current = Some(token.clone());
        }
        Ok(Credential::new(token, record, issued_at))
    }

    async fn change_password(
        &self,
        credential: &Credential,
        new_password: &str,
    ) -> ProviderResult<()> {
        self.check_new_password(new_password)?;
        let issued_at = {
            let state = self.inner.state.lock();
            state.authorize(credential)?;
            state
                .tokens
                .get(credential.token())
                .map(|issued| issued.issued_at)
                .unwrap_or(credential.issued_at())
        };
        let age_millis = now().as_millis().saturating_sub(issued_at.as_millis());
        if age_millis > self.inner.settings.recent_login_window.as_millis() as i64 {
            return Err(error(
                "auth/requires-recent-login",
                "this operation requires a recent sign-in",
            ));
        }

        let password_hash = self.hash(new_password)?;
        let mut state = self.inner.state.lock();
        let account = state
            .account_by_id_mut(credential.user_id())
            .ok_or_else(|| error("auth/user-not-found", "account no longer exists"))?;
        account.password_hash = password_hash;
        info!(
            "event=password_change module=local_identity status=ok uid={}",
            credential.user_id()
        );
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> ProviderResult<()> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(error("auth/invalid-email", "email address is badly formatted"));
        }
        let mut state = self.inner.state.lock();
        if !state.accounts.contains_key(&email) {
            return Err(error("auth/user-not-found", "no account for this email"));
        }
        state.outbox.push(OutboxMessage {
            kind: OutboxKind::PasswordReset,
            recipient: email,
        });
        Ok(())
    }

    async fn send_email_verification(&self, credential: &Credential) -> ProviderResult<()> {
        let mut state = self.inner.state.lock();
        let recipient = state.authorize(credential)?.email.clone();
        state.outbox.push(OutboxMessage {
            kind: OutboxKind::Verification,
            recipient,
        });
        Ok(())
    }

    async fn update_display_name(
        &self,
        credential: &Credential,
        name: &str,
    ) -> ProviderResult<IdentityRecord> {
        let mut state = self.inner.state.lock();
        state.authorize(credential)?;
        let account = state
            .account_by_id_mut(credential.user_id())
            .ok_or_else(|| error("auth/user-not-found", "account no longer exists"))?;
        account.display_name = Some(name.trim().to_string()).filter(|name| !name.is_empty());
        Ok(account.record())
    }
}

fn password_hasher() -> Argon2<'static> {
    // Light parameters: accounts live only as long as the process.
    match Params::new(4096, 1, 1, None) {
        Ok(params) => Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        Err(_) => Argon2::default(),
    }
}

fn now() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0);
    Timestamp::from_millis(millis)
}

fn error(code: &str, message: impl Into<String>) -> ProviderError {
    ProviderError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::{LocalIdentityProvider, LocalIdentitySettings, OutboxKind};
    use crate::model::identity::Credential;
    use crate::provider::IdentityProvider;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn sign_up_then_sign_in_keeps_account_id() {
        let provider = LocalIdentityProvider::new();
        let created = provider
            .sign_up(" Ana@Example.com ", "secret1")
            .await
            .expect("sign up should succeed");
        let signed_in = provider
            .sign_in("ana@example.com", "secret1")
            .await
            .expect("sign in should succeed");

        assert_eq!(created.user_id(), signed_in.user_id());
        assert_eq!(signed_in.identity().email_address, "ana@example.com");
        assert_ne!(created.token(), signed_in.token());
    }

    #[tokio::test]
    async fn sign_in_failures_carry_provider_codes() {
        let provider = LocalIdentityProvider::new();
        provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");

        let wrong = provider
            .sign_in("ana@example.com", "nope")
            .await
            .expect_err("wrong password");
        assert_eq!(wrong.code, "auth/wrong-password");

        let missing = provider
            .sign_in("bob@example.com", "secret1")
            .await
            .expect_err("unknown account");
        assert_eq!(missing.code, "auth/user-not-found");

        let malformed = provider
            .sign_in("not-an-email", "secret1")
            .await
            .expect_err("malformed email");
        assert_eq!(malformed.code, "auth/invalid-email");
    }

    #[tokio::test]
    async fn sign_up_rejects_duplicates_and_short_passwords() {
        let provider = LocalIdentityProvider::new();
        let weak = provider
            .sign_up("ana@example.com", "123")
            .await
            .expect_err("short password");
        assert_eq!(weak.code, "auth/weak-password");

        provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");
        let duplicate = provider
            .sign_up("ANA@example.com", "secret2")
            .await
            .expect_err("duplicate email");
        assert_eq!(duplicate.code, "auth/email-already-in-use");
        assert_eq!(provider.account_count(), 1);
    }

    #[tokio::test]
    async fn repeated_wrong_passwords_are_throttled() {
        let provider = LocalIdentityProvider::with_settings(LocalIdentitySettings {
            max_failed_attempts: 2,
            ..LocalIdentitySettings::default()
        });
        provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");
        for _ in 0..2 {
            provider
                .sign_in("ana@example.com", "wrong!")
                .await
                .expect_err("wrong password");
        }
        let throttled = provider
            .sign_in("ana@example.com", "secret1")
            .await
            .expect_err("throttled");
        assert_eq!(throttled.code, "auth/too-many-requests");
    }

    #[tokio::test]
    async fn observers_see_sign_in_and_sign_out() {
        let provider = LocalIdentityProvider::new();
        let events: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let registration = provider.observe(Arc::new(move |credential: Option<&Credential>| {
            sink.lock().push(credential.map(|c| c.user_id().to_string()));
        }));

        let credential = provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");
        provider
            .sign_out(&credential)
            .await
            .expect("sign out should succeed");
        provider
            .sign_out(&credential)
            .await
            .expect("second sign out should succeed");
        assert!(provider.current_credential().is_none());

        registration.remove();
        let events = events.lock().clone();
        assert_eq!(events, vec![Some(credential.user_id().to_string()), None]);
    }

    #[tokio::test]
    async fn reauthenticate_replaces_token() {
        let provider = LocalIdentityProvider::new();
        let credential = provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");

        let fresh = provider
            .reauthenticate(&credential, "secret1")
            .await
            .expect("reauth should succeed");
        assert_eq!(
            provider.current_credential().map(|c| c.token().to_string()),
            Some(fresh.token().to_string())
        );

        let stale = provider
            .send_email_verification(&credential)
            .await
            .expect_err("old token is revoked");
        assert_eq!(stale.code, "auth/user-token-expired");
    }

    #[tokio::test]
    async fn change_password_requires_recent_login() {
        let provider = LocalIdentityProvider::with_settings(LocalIdentitySettings {
            recent_login_window: Duration::ZERO,
            ..LocalIdentitySettings::default()
        });
        let credential = provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let error = provider
            .change_password(&credential, "another1")
            .await
            .expect_err("stale credential");
        assert_eq!(error.code, "auth/requires-recent-login");
    }

    #[tokio::test]
    async fn disabling_account_ends_session_and_blocks_sign_in() {
        let provider = LocalIdentityProvider::new();
        provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");
        provider
            .disable_account("ana@example.com")
            .expect("disable should succeed");

        assert!(provider.current_credential().is_none());
        let error = provider
            .sign_in("ana@example.com", "secret1")
            .await
            .expect_err("disabled account");
        assert_eq!(error.code, "auth/user-disabled");
    }

    #[tokio::test]
    async fn outbox_records_verification_and_reset() {
        let provider = LocalIdentityProvider::new();
        let credential = provider
            .sign_up("ana@example.com", "secret1")
            .await
            .expect("sign up should succeed");
        provider
            .send_email_verification(&credential)
            .await
            .expect("verification should send");
        provider
            .send_password_reset("ANA@example.com")
            .await
            .expect("reset should send");

        let kinds: Vec<OutboxKind> = provider.outbox().into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![OutboxKind::Verification, OutboxKind::PasswordReset]);
    }
}
