//! Identity provider SPI.

use crate::model::identity::{Credential, IdentityRecord};
use crate::provider::{ListenerRegistration, ProviderResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives provider session changes: `Some` on sign-in, `None` on sign-out
/// or provider-side invalidation.
pub type AuthStateListener = Arc<dyn Fn(Option<&Credential>) + Send + Sync>;

/// Credential-based identity provider.
///
/// Implementations deliver `observe` events synchronously, in the order the
/// underlying session changes happen.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable provider id used in log events.
    fn provider_id(&self) -> &str;

    async fn sign_in(&self, email: &str, password: &str) -> ProviderResult<Credential>;

    async fn sign_up(&self, email: &str, password: &str) -> ProviderResult<Credential>;

    async fn sign_out(&self, credential: &Credential) -> ProviderResult<()>;

    fn observe(&self, listener: AuthStateListener) -> ListenerRegistration;

    /// Credential the provider currently holds, with a fresh identity snapshot.
    fn current_credential(&self) -> Option<Credential>;

    /// Issues a freshly authenticated credential for the same account.
    async fn reauthenticate(
        &self,
        credential: &Credential,
        current_password: &str,
    ) -> ProviderResult<Credential>;

    async fn change_password(&self, credential: &Credential, new_password: &str)
        -> ProviderResult<()>;

    async fn send_password_reset(&self, email: &str) -> ProviderResult<()>;

    async fn send_email_verification(&self, credential: &Credential) -> ProviderResult<()>;

    async fn update_display_name(
        &self,
        credential: &Credential,
        name: &str,
    ) -> ProviderResult<IdentityRecord>;
}
