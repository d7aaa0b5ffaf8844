//! Session state machine.
//!
//! `SessionStore` is the single source of truth for who is signed in:
//!
//! ```text
//! Anonymous --set_credential--> Authenticating --(profile ok)--> Authenticated
//! Authenticating | Authenticated --revoke_credential--> Anonymous
//! Authenticated --refresh_credential(ok)--> Authenticated (new pair)
//! Authenticated --refresh_credential(rejected)--> Anonymous
//! ```
//!
//! Every transition happens under one lock together with the storage write
//! it implies, so the persisted pair and the in-memory state never disagree.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{
    ApiClient, ApiError, ApiResult, Execution, ExecutorConfig, RequestExecutor, RequestOptions,
};
use crate::models::UserProfile;
use crate::utils::fingerprint;

use super::credentials::{CredentialPair, CredentialStorage, StorageError};

/// Endpoint that hydrates the profile once a credential is accepted
pub const PROFILE_PATH: &str = "/api/action/profile";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No credential, not attempting one
    Anonymous,
    /// Credential present, profile fetch in flight
    Authenticating { credential: CredentialPair },
    /// Credential accepted, profile loaded
    Authenticated {
        credential: CredentialPair,
        user: UserProfile,
    },
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// A refresh is in flight; never set while `Anonymous`
    pub is_refreshing: bool,
}

impl SessionSnapshot {
    fn anonymous() -> Self {
        Self {
            state: SessionState::Anonymous,
            is_refreshing: false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.state, SessionState::Anonymous)
    }

    pub fn is_authenticating(&self) -> bool {
        matches!(self.state, SessionState::Authenticating { .. })
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    /// Nothing in progress; safe to render off this snapshot
    pub fn is_ready(&self) -> bool {
        !self.is_authenticating() && !self.is_refreshing
    }

    pub fn credential(&self) -> Option<&CredentialPair> {
        match &self.state {
            SessionState::Anonymous => None,
            SessionState::Authenticating { credential }
            | SessionState::Authenticated { credential, .. } => Some(credential),
        }
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match &self.state {
            SessionState::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }
}

/// Result of asking the session for a fresh credential
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A new pair is in place (or was already put in place by another caller)
    Refreshed(CredentialPair),
    /// The refresh token was refused; the session has been revoked
    Rejected,
    /// Nothing to refresh (anonymous, or authentication still in progress),
    /// or the session was replaced while the refresh was in flight
    Skipped,
    /// The refresh call failed in transit or came back malformed; the
    /// session is left as it was
    Unreachable(String),
}

impl RefreshOutcome {
    pub fn into_credential(self) -> Option<CredentialPair> {
        match self {
            RefreshOutcome::Refreshed(credential) => Some(credential),
            _ => None,
        }
    }
}

struct ProfileFetch {
    epoch: u64,
    cancel: CancellationToken,
}

struct SessionInner {
    api: ApiClient,
    storage: Arc<dyn CredentialStorage>,
    state: watch::Sender<SessionSnapshot>,
    /// Serializes transitions; also holds the outstanding profile fetch
    control: Mutex<Option<ProfileFetch>>,
    /// Bumped on every `set_credential`, lets slow operations notice that a
    /// newer credential arrived while they were awaiting
    epoch: AtomicU64,
    /// Only one refresh request is on the wire at a time
    refresh_gate: tokio::sync::Mutex<()>,
}

/// Shared handle to the session.
/// Clone is cheap; all clones observe and drive the same state machine.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl SessionStore {
    pub fn new(api: ApiClient, storage: Arc<dyn CredentialStorage>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::anonymous());
        Self {
            inner: Arc::new(SessionInner {
                api,
                storage,
                state,
                control: Mutex::new(None),
                epoch: AtomicU64::new(0),
                refresh_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn storage(&self) -> &Arc<dyn CredentialStorage> {
        &self.inner.storage
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Current access token, if the session holds a credential
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .credential()
            .map(|credential| credential.access_token.clone())
    }

    /// Wait until no authentication or refresh is in progress
    pub async fn wait_ready(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let ready = rx.wait_for(SessionSnapshot::is_ready).await.map(|s| s.clone());
        // The sender lives as long as `self`, so this cannot fail
        ready.unwrap_or_else(|_| self.snapshot())
    }

    /// Resume a persisted session, if storage holds a pair.
    ///
    /// Returns whether a profile fetch was started.
    pub fn restore(&self) -> Result<bool, StorageError> {
        if !self.snapshot().is_anonymous() {
            warn!("Session already active, not restoring from storage");
            return Ok(false);
        }
        let Some(credential) = self.inner.storage.load()? else {
            debug!(backend = self.inner.storage.backend(), "No persisted credential");
            return Ok(false);
        };
        info!(backend = self.inner.storage.backend(), "Restoring persisted session");
        let mut control = self.lock_control();
        self.begin_authenticating(&mut control, credential);
        Ok(true)
    }

    /// Install a new credential pair and start hydrating the profile.
    ///
    /// Replacing an authenticated session or interrupting one that is still
    /// authenticating is allowed, with a warning.
    pub async fn set_credential(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<(), StorageError> {
        let credential = CredentialPair::new(access_token, refresh_token);
        let snapshot = self.snapshot();
        if snapshot.is_authenticating() {
            warn!("Credential set while authentication in progress, revoking first");
            self.revoke_credential().await;
        } else if snapshot.is_authenticated() {
            warn!("User is already authenticated, replacing credential");
        }

        let mut control = self.lock_control();
        self.inner.storage.save(&credential)?;
        debug!(token = %fingerprint(&credential.access_token), "Stored new credential");
        self.begin_authenticating(&mut control, credential);
        Ok(())
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// A refused refresh token ends the session.
    pub async fn refresh_credential(&self) -> RefreshOutcome {
        self.spawn_refresh(None).await
    }

    /// Refresh on behalf of a call whose `rejected` token got a 401.
    ///
    /// If another caller already replaced that token, the current pair is
    /// returned without another round trip. Boxed because a refused refresh
    /// revokes, and revoking runs the logout call through an executor.
    pub(crate) fn refresh_rejected(
        &self,
        rejected: Option<&str>,
    ) -> BoxFuture<'static, RefreshOutcome> {
        self.spawn_refresh(rejected.map(str::to_string)).boxed()
    }

    /// Run the refresh on its own task.
    ///
    /// Once the request is on the wire the server may already have rotated
    /// the refresh token, so the swap (or revoke) and the `is_refreshing`
    /// reset must happen even if the caller is cancelled or dropped.
    fn spawn_refresh(
        &self,
        rejected: Option<String>,
    ) -> impl Future<Output = RefreshOutcome> + Send + 'static {
        let store = self.clone();
        let task = tokio::spawn(async move { store.refresh(rejected.as_deref()).await });
        async move {
            task.await.unwrap_or_else(|e| {
                error!(error = %e, "Refresh task failed");
                RefreshOutcome::Unreachable(e.to_string())
            })
        }
    }

    /// End the session locally and, best effort, on the server
    pub async fn revoke_credential(&self) {
        self.revoke(None).await;
    }

    /// Revoke, but only while `expected` is still the live pair.
    /// Returns whether the session was revoked.
    async fn revoke(&self, expected: Option<&CredentialPair>) -> bool {
        let (credential, epoch) = {
            let mut control = self.lock_control();
            let snapshot = self.snapshot();
            if let Some(expected) = expected {
                if snapshot.credential() != Some(expected) {
                    debug!("Session changed since the refused refresh, not revoking");
                    return false;
                }
            }
            if let Some(fetch) = control.take() {
                debug!(epoch = fetch.epoch, "Cancelling profile fetch");
                fetch.cancel.cancel();
            }
            if snapshot.is_authenticating() {
                warn!("User authentication in progress, cancelling it");
            }
            (snapshot.credential().cloned(), self.inner.epoch.load(Ordering::SeqCst))
        };

        let Some(credential) = credential else {
            warn!("User is not authenticated, nothing to revoke");
            return false;
        };

        self.logout(&credential).await;

        let control = self.lock_control();
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("A newer credential arrived during logout, keeping it");
            return false;
        }
        if let Err(e) = self.inner.storage.clear() {
            error!(error = %e, "Failed to clear persisted credential");
        }
        self.inner.state.send_replace(SessionSnapshot::anonymous());
        drop(control);
        info!("Session revoked");
        true
    }

    async fn logout(&self, credential: &CredentialPair) {
        // Logout must never block revocation
        match self.request_logout(credential).await {
            Ok(Execution::Settled(ApiResult::Success { .. })) => debug!("Logged out on server"),
            Ok(Execution::Settled(other)) => {
                warn!(status = ?other.status(), "Server logout failed, revoking locally anyway")
            }
            Ok(_) => debug!("Server logout did not complete"),
            Err(e) => warn!(error = %e, "Server logout failed, revoking locally anyway"),
        }
    }

    async fn request_logout(
        &self,
        credential: &CredentialPair,
    ) -> Result<Execution<serde_json::Value>, ApiError> {
        let body = serde_json::json!({ "refreshToken": credential.refresh_token });
        let executor = RequestExecutor::<serde_json::Value>::new(
            self.clone(),
            ExecutorConfig::new(self.inner.api.logout_path())
                .defaults(RequestOptions::post_json(&body)?)
                .persisted_credential(true),
        );
        executor.execute(RequestOptions::default()).await
    }

    async fn refresh(&self, rejected: Option<&str>) -> RefreshOutcome {
        let _gate = self.inner.refresh_gate.lock().await;

        let snapshot = self.snapshot();
        let credential = match &snapshot.state {
            SessionState::Anonymous => {
                warn!("User is not authenticated, refusing to refresh");
                return RefreshOutcome::Skipped;
            }
            SessionState::Authenticating { .. } => {
                warn!("User authentication in progress, refusing to refresh");
                return RefreshOutcome::Skipped;
            }
            SessionState::Authenticated { credential, .. } => credential.clone(),
        };

        if let Some(rejected) = rejected {
            if credential.access_token != rejected {
                debug!("Credential was already refreshed by another caller");
                return RefreshOutcome::Refreshed(credential);
            }
        }

        self.set_refreshing(true);
        let outcome = match self.request_refresh(&credential).await {
            Ok(Execution::Settled(ApiResult::Success { response, .. })) => {
                self.swap_credential(&credential, response.message)
            }
            Ok(Execution::Settled(ApiResult::Failure { status, .. })) => {
                warn!(%status, "Refresh token rejected, ending session");
                if self.revoke(Some(&credential)).await {
                    RefreshOutcome::Rejected
                } else {
                    RefreshOutcome::Skipped
                }
            }
            Ok(Execution::Settled(ApiResult::Unreachable { reason })) => {
                warn!(%reason, "Refresh request did not reach the server");
                RefreshOutcome::Unreachable(reason)
            }
            Ok(Execution::Suppressed | Execution::Cancelled) => {
                RefreshOutcome::Unreachable("refresh request did not complete".to_string())
            }
            Err(e) => {
                // Includes a 2xx with a malformed body
                warn!(error = %e, "Refresh request failed");
                RefreshOutcome::Unreachable(e.to_string())
            }
        };
        self.set_refreshing(false);
        outcome
    }

    async fn request_refresh(
        &self,
        credential: &CredentialPair,
    ) -> Result<Execution<CredentialPair>, ApiError> {
        let body = serde_json::json!({ "refreshToken": credential.refresh_token });
        let executor = RequestExecutor::<CredentialPair>::new(
            self.clone(),
            ExecutorConfig::new(self.inner.api.refresh_path())
                .defaults(RequestOptions::post_json(&body)?)
                .persisted_credential(true),
        );
        executor.execute(RequestOptions::default()).await
    }

    /// Persist and install `fresh` if `previous` is still the live pair
    fn swap_credential(&self, previous: &CredentialPair, fresh: CredentialPair) -> RefreshOutcome {
        let _control = self.lock_control();
        let still_current = self.snapshot().credential() == Some(previous);
        if !still_current {
            warn!("Session changed during refresh, discarding refreshed credential");
            return RefreshOutcome::Skipped;
        }
        if let Err(e) = self.inner.storage.save(&fresh) {
            error!(error = %e, "Failed to persist refreshed credential");
            return RefreshOutcome::Unreachable(e.to_string());
        }
        self.inner.state.send_if_modified(|snapshot| match &mut snapshot.state {
            SessionState::Authenticated { credential, .. } => {
                *credential = fresh.clone();
                snapshot.is_refreshing = false;
                true
            }
            _ => false,
        });
        info!(token = %fingerprint(&fresh.access_token), "Credential refreshed");
        RefreshOutcome::Refreshed(fresh)
    }

    fn set_refreshing(&self, refreshing: bool) {
        let _control = self.lock_control();
        self.inner.state.send_if_modified(|snapshot| {
            if snapshot.is_anonymous() || snapshot.is_refreshing == refreshing {
                return false;
            }
            snapshot.is_refreshing = refreshing;
            true
        });
    }

    /// Enter `Authenticating` and start the single profile fetch.
    /// Caller holds the control lock.
    fn begin_authenticating(&self, control: &mut Option<ProfileFetch>, credential: CredentialPair) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        if let Some(previous) = control.replace(ProfileFetch {
            epoch,
            cancel: cancel.clone(),
        }) {
            debug!(epoch = previous.epoch, "Cancelling previous profile fetch");
            previous.cancel.cancel();
        }

        self.inner.state.send_replace(SessionSnapshot {
            state: SessionState::Authenticating { credential },
            is_refreshing: false,
        });

        let store = self.clone();
        tokio::spawn(async move { store.fetch_profile(epoch, cancel).await });
    }

    async fn fetch_profile(&self, epoch: u64, cancel: CancellationToken) {
        let executor = RequestExecutor::<UserProfile>::new(
            self.clone(),
            ExecutorConfig::new(PROFILE_PATH).persisted_credential(true),
        );
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(epoch, "Profile fetch cancelled");
                return;
            }
            result = executor.execute(RequestOptions::default()) => result,
        };

        let failure = match result {
            Ok(Execution::Settled(ApiResult::Success { response, .. })) => {
                self.finish_authenticating(epoch, response.message);
                return;
            }
            Ok(Execution::Settled(other)) => other
                .error_message()
                .unwrap_or_else(|| "unknown error".to_string()),
            Ok(Execution::Suppressed | Execution::Cancelled) => return,
            Err(e) => e.to_string(),
        };

        let is_current = self
            .lock_control()
            .as_ref()
            .is_some_and(|fetch| fetch.epoch == epoch);
        if is_current {
            warn!(epoch, reason = %failure, "Profile fetch failed, revoking credential");
            self.revoke_credential().await;
        }
    }

    fn finish_authenticating(&self, epoch: u64, user: UserProfile) {
        let mut control = self.lock_control();
        let is_current = control
            .as_ref()
            .is_some_and(|fetch| fetch.epoch == epoch && !fetch.cancel.is_cancelled());
        if !is_current {
            debug!(epoch, "Discarding stale profile");
            return;
        }
        *control = None;

        let promoted = self.inner.state.send_if_modified(|snapshot| {
            let SessionState::Authenticating { credential } = &snapshot.state else {
                return false;
            };
            snapshot.state = SessionState::Authenticated {
                credential: credential.clone(),
                user: user.clone(),
            };
            true
        });
        if promoted {
            info!(user = %user.display_name(), "User authenticated");
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<ProfileFetch>> {
        self.inner.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStorage;
    use crate::config::PortalConfig;

    fn store(storage: Arc<MemoryStorage>) -> SessionStore {
        let config = PortalConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        SessionStore::new(ApiClient::new(&config).unwrap(), storage)
    }

    #[test]
    fn test_snapshot_readiness() {
        let credential = CredentialPair::new("a", "b");
        let mut snapshot = SessionSnapshot::anonymous();
        assert!(snapshot.is_ready());
        assert!(snapshot.credential().is_none());

        snapshot.state = SessionState::Authenticating {
            credential: credential.clone(),
        };
        assert!(!snapshot.is_ready());
        assert_eq!(snapshot.credential(), Some(&credential));

        snapshot.state = SessionState::Authenticated {
            credential,
            user: UserProfile::default(),
        };
        assert!(snapshot.is_ready());
        snapshot.is_refreshing = true;
        assert!(!snapshot.is_ready());
    }

    #[tokio::test]
    async fn test_refresh_on_anonymous_is_noop() {
        let storage = Arc::new(MemoryStorage::new());
        let session = store(storage.clone());

        assert_eq!(session.refresh_credential().await, RefreshOutcome::Skipped);
        assert_eq!(storage.write_count(), 0);
        assert!(session.snapshot().is_anonymous());
        assert!(!session.snapshot().is_refreshing);
    }

    #[tokio::test]
    async fn test_revoke_on_anonymous_is_noop() {
        let storage = Arc::new(MemoryStorage::new());
        let session = store(storage.clone());

        session.revoke_credential().await;
        assert!(session.snapshot().is_anonymous());
        assert_eq!(storage.write_count(), 0);
    }

    #[tokio::test]
    async fn test_set_refreshing_ignored_while_anonymous() {
        let session = store(Arc::new(MemoryStorage::new()));
        session.set_refreshing(true);
        assert!(!session.snapshot().is_refreshing);
    }

    #[tokio::test]
    async fn test_set_credential_persists_pair_immediately() {
        let storage = Arc::new(MemoryStorage::new());
        let session = store(storage.clone());

        session.set_credential("a", "b").await.unwrap();

        let snapshot = session.snapshot();
        assert!(snapshot.is_authenticating());
        assert_eq!(snapshot.credential(), Some(&CredentialPair::new("a", "b")));
        let entries = storage.entries();
        assert_eq!(entries["token"], "a");
        assert_eq!(entries["refreshToken"], "b");
        assert_eq!(session.access_token().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_credential_storage_failure_leaves_state_alone() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_fail_writes(true);
        let session = store(storage.clone());

        assert!(session.set_credential("a", "b").await.is_err());
        assert!(session.snapshot().is_anonymous());
    }

    #[tokio::test]
    async fn test_restore_from_storage_enters_authenticating() {
        let storage = Arc::new(MemoryStorage::with_pair(&CredentialPair::new("a", "b")));
        let session = store(storage);

        assert!(session.restore().unwrap());
        assert!(session.snapshot().is_authenticating());
        // A second restore does nothing while a session is active
        assert!(!session.restore().unwrap());
    }

    #[tokio::test]
    async fn test_restore_with_empty_storage() {
        let session = store(Arc::new(MemoryStorage::new()));
        assert!(!session.restore().unwrap());
        assert!(session.snapshot().is_anonymous());
    }

    #[tokio::test]
    async fn test_repeated_set_credential_keeps_one_profile_fetch() {
        let session = store(Arc::new(MemoryStorage::new()));

        session.set_credential("a1", "b1").await.unwrap();
        let first = session
            .lock_control()
            .as_ref()
            .map(|fetch| (fetch.epoch, fetch.cancel.clone()))
            .unwrap();

        // Still authenticating against an unreachable server: the second
        // call revokes, then starts a fresh fetch
        session.set_credential("a2", "b2").await.unwrap();
        let control = session.lock_control();
        let second = control.as_ref().unwrap();

        assert!(first.1.is_cancelled());
        assert!(second.epoch > first.0);
        assert!(!second.cancel.is_cancelled());
    }

    #[test]
    fn test_refresh_outcome_into_credential() {
        let pair = CredentialPair::new("T2", "R2");
        assert_eq!(
            RefreshOutcome::Refreshed(pair.clone()).into_credential(),
            Some(pair)
        );
        assert_eq!(RefreshOutcome::Rejected.into_credential(), None);
        assert_eq!(RefreshOutcome::Unreachable("x".to_string()).into_credential(), None);
    }
}
