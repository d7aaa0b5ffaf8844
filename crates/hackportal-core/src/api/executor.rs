//! Single-operation request executor.
//!
//! A `RequestExecutor` runs one named endpoint end-to-end: it attaches the
//! current access token, detects an expired credential (401), asks the
//! session for exactly one refresh, retries once, and records the settled
//! result. One executor has at most one call in flight; an overlapping call
//! is either suppressed (debounce) or replaces the running one.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{RefreshOutcome, SessionStore};

use super::request::RequestOptions;
use super::response::ApiResult;
use super::ApiError;

/// How an executor is set up
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Endpoint path, appended to the API base URL
    pub path: String,
    /// Options every call starts from
    pub defaults: RequestOptions,
    /// Suppress overlapping calls instead of aborting the running one
    pub debounce: bool,
    /// Read the token straight from credential storage instead of the
    /// session state. Used by the credential endpoints themselves, which
    /// run while the session is mid-transition. Never triggers a refresh.
    pub use_persisted_credential: bool,
}

impl ExecutorConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            defaults: RequestOptions::default(),
            debounce: true,
            use_persisted_credential: false,
        }
    }

    pub fn defaults(mut self, defaults: RequestOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn debounce(mut self, debounce: bool) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn persisted_credential(mut self, persisted: bool) -> Self {
        self.use_persisted_credential = persisted;
        self
    }
}

/// Loading flag and last settled result, for polling or watching consumers
#[derive(Debug, Clone, PartialEq)]
pub struct RequestState<T> {
    pub is_loading: bool,
    pub last_result: Option<ApiResult<T>>,
}

impl<T> Default for RequestState<T> {
    fn default() -> Self {
        Self {
            is_loading: false,
            last_result: None,
        }
    }
}

/// What happened to one `execute` call
#[derive(Debug, Clone, PartialEq)]
pub enum Execution<T> {
    /// The call ran to completion
    Settled(ApiResult<T>),
    /// Another call was already in flight and debounce is on
    Suppressed,
    /// The call was aborted or replaced before it settled
    Cancelled,
}

impl<T> Execution<T> {
    pub fn settled(self) -> Option<ApiResult<T>> {
        match self {
            Execution::Settled(result) => Some(result),
            _ => None,
        }
    }
}

struct InFlight {
    call_id: u64,
    cancel: CancellationToken,
}

pub struct RequestExecutor<T> {
    session: SessionStore,
    config: ExecutorConfig,
    state: watch::Sender<RequestState<T>>,
    in_flight: Mutex<Option<InFlight>>,
    next_call_id: AtomicU64,
    _payload: PhantomData<fn() -> T>,
}

impl<T> RequestExecutor<T>
where
    T: DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(session: SessionStore, config: ExecutorConfig) -> Self {
        let (state, _) = watch::channel(RequestState::default());
        Self {
            session,
            config,
            state,
            in_flight: Mutex::new(None),
            next_call_id: AtomicU64::new(1),
            _payload: PhantomData,
        }
    }

    /// Seed `last_result` before the first call
    pub fn with_initial_result(self, result: ApiResult<T>) -> Self {
        self.state.send_modify(|state| state.last_result = Some(result));
        self
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn state(&self) -> RequestState<T> {
        self.state.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    /// Watch loading/result changes
    pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
        self.state.subscribe()
    }

    /// Run the call with `overrides` merged over the configured defaults.
    ///
    /// Transport failures settle as `ApiResult::Unreachable`; only a 2xx
    /// body that fails to parse (or a request that cannot be built) is an
    /// `Err`.
    pub async fn execute(&self, overrides: RequestOptions) -> Result<Execution<T>, ApiError> {
        let Some((call_id, cancel)) = self.begin() else {
            return Ok(Execution::Suppressed);
        };
        let mut guard = CallGuard {
            executor: self,
            call_id,
            settled: false,
        };
        let options = self.config.defaults.merged(&overrides);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.run(&options) => Some(result),
        };

        match outcome {
            None => {
                debug!(path = %self.config.path, call_id, "Request cancelled");
                Ok(Execution::Cancelled)
            }
            Some(Err(e)) => {
                warn!(path = %self.config.path, error = %e, "Request failed");
                Err(e)
            }
            Some(Ok(result)) => {
                if cancel.is_cancelled() || !guard.settle(result.clone()) {
                    debug!(path = %self.config.path, call_id, "Discarding result of superseded request");
                    return Ok(Execution::Cancelled);
                }
                Ok(Execution::Settled(result))
            }
        }
    }

    /// Cancel the in-flight call, if any
    pub fn abort(&self) {
        let Some(active) = self.lock_in_flight().take() else {
            return;
        };
        debug!(path = %self.config.path, call_id = active.call_id, "Aborting request");
        active.cancel.cancel();
        self.state.send_modify(|state| state.is_loading = false);
    }

    /// Claim the in-flight slot, or `None` when debounced
    fn begin(&self) -> Option<(u64, CancellationToken)> {
        let mut slot = self.lock_in_flight();
        if let Some(active) = slot.as_ref() {
            if self.config.debounce {
                warn!(path = %self.config.path, "Request already in progress, ignoring new call");
                return None;
            }
            warn!(path = %self.config.path, "Request already in progress, aborting it");
            active.cancel.cancel();
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot = Some(InFlight {
            call_id,
            cancel: cancel.clone(),
        });
        self.state.send_modify(|state| state.is_loading = true);
        Some((call_id, cancel))
    }

    async fn run(&self, options: &RequestOptions) -> Result<ApiResult<T>, ApiError> {
        let token = self.current_token()?;
        let first = self.attempt(options, token.as_deref()).await?;
        if !first.is_unauthorized() || self.config.use_persisted_credential {
            return Ok(first);
        }

        debug!(path = %self.config.path, "Access token rejected, refreshing");
        match self.session.refresh_rejected(token.as_deref()).await {
            RefreshOutcome::Refreshed(credential) => {
                info!(path = %self.config.path, "Retrying with refreshed credential");
                self.attempt(options, Some(&credential.access_token)).await
            }
            RefreshOutcome::Unreachable(reason) => Ok(ApiResult::Unreachable { reason }),
            RefreshOutcome::Rejected | RefreshOutcome::Skipped => Ok(first),
        }
    }

    async fn attempt(
        &self,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<ApiResult<T>, ApiError> {
        let request = self.session.api().build(&self.config.path, options, token)?;
        match request.send().await {
            Ok(response) => super::ApiClient::read_result(response).await,
            Err(e) => {
                warn!(path = %self.config.path, error = %e, "Request did not reach the server");
                Ok(ApiResult::Unreachable {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn current_token(&self) -> Result<Option<String>, ApiError> {
        if self.config.use_persisted_credential {
            let stored = self.session.storage().load()?;
            return Ok(stored.map(|pair| pair.access_token));
        }
        Ok(self.session.access_token())
    }
}

impl<T> RequestExecutor<T> {
    /// Release the slot if `call_id` still owns it, recording `result`.
    /// Returns false when a newer call or an abort took over.
    fn release(&self, call_id: u64, result: Option<ApiResult<T>>) -> bool {
        let mut slot = self.lock_in_flight();
        let owns_slot = slot.as_ref().is_some_and(|active| active.call_id == call_id);
        if !owns_slot {
            return false;
        }
        *slot = None;
        self.state.send_modify(|state| {
            state.is_loading = false;
            if let Some(result) = result {
                state.last_result = Some(result);
            }
        });
        true
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for RequestExecutor<T> {
    fn drop(&mut self) {
        if let Some(active) = self.lock_in_flight().take() {
            active.cancel.cancel();
        }
    }
}

/// Frees the in-flight slot when an `execute` future ends for any reason,
/// including being dropped mid-call, so the loading flag never sticks.
struct CallGuard<'a, T> {
    executor: &'a RequestExecutor<T>,
    call_id: u64,
    settled: bool,
}

impl<T> CallGuard<'_, T> {
    fn settle(&mut self, result: ApiResult<T>) -> bool {
        self.settled = true;
        self.executor.release(self.call_id, Some(result))
    }
}

impl<T> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.executor.release(self.call_id, None);
        }
    }
}
