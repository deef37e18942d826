//! OAuth token lifecycle: validity check, deduplicated refresh, interactive re-authorization.
//!
//! The credential is the only engine-wide mutable state. Every mutation goes
//! through [`TokenManager`]: refreshes are funneled through one shared future
//! so concurrent callers never race the single-use refresh token.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Method, Url};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use docbridge_core::{
    defaults, AuthSignal, AuthorizationPrompt, Credential, CredentialStore, Error, Result,
};

use crate::http::RestClient;
use crate::rate_limit::EndpointClass;
use crate::types::{OAuthTokenResponse, RefreshTokenRequest, UserInfo};

type PendingRefresh = Shared<BoxFuture<'static, bool>>;

/// Owner of the live [`Credential`].
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    rest: Arc<RestClient>,
    store: Arc<dyn CredentialStore>,
    prompt: Arc<dyn AuthorizationPrompt>,
    signal: AuthSignal,
    credential: RwLock<Credential>,
    pending: Mutex<Option<PendingRefresh>>,
    reauth_timeout: Duration,
    settle_delay: Duration,
}

impl TokenManager {
    /// Create a manager and load the stored credential.
    pub async fn load(
        rest: Arc<RestClient>,
        store: Arc<dyn CredentialStore>,
        prompt: Arc<dyn AuthorizationPrompt>,
        signal: AuthSignal,
    ) -> Result<Self> {
        let credential = store.load().await?;
        Ok(Self {
            inner: Arc::new(Inner {
                rest,
                store,
                prompt,
                signal,
                credential: RwLock::new(credential),
                pending: Mutex::new(None),
                reauth_timeout: defaults::REAUTH_TIMEOUT,
                settle_delay: defaults::REAUTH_SETTLE_DELAY,
            }),
        })
    }

    /// Override the re-authorization wait bounds.
    ///
    /// Must be called before the manager is cloned.
    pub fn with_reauth_timing(mut self, wait: Duration, settle: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.reauth_timeout = wait;
            inner.settle_delay = settle;
        }
        self
    }

    /// Snapshot of the live credential.
    pub async fn credential(&self) -> Credential {
        self.inner.credential.read().await.clone()
    }

    /// Current access token, or `Unauthorized` when there is none.
    pub async fn access_token(&self) -> Result<String> {
        self.inner
            .credential
            .read()
            .await
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("no access token; authorization required".into()))
    }

    /// Signal handle the host's OAuth callback notifies.
    pub fn auth_signal(&self) -> &AuthSignal {
        &self.inner.signal
    }

    /// OAuth authorize URL the user must visit.
    pub fn authorization_url(&self) -> Result<String> {
        let config = self.inner.rest.config();
        if config.app_id.is_empty() {
            return Err(Error::Config("app id is not configured".into()));
        }
        let state = uuid::Uuid::new_v4().to_string();
        let url = Url::parse_with_params(
            &config.auth_url,
            &[
                ("client_id", config.app_id.as_str()),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("scope", defaults::OAUTH_SCOPE),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("invalid auth url: {}", e)))?;
        Ok(url.into())
    }

    /// Make sure a working access token is available.
    ///
    /// Returns `false` when no valid token could be obtained; with
    /// `interactive` set this includes waiting for the user to re-authorize.
    #[instrument(skip(self))]
    pub async fn ensure_valid(&self, interactive: bool) -> bool {
        let current = self.credential().await;
        let Some(token) = current.access_token.filter(|t| !t.is_empty()) else {
            debug!("No access token stored");
            return interactive && self.wait_for_reauthorization().await;
        };

        match self.verify(&token).await {
            Ok(()) => true,
            Err(e) if e.is_auth() => {
                info!(error = %e, "Access token rejected, refreshing");
                if self.refresh_stale(&token).await {
                    return true;
                }
                interactive && self.wait_for_reauthorization().await
            }
            Err(e) => {
                warn!(error = %e, "Token check failed");
                false
            }
        }
    }

    /// Refresh the token pair. Concurrent callers share one network call.
    pub async fn refresh(&self) -> bool {
        let pending = {
            let mut slot = match self.inner.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match slot.as_ref() {
                Some(fut) if fut.peek().is_none() => fut.clone(),
                _ => {
                    let inner = Arc::clone(&self.inner);
                    let fut = async move { inner.refresh_once().await }.boxed().shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        pending.await
    }

    /// Refresh unless another caller already replaced the rejected token.
    pub async fn refresh_stale(&self, rejected: &str) -> bool {
        {
            let current = self.inner.credential.read().await;
            if let Some(token) = current.access_token.as_deref() {
                if !token.is_empty() && token != rejected {
                    debug!("Token already refreshed by another caller");
                    return true;
                }
            }
        }
        self.refresh().await
    }

    async fn verify(&self, token: &str) -> Result<()> {
        let req = self
            .inner
            .rest
            .request(Method::GET, "/authen/v1/user_info", Some(token));
        let user: UserInfo = self
            .inner
            .rest
            .execute(EndpointClass::DocumentMetadata, req)
            .await?;
        debug!(user = user.name.as_deref().unwrap_or(""), "Token check succeeded");
        Ok(())
    }

    /// Open the authorization page and wait for the completion signal.
    async fn wait_for_reauthorization(&self) -> bool {
        // Subscribe before opening the page so a fast callback is not missed.
        let mut rx = self.inner.signal.subscribe();

        let url = match self.authorization_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build authorization URL");
                return false;
            }
        };
        if let Err(e) = self.inner.prompt.open(&url) {
            warn!(error = %e, "Failed to open authorization page");
            return false;
        }

        info!(
            timeout_secs = self.inner.reauth_timeout.as_secs(),
            "Waiting for authorization"
        );
        let signalled = match timeout(self.inner.reauth_timeout, rx.recv()).await {
            Ok(Ok(())) | Ok(Err(RecvError::Lagged(_))) => true,
            Ok(Err(RecvError::Closed)) => false,
            Err(_) => {
                warn!("Authorization wait timed out");
                false
            }
        };
        drop(rx);

        if !signalled {
            return false;
        }

        sleep(self.inner.settle_delay).await;
        match self.inner.store.load().await {
            Ok(credential) => {
                let valid = credential.has_access_token();
                *self.inner.credential.write().await = credential;
                info!(valid, "Reloaded credential after authorization");
                valid
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload credential after authorization");
                false
            }
        }
    }
}

impl Inner {
    async fn refresh_once(&self) -> bool {
        let refresh_token = self
            .credential
            .read()
            .await
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty());
        let Some(refresh_token) = refresh_token else {
            info!("No refresh token available");
            return false;
        };

        let config = self.rest.config();
        let body = RefreshTokenRequest {
            grant_type: "refresh_token",
            client_id: &config.app_id,
            client_secret: &config.app_secret,
            refresh_token: &refresh_token,
        };
        let req = self
            .rest
            .request(Method::POST, "/authen/v2/oauth/token", None)
            .json(&body);

        match self
            .rest
            .execute_raw::<OAuthTokenResponse>(EndpointClass::DocumentMetadata, req)
            .await
        {
            Ok(tokens) => {
                let updated = Credential {
                    access_token: Some(tokens.access_token),
                    refresh_token: tokens.refresh_token.or(Some(refresh_token)),
                };
                *self.credential.write().await = updated.clone();
                if let Err(e) = self.store.save(&updated).await {
                    warn!(error = %e, "Failed to persist refreshed credential");
                }
                info!(expires_in = tokens.expires_in.unwrap_or(0), "Access token refreshed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                if refresh_token_is_dead(&e) {
                    let cleared = {
                        let mut credential = self.credential.write().await;
                        credential.refresh_token = None;
                        credential.clone()
                    };
                    if let Err(e) = self.store.save(&cleared).await {
                        warn!(error = %e, "Failed to persist cleared refresh token");
                    }
                }
                false
            }
        }
    }
}

/// A rejection by the server proves the refresh token unusable; transport
/// failures and throttling do not.
fn refresh_token_is_dead(e: &Error) -> bool {
    !matches!(
        e,
        Error::Request(_) | Error::RateLimited(_) | Error::Timeout(_)
    )
}
