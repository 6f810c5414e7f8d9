//! Device API client with per-device token caching.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::Client;
use reqwest::header::COOKIE;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{GatewayError, GatewayResult};
use super::types::{AUTHORIZE_PATH, CallOptions, DeviceCredentials, DeviceResponse};

/// Default bound on every outbound device request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A token authorization shared by every caller that asked for the same base.
type Flight = Shared<BoxFuture<'static, GatewayResult<String>>>;

struct InFlight {
    id: u64,
    future: Flight,
}

/// A session token and the invalidation epoch it was obtained under.
struct CachedToken {
    token: String,
    epoch: u64,
}

struct GatewayInner {
    /// HTTP client.
    client: Client,
    /// Operator identity presented to every device.
    credentials: DeviceCredentials,
    /// Base URL -> session token. Entries from an older epoch are dead.
    tokens: DashMap<String, CachedToken>,
    /// Base URL -> authorization currently in progress.
    in_flight: DashMap<String, InFlight>,
    next_flight: AtomicU64,
    /// Bumped by `invalidate_all`; tokens obtained under an older epoch are
    /// never served from the cache.
    epoch: AtomicU64,
}

/// Client for calling decoder appliance APIs.
///
/// Cloning is cheap; all clones share one token cache.
#[derive(Clone)]
pub struct DeviceGateway {
    inner: Arc<GatewayInner>,
}

impl DeviceGateway {
    /// Create a new device gateway.
    pub fn new(credentials: DeviceCredentials, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(GatewayInner {
                client,
                credentials,
                tokens: DashMap::new(),
                in_flight: DashMap::new(),
                next_flight: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
        })
    }

    /// Return a session token for `base`, authorizing if none is cached.
    ///
    /// Concurrent callers for the same base while no token is cached share a
    /// single credential exchange and all observe its outcome.
    pub async fn authorize(&self, base: &str) -> GatewayResult<String> {
        if let Some(token) = self.cached_token(base) {
            return Ok(token);
        }

        self.join_or_start(base).await
    }

    /// Call `path` on the device at `base` and return its decoded JSON body.
    ///
    /// A body whose `result` is `auth-failed` evicts the cached token so the
    /// next call re-authorizes. The call itself is not retried.
    pub async fn call(
        &self,
        base: &str,
        path: &str,
        options: CallOptions,
    ) -> GatewayResult<DeviceResponse> {
        let token = self.authorize(base).await?;

        let url = format!("{}{}", base, path);
        let mut request = self
            .inner
            .client
            .request(options.method, &url)
            .header(COOKIE, format!("token={}", token));
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::transport(base, e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transport(base, e.to_string()))?;

        let data: Value = match serde_json::from_str(&text) {
            Ok(data) => data,
            Err(e) => {
                debug!(base, %status, "device returned a non-JSON body: {}", e);
                return Err(GatewayError::UpstreamFailure {
                    base: base.to_string(),
                    status: status.as_u16(),
                    body: Value::String(text),
                });
            }
        };

        let reply = DeviceResponse {
            status: status.as_u16(),
            data,
        };

        if reply.is_auth_rejection() {
            warn!(base, path, "device rejected session token, evicting it");
            self.invalidate(base);
        }

        if !status.is_success() {
            return Err(GatewayError::UpstreamFailure {
                base: base.to_string(),
                status: reply.status,
                body: reply.data,
            });
        }

        Ok(reply)
    }

    /// Drop the cached token for `base`.
    pub fn invalidate(&self, base: &str) {
        if self.inner.tokens.remove(base).is_some() {
            debug!(base, "invalidated device token");
        }
    }

    /// Drop every cached token.
    pub fn invalidate_all(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let count = self.inner.tokens.len();
        self.inner.tokens.clear();
        info!(count, "invalidated all device tokens");
    }

    /// Whether a token is currently cached for `base`.
    pub fn has_token(&self, base: &str) -> bool {
        self.cached_token(base).is_some()
    }

    fn cached_token(&self, base: &str) -> Option<String> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.inner
            .tokens
            .get(base)
            .filter(|cached| cached.epoch == epoch)
            .map(|cached| cached.token.clone())
    }

    /// Attach to the authorization in progress for `base` or start one.
    fn join_or_start(&self, base: &str) -> Flight {
        match self.inner.in_flight.entry(base.to_string()) {
            Entry::Occupied(entry) => {
                debug!(base, "joining in-flight authorization");
                entry.get().future.clone()
            }
            Entry::Vacant(entry) => {
                // A flight may have settled between the cache miss and here.
                if let Some(token) = self.cached_token(base) {
                    return futures::future::ready(Ok(token)).boxed().shared();
                }

                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let epoch = self.inner.epoch.load(Ordering::SeqCst);
                let inner = Arc::clone(&self.inner);
                let base = base.to_string();

                let future = async move {
                    let result = inner.exchange(&base).await;
                    if let Ok(token) = &result {
                        // A racing `invalidate_all` leaves this entry with a stale epoch.
                        if inner.epoch.load(Ordering::SeqCst) == epoch {
                            inner.tokens.insert(
                                base.clone(),
                                CachedToken {
                                    token: token.clone(),
                                    epoch,
                                },
                            );
                        } else {
                            debug!(base = %base, "tokens invalidated during authorization, not caching");
                        }
                    }
                    inner.in_flight.remove_if(&base, |_, flight| flight.id == id);
                    result
                }
                .boxed()
                .shared();

                entry.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        }
    }
}

impl GatewayInner {
    /// Exchange the operator credentials for a session token.
    async fn exchange(&self, base: &str) -> GatewayResult<String> {
        let url = format!("{}{}", base, AUTHORIZE_PATH);
        info!(base, "authorizing with device");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("user", self.credentials.user.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::auth(base, e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::auth(base, format!("HTTP {}: {}", status, e)))?;
        if !status.is_success() {
            return Err(GatewayError::auth(base, format!("HTTP {}: {}", status, body)));
        }

        let accepted = body.get("result").and_then(Value::as_str) == Some("ok");
        match body.pointer("/data/token").and_then(Value::as_str) {
            Some(token) if accepted && !token.is_empty() => Ok(token.to_string()),
            _ => Err(GatewayError::auth(base, body.to_string())),
        }
    }
}
