//! One-shot HTTP listener that captures the authorization code from the
//! provider's redirect.
//!
//! The listener answers every path, since the registered redirect URL may
//! carry one. It delivers at most one outcome through a [`oneshot`] channel:
//! either the `code` query parameter, or the `error` the provider redirected
//! with. Requests that arrive without either are rejected with
//! [`CallbackError::MissingAuthCode`] and the listener keeps waiting, so the
//! operator can retry the login. Anything after the first delivery is turned
//! away with `410 Gone`.
use axum::{
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use core::time::Duration;
use oauth2::AuthorizationCode;
use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

/// Body returned to the browser once the code is captured.
pub const SUCCESS_BODY: &str = "success";

/// How long a captured-code shutdown may wait on open connections before the
/// server task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Outcome = Result<AuthorizationCode, CaptureError>;

/// Errors that end the wait for an authorization code.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The listener port could not be bound.
    #[error("couldn't bind redirect listener on port {port}: {source}")]
    Bind {
        /// The requested port.
        port: u16,
        /// The underlying io error.
        source: io::Error,
    },

    /// The server stopped before a code was delivered.
    #[error("redirect listener failed: {0}")]
    Serve(#[source] io::Error),

    /// The server went away without delivering anything.
    #[error("redirect listener closed before an authorization code arrived")]
    ListenerClosed,

    /// The provider redirected back with an error instead of a code.
    #[error("authorization denied by provider: {error}")]
    Denied {
        /// The `error` query parameter.
        error: String,
        /// The `error_description` query parameter, if any.
        description: Option<String>,
    },

    /// The operator did not complete the login in time.
    #[error("no authorization code received within {0:?}")]
    LoginTimeout(Duration),
}

/// Per-request rejections. These are answered to the browser and do not end
/// the wait, except for [`CallbackError::Denied`] whose cause is also
/// delivered to the waiting flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The request carried no `code` query parameter.
    #[error("missing authorization code")]
    MissingAuthCode,

    /// The provider redirected with an error.
    #[error("authorization denied: {0}")]
    Denied(String),

    /// A code has already been captured. The request was not processed.
    #[error("authorization code already captured")]
    AlreadyCaptured,
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingAuthCode | Self::Denied(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyCaptured => StatusCode::GONE,
        };
        (status, self.to_string()).into_response()
    }
}

/// The query parameters of a redirect that matter to the flow.
#[derive(Debug, Default, PartialEq, Eq)]
struct RedirectParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl RedirectParams {
    /// Parse a raw query string. Repeated parameters keep their last value;
    /// empty values count as absent.
    fn parse(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }
}

/// Shared handler state: the sending half of the handoff, until used.
#[derive(Debug, Clone)]
struct CallbackState {
    handoff: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl CallbackState {
    fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let state = Self {
            handoff: Arc::new(Mutex::new(Some(tx))),
        };
        (state, rx)
    }

    fn is_open(&self) -> bool {
        self.handoff.lock().map(|h| h.is_some()).unwrap_or(false)
    }

    /// Send `outcome` to the waiting flow. Only the first call succeeds.
    fn deliver(&self, outcome: Outcome) -> Result<(), CallbackError> {
        let sender = self
            .handoff
            .lock()
            .ok()
            .and_then(|mut handoff| handoff.take())
            .ok_or(CallbackError::AlreadyCaptured)?;

        if sender.send(outcome).is_err() {
            debug!("flow stopped waiting before the redirect arrived");
        }
        Ok(())
    }
}

async fn callback(
    State(state): State<CallbackState>,
    RawQuery(query): RawQuery,
) -> Result<Response, CallbackError> {
    if !state.is_open() {
        return Err(CallbackError::AlreadyCaptured);
    }

    let params = RedirectParams::parse(query.as_deref().unwrap_or_default());

    if let Some(error) = params.error {
        warn!(%error, description = ?params.error_description, "provider redirected with an error");
        state.deliver(Err(CaptureError::Denied {
            error: error.clone(),
            description: params.error_description,
        }))?;
        return Err(CallbackError::Denied(error));
    }

    let Some(code) = params.code else {
        warn!("auth code not found, waiting for another redirect");
        return Err(CallbackError::MissingAuthCode);
    };

    state.deliver(Ok(AuthorizationCode::new(code)))?;
    info!("captured auth code");
    Ok(([(header::CONNECTION, "close")], SUCCESS_BODY).into_response())
}

fn router(state: CallbackState) -> Router {
    Router::new().fallback(callback).with_state(state)
}

/// A bound, not yet serving, redirect listener.
#[derive(Debug)]
pub struct RedirectListener {
    listener: TcpListener,
}

impl RedirectListener {
    /// Bind the listener on all interfaces at `port`. Port `0` picks a free
    /// port, see [`Self::local_addr`].
    pub async fn bind(port: u16) -> Result<Self, CaptureError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|source| CaptureError::Bind { port, source })?;
        Ok(Self { listener })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start serving on a background task.
    pub fn spawn(self) -> PendingCode {
        let (state, code) = CallbackState::new();
        let (shutdown, stop) = oneshot::channel::<()>();

        info!(addr = ?self.listener.local_addr().ok(), "starting localhost listener");
        info!("if waiting, check the browser window for the provider login");

        let server = tokio::spawn(async move {
            axum::serve(self.listener, router(state))
                .with_graceful_shutdown(async {
                    let _ = stop.await;
                })
                .await
        });

        PendingCode {
            code,
            shutdown,
            server,
        }
    }
}

/// Handle to a running redirect listener.
#[derive(Debug)]
pub struct PendingCode {
    code: oneshot::Receiver<Outcome>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<io::Result<()>>,
}

impl PendingCode {
    /// Wait up to `timeout` for the redirect, then stop the listener.
    ///
    /// The listener has released its port by the time this returns.
    pub async fn wait(self, timeout: Duration) -> Result<AuthorizationCode, CaptureError> {
        let Self {
            code,
            shutdown,
            mut server,
        } = self;

        let outcome = tokio::time::timeout(timeout, code).await;

        let _ = shutdown.send(());
        let served = match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(served)) => served,
            Ok(Err(join)) => Err(io::Error::other(join)),
            Err(_) => {
                warn!("redirect listener did not shut down in time, aborting it");
                server.abort();
                Ok(())
            }
        };
        debug!("redirect listener stopped");

        match outcome {
            Ok(Ok(delivered)) => {
                if let Err(error) = served {
                    warn!(%error, "redirect listener exited uncleanly");
                }
                delivered
            }
            Ok(Err(_)) => Err(served
                .err()
                .map_or(CaptureError::ListenerClosed, CaptureError::Serve)),
            Err(_) => Err(CaptureError::LoginTimeout(timeout)),
        }
    }
}
