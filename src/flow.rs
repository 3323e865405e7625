//! The `test` and `timeout` orchestrations.
//!
//! Both flows start the same way: send the operator to the login page, capture
//! the code on the redirect listener and exchange it. Failing to reach the
//! provider always ends a flow. The timeout flow tolerates rejected refreshes
//! so that it can keep watching the token it already has.
use crate::auth::{
    authorize_url, AuthCodeClient, CaptureError, ConfigError, ExchangeError, Grant, Launcher,
    ProbeError, RedirectListener, Session,
};
use chrono::{Local, TimeDelta};
use core::{future::Future, time::Duration};
use oauth2::AuthorizationCode;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default time the operator has to complete the browser login.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Extra polling allowed past the reported expiry, so that the run always
/// observes a failed probe.
pub const EXPIRY_TOLERANCE: Duration = Duration::from_secs(300);

/// Pause between echo probes in the timeout flow.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Errors that abort a flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The authorization URL could not be built from the root URL.
    #[error("invalid authorization url: {0}")]
    AuthorizeUrl(#[from] url::ParseError),

    /// No authorization code was captured.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Exchanging the authorization code failed.
    #[error("error getting token from auth code: {0}")]
    CodeExchange(#[source] ExchangeError),

    /// Refreshing the tokens failed.
    #[error("error refreshing token: {0}")]
    Refresh(#[source] ExchangeError),

    /// The echo endpoint could not be reached.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Outcome of the `test` flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestReport {
    /// Whether the echo endpoint accepted the first access token.
    pub echo: bool,
    /// Number of successful refresh grants.
    pub refreshes: usize,
}

/// Outcome of [`poll_until_expiry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Probes that succeeded, each followed by one interval of sleep.
    pub passed: u64,
    /// Whether polling stopped because a probe returned `false`, rather than
    /// by reaching the bound.
    pub probe_failed: bool,
}

/// Outcome of the `timeout` flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutReport {
    /// Lifetime the provider reported for the polled access token.
    pub expires_in: Duration,
    /// How the polling loop ended.
    pub poll: PollReport,
    /// Time from the refresh that started the clock to the end of polling.
    pub elapsed: Duration,
    /// Whether the echo endpoint accepted the token issued after polling.
    pub final_echo: bool,
}

/// Number of polling intervals allowed for a token that lives `expires_in`:
/// its lifetime in seconds plus [`EXPIRY_TOLERANCE`].
pub const fn poll_bound(expires_in: Duration) -> u64 {
    expires_in
        .as_secs()
        .saturating_add(EXPIRY_TOLERANCE.as_secs())
}

/// Probe once per `interval` until a probe returns `false` or `bound`
/// intervals have passed.
///
/// The probe runs at most `bound` times. Errors from the probe end polling
/// immediately.
pub async fn poll_until_expiry<F, Fut, E>(
    bound: u64,
    interval: Duration,
    mut probe: F,
) -> Result<PollReport, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut elapsed = 0;
    while elapsed < bound {
        if !probe().await? {
            return Ok(PollReport {
                passed: elapsed,
                probe_failed: true,
            });
        }
        info!(echo = true, elapsed, "sleeping {interval:?}");
        tokio::time::sleep(interval).await;
        elapsed += 1;
    }

    Ok(PollReport {
        passed: elapsed,
        probe_failed: false,
    })
}

/// Runs the `test` and `timeout` flows against one provider.
#[derive(Debug)]
pub struct FlowRunner {
    client: AuthCodeClient,
    launcher: Box<dyn Launcher>,
    login_timeout: Duration,
}

impl FlowRunner {
    /// Create a runner that sends the operator to the login page with
    /// `launcher`.
    pub fn new(client: AuthCodeClient, launcher: impl Launcher + 'static) -> Self {
        Self {
            client,
            launcher: Box::new(launcher),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }

    /// Set how long to wait for the operator to log in.
    pub fn with_login_timeout(mut self, login_timeout: Duration) -> Self {
        self.login_timeout = login_timeout;
        self
    }

    /// Get a reference to the token client.
    pub const fn client(&self) -> &AuthCodeClient {
        &self.client
    }

    /// Send the operator to the login page and wait for the redirect.
    #[instrument(skip_all)]
    pub async fn obtain_auth_code(&self) -> Result<AuthorizationCode, FlowError> {
        let config = self.client.config();
        let listener = RedirectListener::bind(config.listen_port()?).await?;
        let pending = listener.spawn();

        let url = authorize_url(config, self.client.scope())?;
        self.launcher.launch(&url);

        let code = pending.wait(self.login_timeout).await?;
        debug!(code = code.secret().as_str(), "auth code");
        Ok(code)
    }

    async fn refresh(&self, session: &mut Session) -> Result<(), ExchangeError> {
        info!("refreshing token");
        self.client.exchange(session, Grant::RefreshToken).await?;
        debug!(
            refresh_token = session.refresh_token().map(|t| t.secret().as_str()),
            "returned refresh"
        );
        Ok(())
    }

    /// Refresh, logging a rejected grant and carrying on with the current
    /// tokens. An unreachable token endpoint still ends the flow.
    async fn refresh_or_warn(
        &self,
        session: &mut Session,
        context: &str,
    ) -> Result<(), FlowError> {
        match self.refresh(session).await {
            Ok(()) => Ok(()),
            Err(error @ ExchangeError::Transport(_)) => Err(FlowError::Refresh(error)),
            Err(error) => {
                warn!(%error, "{context}");
                Ok(())
            }
        }
    }

    /// Log in, exchange the code, probe the echo endpoint, and refresh twice.
    ///
    /// Any failed exchange aborts the flow. A rejected probe does not.
    #[instrument(skip_all)]
    pub async fn run_test(&self) -> Result<TestReport, FlowError> {
        let mut session = Session::new(self.obtain_auth_code().await?);

        self.client
            .exchange(&mut session, Grant::AuthorizationCode)
            .await
            .map_err(FlowError::CodeExchange)?;
        info!(expires_in = ?session.expires_in(), "received tokens for auth code");
        debug!(
            access_token = session.access_token().map(|t| t.secret().as_str()),
            refresh_token = session.refresh_token().map(|t| t.secret().as_str()),
            "returned auth"
        );

        info!("calling echo");
        let echo = self.client.probe(&session).await?;
        info!(echo, "echo status");

        let mut refreshes = 0;
        for _ in 0..2 {
            self.refresh(&mut session).await.map_err(FlowError::Refresh)?;
            refreshes += 1;
        }

        Ok(TestReport { echo, refreshes })
    }

    /// Log in, exchange the code, refresh to restart the expiry clock, then
    /// probe the echo endpoint every second until it rejects the token or
    /// the reported lifetime plus [`EXPIRY_TOLERANCE`] has passed. Finishes
    /// with one more refresh and probe.
    ///
    /// The code exchange is fatal. A refresh the provider rejects is logged
    /// and the flow carries on with the tokens it has, but a refresh that
    /// cannot reach the token endpoint ends the flow.
    #[instrument(skip_all)]
    pub async fn run_timeout(&self) -> Result<TimeoutReport, FlowError> {
        let mut session = Session::new(self.obtain_auth_code().await?);

        self.client
            .exchange(&mut session, Grant::AuthorizationCode)
            .await
            .map_err(FlowError::CodeExchange)?;

        info!("refreshing token for fresh expiration");
        self.refresh_or_warn(&mut session, "refresh failed, polling with the previous token")
            .await?;

        let expires_in = session.expires_in().unwrap_or_default();
        let started = Instant::now();
        let created_at = Local::now();
        let expires_at = TimeDelta::from_std(expires_in)
            .ok()
            .and_then(|lifetime| created_at.checked_add_signed(lifetime))
            .map(|at| at.format(TIME_FORMAT).to_string())
            .unwrap_or_default();
        info!(
            created_at = %created_at.format(TIME_FORMAT),
            expires_at = %expires_at,
            expires_in = expires_in.as_secs(),
            "token issued"
        );
        debug!(
            access_token = session.access_token().map(|t| t.secret().as_str()),
            "polling with token"
        );

        let bound = poll_bound(expires_in);
        let client = &self.client;
        let polled = &session;
        let poll = poll_until_expiry(bound, POLL_INTERVAL, move || client.probe(polled)).await?;

        let elapsed = started.elapsed();
        info!(
            elapsed_secs = elapsed.as_secs_f64(),
            passed = poll.passed,
            probe_failed = poll.probe_failed,
            "total elapsed time"
        );

        self.refresh_or_warn(&mut session, "final refresh failed").await?;
        let final_echo = self.client.probe(&session).await?;
        info!(echo = final_echo, "echo response");

        Ok(TimeoutReport {
            expires_in,
            poll,
            elapsed,
            final_echo,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        convert::Infallible,
        sync::atomic::{AtomicU64, Ordering},
    };

    #[tokio::test(start_paused = true)]
    async fn runs_to_bound_while_probe_passes() {
        let calls = &AtomicU64::new(0);
        let start = Instant::now();

        let report = poll_until_expiry(5, POLL_INTERVAL, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(true)
        })
        .await
        .unwrap();

        assert_eq!(
            report,
            PollReport {
                passed: 5,
                probe_failed: false
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_failed_probe() {
        let calls = &AtomicU64::new(0);
        let start = Instant::now();

        let report = poll_until_expiry(300 + 10, POLL_INTERVAL, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(n < 3)
        })
        .await
        .unwrap();

        assert_eq!(
            report,
            PollReport {
                passed: 3,
                probe_failed: true
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn bound_adds_tolerance_to_lifetime() {
        assert_eq!(poll_bound(Duration::ZERO), 300);
        assert_eq!(poll_bound(Duration::from_secs(3600)), 3900);
        assert_eq!(poll_bound(Duration::from_millis(1500)), 301);
        assert_eq!(poll_bound(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_token_is_polled_through_tolerance() {
        let calls = &AtomicU64::new(0);
        let start = Instant::now();

        let report = poll_until_expiry(
            poll_bound(Duration::from_secs(2)),
            POLL_INTERVAL,
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(true)
            },
        )
        .await
        .unwrap();

        assert_eq!(report.passed, 302);
        assert!(!report.probe_failed);
        assert_eq!(calls.load(Ordering::SeqCst), 302);
        assert_eq!(start.elapsed(), Duration::from_secs(302));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_bound_never_probes() {
        let calls = &AtomicU64::new(0);

        let report = poll_until_expiry(0, POLL_INTERVAL, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(true)
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.passed, 0);
        assert!(!report.probe_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_end_polling() {
        let calls = &AtomicU64::new(0);

        let err = poll_until_expiry(10, POLL_INTERVAL, move || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(true),
                _ => Err("unreachable endpoint"),
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err, "unreachable endpoint");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
