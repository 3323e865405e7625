//! Client for the provider's token endpoint and the protected echo endpoint.
use crate::auth::{
    session::{Grant, InvalidGrantMethod, Session, TokenResponse},
    AuthCodeConfig,
};
use oauth2::Scope;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

/// Path of the token endpoint under the root URL.
pub const TOKEN_PATH: &str = "token";

/// Path of the protected echo endpoint under the root URL.
pub const ECHO_PATH: &str = "echo/v2/ping";

/// Errors from a token endpoint exchange. Whenever one of these is returned,
/// the session is left as it was.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The grant name is not one the flows support. No request was made.
    #[error(transparent)]
    InvalidGrantMethod(#[from] InvalidGrantMethod),

    /// An authorization code grant was requested before a code was captured,
    /// or after it was consumed. No request was made.
    #[error("no authorization code to exchange")]
    MissingAuthCode,

    /// A refresh grant was requested without a refresh token. No request was
    /// made.
    #[error("no refresh token to exchange")]
    MissingRefreshToken,

    /// The token endpoint answered with something other than 200.
    #[error("token endpoint returned {status}: {body}")]
    TokenExchangeFailed {
        /// The response status.
        status: StatusCode,
        /// The response body, verbatim.
        body: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("error calling token endpoint: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token endpoint answered 200 with a body that is not a token
    /// response.
    #[error("error parsing token response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from the echo probe. A rejected token is not an error, see
/// [`AuthCodeClient::probe`].
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The session holds no access token yet.
    #[error("no access token to probe with")]
    NoAccessToken,

    /// The request could not be sent.
    #[error("error calling echo endpoint: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Talks to the token and echo endpoints of one provider.
#[derive(Debug, Clone)]
pub struct AuthCodeClient {
    config: AuthCodeConfig,
    scope: Scope,
    reqwest: reqwest::Client,
}

impl AuthCodeClient {
    /// Create a client for the provider described by `config`, requesting
    /// `scope` on every grant.
    pub fn new(config: AuthCodeConfig, scope: impl Into<String>) -> Result<Self, reqwest::Error> {
        // Token responses must never be followed through a redirect.
        let reqwest = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config,
            scope: Scope::new(scope.into()),
            reqwest,
        })
    }

    /// Get a reference to the provider configuration.
    pub const fn config(&self) -> &AuthCodeConfig {
        &self.config
    }

    /// The scope requested on every grant.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The form parameters sent to the token endpoint for `grant`.
    pub fn token_form(
        &self,
        session: &Session,
        grant: Grant,
    ) -> Result<Vec<(&'static str, String)>, ExchangeError> {
        let form = match grant {
            Grant::AuthorizationCode => {
                let code = session.auth_code().ok_or(ExchangeError::MissingAuthCode)?;
                vec![
                    ("grant_type", grant.as_str().to_owned()),
                    ("code", code.secret().to_owned()),
                    ("redirect_uri", self.config.redirect.clone()),
                    ("scope", self.scope().to_owned()),
                ]
            }
            Grant::RefreshToken => {
                let refresh_token = session
                    .refresh_token()
                    .ok_or(ExchangeError::MissingRefreshToken)?;
                vec![
                    ("grant_type", grant.as_str().to_owned()),
                    ("refresh_token", refresh_token.secret().to_owned()),
                    ("scope", self.scope().to_owned()),
                ]
            }
        };
        Ok(form)
    }

    /// Parse `grant` and run [`Self::exchange`] with it. Unknown grant names
    /// fail without contacting the provider.
    pub async fn exchange_named(
        &self,
        session: &mut Session,
        grant: &str,
    ) -> Result<(), ExchangeError> {
        let grant: Grant = grant.parse()?;
        self.exchange(session, grant).await
    }

    /// Run one grant against the token endpoint, overwriting the session's
    /// tokens on success.
    ///
    /// The request is a form-encoded POST to `{root}/token`, authenticated
    /// with HTTP Basic auth using the client id and secret.
    #[instrument(skip_all, fields(grant = %grant))]
    pub async fn exchange(&self, session: &mut Session, grant: Grant) -> Result<(), ExchangeError> {
        let form = self.token_form(session, grant)?;
        let url = self.config.endpoint(TOKEN_PATH);
        debug!(%url, "requesting token");

        let response = self
            .reqwest
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&form)
            .send()
            .await
            .inspect_err(|e| warn!(%e, "failed to reach token endpoint"))?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            warn!(%status, %body, "token endpoint rejected the request");
            return Err(ExchangeError::TokenExchangeFailed { status, body });
        }

        let tokens: TokenResponse = serde_json::from_str(&body)?;
        debug!(?tokens, "received tokens");
        session.apply(grant, tokens);
        Ok(())
    }

    /// Call `{root}/echo/v2/ping` with the session's access token.
    ///
    /// Returns `true` only when the endpoint answers 200. Any other status is
    /// logged with its body and reported as `false`.
    #[instrument(skip_all)]
    pub async fn probe(&self, session: &Session) -> Result<bool, ProbeError> {
        let token = session.access_token().ok_or(ProbeError::NoAccessToken)?;
        let url = self.config.endpoint(ECHO_PATH);

        let response = self
            .reqwest
            .get(&url)
            .bearer_auth(token.secret())
            .send()
            .await
            .inspect_err(|e| warn!(%e, "failed to reach echo endpoint"))?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%status, %body, "echo rejected the access token");
        Ok(false)
    }
}
