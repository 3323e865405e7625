//! Token state carried through a flow. `Session::apply` is the only writer,
//! and only a successful exchange calls it.
use core::{fmt, str::FromStr, time::Duration};
use oauth2::{AccessToken, AuthorizationCode, RefreshToken};
use serde::Deserialize;

/// The grant types the token endpoint is exercised with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grant {
    /// Exchange the captured authorization code for tokens.
    AuthorizationCode,
    /// Exchange the current refresh token for fresh tokens.
    RefreshToken,
}

impl Grant {
    /// The `grant_type` value sent to the token endpoint.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grant name that is neither an authorization code nor a refresh grant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid grant method {0:?}")]
pub struct InvalidGrantMethod(pub String);

impl FromStr for Grant {
    type Err = InvalidGrantMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" | "authcode" => Ok(Self::AuthorizationCode),
            "refresh_token" | "refresh" => Ok(Self::RefreshToken),
            other => Err(InvalidGrantMethod(other.to_owned())),
        }
    }
}

/// The fields of a token endpoint response the flows care about. Anything
/// else in the body is ignored.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// The bearer token for the echo endpoint.
    pub access_token: AccessToken,
    /// The token to use for the next refresh grant.
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// OpenID Connect identity token, when the `openid` scope was granted.
    #[serde(default)]
    pub id_token: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Credentials held over the course of one flow.
///
/// A session starts from the captured authorization code. After that, only
/// [`AuthCodeClient::exchange`] writes to it, and only when the token
/// endpoint answers with 200.
///
/// [`AuthCodeClient::exchange`]: crate::auth::AuthCodeClient::exchange
#[derive(Clone, Default)]
pub struct Session {
    auth_code: Option<AuthorizationCode>,
    access_token: Option<AccessToken>,
    refresh_token: Option<RefreshToken>,
    expires_in: Option<Duration>,
    id_token: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("has_auth_code", &self.auth_code.is_some())
            .field("access_token", &self.access_token)
            .field("refresh_token", &self.refresh_token)
            .field("expires_in", &self.expires_in)
            .field("has_id_token", &self.id_token.is_some())
            .finish()
    }
}

impl Session {
    /// Start a session from a freshly captured authorization code.
    pub fn new(auth_code: AuthorizationCode) -> Self {
        Self {
            auth_code: Some(auth_code),
            ..Default::default()
        }
    }

    /// Start a session from tokens issued elsewhere.
    pub fn from_tokens(access_token: AccessToken, refresh_token: Option<RefreshToken>) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
            ..Default::default()
        }
    }

    /// The authorization code, until it has been exchanged.
    pub const fn auth_code(&self) -> Option<&AuthorizationCode> {
        self.auth_code.as_ref()
    }

    /// The current access token.
    pub const fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    /// The current refresh token.
    pub const fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    /// The lifetime the provider reported for the current access token.
    pub const fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }

    /// The last identity token issued.
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Overwrite the session with a successful token response.
    ///
    /// The access token is always replaced. Fields the provider leaves out
    /// (commonly the refresh token on a refresh grant) keep their previous
    /// value. An authorization code grant consumes the code.
    pub(crate) fn apply(&mut self, grant: Grant, response: TokenResponse) {
        if grant == Grant::AuthorizationCode {
            self.auth_code = None;
        }

        self.access_token = Some(response.access_token);
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(expires_in) = response.expires_in {
            self.expires_in = Some(Duration::from_secs(expires_in));
        }
        if let Some(id_token) = response.id_token {
            self.id_token = Some(id_token);
        }
    }
}
