//! The configuration file shared by the `test`, `timeout` and `generate`
//! commands.
use crate::utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr, FromEnvVar};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};
use tracing::debug;
use url::Url;

const CLIENT_ID: &str = "AUTHCODE_CLIENT_ID";
const CLIENT_SECRET: &str = "AUTHCODE_CLIENT_SECRET";
const REDIRECT: &str = "AUTHCODE_REDIRECT";
const ROOT_URL: &str = "AUTHCODE_ROOT_URL";

/// File name of the default configuration, placed in the home directory.
pub const DEFAULT_CONFIG_FILE: &str = ".authcodetest";

/// Errors raised while reading, generating or writing the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("error reading config file {path}: {source}")]
    Read {
        /// The file that was read.
        path: PathBuf,
        /// The underlying io error.
        source: io::Error,
    },

    /// The configuration file is not a valid configuration record.
    #[error("error parsing config file {path}: {source}")]
    Parse {
        /// The file that was parsed.
        path: PathBuf,
        /// The underlying json error.
        source: serde_json::Error,
    },

    /// The configuration file could not be written.
    #[error("couldn't write config file {path}: {source}")]
    Write {
        /// The file that was written.
        path: PathBuf,
        /// The underlying io error.
        source: io::Error,
    },

    /// The configuration could not be serialized.
    #[error("couldn't serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Prompting the operator failed.
    #[error("error prompting for {field}: {source}")]
    Prompt {
        /// The field being prompted for.
        field: &'static str,
        /// The underlying io error.
        source: io::Error,
    },

    /// The redirect URL does not parse.
    #[error("invalid redirect url {url:?}: {source}")]
    InvalidRedirect {
        /// The offending url.
        url: String,
        /// The parser error.
        source: url::ParseError,
    },

    /// The root URL does not parse.
    #[error("invalid root url: {0}")]
    InvalidRootUrl(#[source] url::ParseError),

    /// No port could be derived from the redirect URL.
    #[error("redirect url {0:?} has no port and no known default port")]
    MissingPort(String),

    /// The stored port is not a valid TCP port.
    #[error("invalid listener port {0:?}")]
    InvalidPort(String),
}

/// Client credentials and endpoints for one identity provider.
///
/// Stored as a flat JSON record. The field names match the files written by
/// earlier versions of this tool, so existing `~/.authcodetest` files keep
/// loading.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCodeConfig {
    /// OAuth client identifier.
    #[serde(rename = "ClientID")]
    pub client_id: String,
    /// OAuth client secret.
    #[serde(rename = "ClientSecret")]
    pub client_secret: String,
    /// The redirect URL registered with the provider.
    #[serde(rename = "Redirect")]
    pub redirect: String,
    /// Port the redirect listener binds, derived from [`Self::redirect`].
    #[serde(rename = "Port")]
    pub port: String,
    /// Root URL of the provider's API. `/authorize`, `/token` and
    /// `/echo/v2/ping` hang off this.
    #[serde(rename = "RootURL")]
    pub root_url: String,
}

impl fmt::Debug for AuthCodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCodeConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect", &self.redirect)
            .field("port", &self.port)
            .field("root_url", &self.root_url)
            .finish()
    }
}

/// Derive the listener port from a redirect URL. An explicit port wins,
/// otherwise the scheme's well-known port is used.
pub fn port_from_redirect(redirect: &str) -> Result<u16, ConfigError> {
    let url = Url::parse(redirect).map_err(|source| ConfigError::InvalidRedirect {
        url: redirect.to_owned(),
        source,
    })?;

    url.port_or_known_default()
        .ok_or_else(|| ConfigError::MissingPort(redirect.to_owned()))
}

/// The default configuration path, `$HOME/.authcodetest`. Falls back to the
/// working directory if no home directory can be determined.
pub fn default_config_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(DEFAULT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

impl AuthCodeConfig {
    /// Build a configuration, deriving the port from the redirect URL.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect: impl Into<String>,
        root_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let redirect = redirect.into();
        let port = port_from_redirect(&redirect)?;

        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect,
            port: port.to_string(),
            root_url: root_url.into(),
        })
    }

    /// Load the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Interactively prompt for the configuration. Each prompt is written to
    /// `output` and answered by one line of `input`.
    pub fn generate<R, W>(mut input: R, mut output: W) -> Result<Self, ConfigError>
    where
        R: BufRead,
        W: Write,
    {
        let client_id = prompt(&mut input, &mut output, "Client ID")?;
        let client_secret = prompt(&mut input, &mut output, "Client Secret")?;
        let redirect = prompt(&mut input, &mut output, "Redirect URL")?;
        let root_url = prompt(&mut input, &mut output, "Root API URL")?;

        Self::new(client_id, client_secret, redirect, root_url)
    }

    /// Serialize as indented JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let mut json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the configuration to a file, replacing any existing one.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|source| ConfigError::Write {
            path: path.to_owned(),
            source,
        })
    }

    /// The port the redirect listener should bind.
    pub fn listen_port(&self) -> Result<u16, ConfigError> {
        self.port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort(self.port.clone()))
    }

    /// The root URL without a trailing slash.
    pub fn root(&self) -> &str {
        self.root_url.trim_end_matches('/')
    }

    /// The URL of an endpoint under the root URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.root(), path.trim_start_matches('/'))
    }
}

fn prompt<R, W>(input: &mut R, output: &mut W, field: &'static str) -> Result<String, ConfigError>
where
    R: BufRead,
    W: Write,
{
    let err = |source| ConfigError::Prompt { field, source };

    write!(output, "{field}: ").map_err(err)?;
    output.flush().map_err(err)?;

    let mut line = String::new();
    input.read_line(&mut line).map_err(err)?;
    Ok(line.trim().to_owned())
}

impl FromEnv for AuthCodeConfig {
    type Error = ConfigError;

    fn inventory() -> Vec<&'static EnvItemInfo> {
        vec![
            &EnvItemInfo {
                var: CLIENT_ID,
                description: "OAuth client ID",
                optional: false,
            },
            &EnvItemInfo {
                var: CLIENT_SECRET,
                description: "OAuth client secret",
                optional: false,
            },
            &EnvItemInfo {
                var: REDIRECT,
                description: "Redirect URL registered with the provider. The listener port is taken from it",
                optional: false,
            },
            &EnvItemInfo {
                var: ROOT_URL,
                description: "Root URL of the provider API",
                optional: false,
            },
        ]
    }

    fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
        let client_id = String::from_env_var(CLIENT_ID)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let client_secret = String::from_env_var(CLIENT_SECRET)
            .map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let redirect =
            String::from_env_var(REDIRECT).map_err(FromEnvErr::infallible_into::<ConfigError>)?;
        let root_url =
            Url::from_env_var(ROOT_URL).map_err(|e| e.map(ConfigError::InvalidRootUrl))?;

        Self::new(client_id, client_secret, redirect, root_url.as_str())
            .map_err(FromEnvErr::parse_error)
    }
}
