pub(crate) mod browser;
pub use browser::{authorize_url, host_launcher, Launcher, PrintUrl, SystemBrowser, AUTHORIZE_PATH};

pub(crate) mod client;
pub use client::{AuthCodeClient, ExchangeError, ProbeError, ECHO_PATH, TOKEN_PATH};

pub(crate) mod config;
pub use config::{
    default_config_path, port_from_redirect, AuthCodeConfig, ConfigError, DEFAULT_CONFIG_FILE,
};

pub mod listener;
pub use listener::{CallbackError, CaptureError, PendingCode, RedirectListener};

pub(crate) mod session;
pub use session::{Grant, InvalidGrantMethod, Session, TokenResponse};
