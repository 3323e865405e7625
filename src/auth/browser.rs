//! Sending the operator to the provider's login page.
use crate::auth::AuthCodeConfig;
use core::fmt;
use tracing::{info, warn};
use url::Url;

/// Path of the authorization endpoint under the root URL.
pub const AUTHORIZE_PATH: &str = "authorize";

/// Build the authorization URL the operator logs in through.
///
/// Query values are percent-encoded, so redirect URLs and multi-word scopes
/// arrive at the provider intact.
pub fn authorize_url(config: &AuthCodeConfig, scope: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&config.endpoint(AUTHORIZE_PATH))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect)
        .append_pair("scope", scope);
    Ok(url)
}

/// A way of getting the authorization URL in front of the operator.
///
/// Launching is best effort and never fails the flow. Implementations that
/// cannot open a browser must at least print the URL.
pub trait Launcher: fmt::Debug + Send + Sync {
    /// Present `url` to the operator.
    fn launch(&self, url: &Url);
}

impl<T: Launcher + ?Sized> Launcher for Box<T> {
    fn launch(&self, url: &Url) {
        (**self).launch(url)
    }
}

/// Prints the URL for the operator to open by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintUrl;

impl Launcher for PrintUrl {
    fn launch(&self, url: &Url) {
        println!("Login URL: {url}");
    }
}

/// Opens the URL in the desktop's default browser without waiting for it.
/// Falls back to [`PrintUrl`] if no browser can be started.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl Launcher for SystemBrowser {
    fn launch(&self, url: &Url) {
        info!(%url, "launching login url in background");
        if let Err(error) = open::that_detached(url.as_str()) {
            warn!(%error, "could not launch a browser");
            PrintUrl.launch(url);
        }
    }
}

/// Pick the launcher for the host platform: the system browser on desktop
/// platforms (macOS and Windows), printing everywhere else.
pub fn host_launcher() -> Box<dyn Launcher> {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        Box::new(SystemBrowser)
    } else {
        Box::new(PrintUrl)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn authorize_url_carries_flow_parameters() {
        let config = AuthCodeConfig::new(
            "client id",
            "secret",
            "http://localhost:8765/callback?x=1",
            "https://idp.example.com/oauth2/",
        )
        .unwrap();

        let url = authorize_url(&config, "openid profile").unwrap();
        assert_eq!(url.path(), "/oauth2/authorize");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("response_type".into(), "code".into()),
                ("client_id".into(), "client id".into()),
                ("redirect_uri".into(), "http://localhost:8765/callback?x=1".into()),
                ("scope".into(), "openid profile".into()),
            ]
        );
        assert!(!url.as_str().contains(' '));
    }

    #[test]
    fn bad_root_url_is_reported() {
        let config = AuthCodeConfig::new("id", "secret", "http://localhost:1", "idp").unwrap();
        assert!(authorize_url(&config, "openid").is_err());
    }
}
