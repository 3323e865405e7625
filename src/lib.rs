//! Diagnostic tooling for OAuth2 authorization code flows.
//!
//! The crate drives a fixed sequence against an identity provider: open the
//! provider's login page, capture the redirect on a local listener, exchange
//! the code for tokens, probe a protected echo endpoint with the access token,
//! and refresh. The [`flow`] module strings these steps together for the
//! `test` and `timeout` commands of the `authcode-test` binary.
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

/// OAuth2 building blocks: configuration, session state, the token and echo
/// client, the redirect listener and browser launching.
pub mod auth;

pub mod flow;

/// Utilities for logging and environment parsing.
pub mod utils {
    /// Parsing configuration from the environment.
    pub mod from_env;

    /// Tracing setup for the binary.
    pub mod tracing;
}

/// Re-exports of common dependencies.
pub mod deps {
    pub use oauth2;
    pub use tracing;
    pub use tracing_subscriber;
}

// Used only by the binary target.
use clap as _;
use eyre as _;
