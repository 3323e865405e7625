use std::{convert::Infallible, env::VarError, str::FromStr};

/// Details about an environment variable. Used to report which variables a
/// [`FromEnv`] type reads, and by [`FromEnv::check_inventory`] to find the
/// ones that are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvItemInfo {
    /// The environment variable name.
    pub var: &'static str,
    /// A description of what the variable configures.
    pub description: &'static str,
    /// Whether the environment variable is optional or not.
    pub optional: bool,
}

/// Error type for loading from the environment. See the [`FromEnv`] trait for
/// more information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FromEnvErr<Inner = Infallible> {
    /// The environment variable is missing.
    #[error("Error reading variable {0}: {1}")]
    EnvError(String, VarError),
    /// The environment variable is empty.
    #[error("Environment variable {0} is empty")]
    Empty(String),
    /// The environment variable is present, but the value could not be parsed.
    #[error("Failed to parse environment variable: {0}")]
    ParseError(#[source] Inner),
}

impl FromEnvErr<Infallible> {
    /// Convert the error into another error type.
    pub fn infallible_into<T>(self) -> FromEnvErr<T> {
        match self {
            Self::EnvError(s, e) => FromEnvErr::EnvError(s, e),
            Self::Empty(s) => FromEnvErr::Empty(s),
            Self::ParseError(e) => match e {},
        }
    }
}

impl<Inner> FromEnvErr<Inner> {
    /// Map the error to another type, keeping the variable information intact.
    pub fn map<New>(self, f: impl FnOnce(Inner) -> New) -> FromEnvErr<New> {
        match self {
            Self::EnvError(s, e) => FromEnvErr::EnvError(s, e),
            Self::Empty(s) => FromEnvErr::Empty(s),
            Self::ParseError(e) => FromEnvErr::ParseError(f(e)),
        }
    }

    /// Missing env var.
    pub fn env_err(var: &str, e: VarError) -> Self {
        Self::EnvError(var.to_string(), e)
    }

    /// Empty env var.
    pub fn empty(var: &str) -> Self {
        Self::Empty(var.to_string())
    }

    /// Error while parsing.
    pub const fn parse_error(err: Inner) -> Self {
        Self::ParseError(err)
    }
}

/// Convenience function for parsing a value from the environment, if present
/// and non-empty.
pub fn parse_env_if_present<T: FromStr>(env_var: &str) -> Result<T, FromEnvErr<T::Err>> {
    let s = std::env::var(env_var).map_err(|e| FromEnvErr::env_err(env_var, e))?;

    if s.is_empty() {
        Err(FromEnvErr::empty(env_var))
    } else {
        s.parse().map_err(FromEnvErr::parse_error)
    }
}

/// Trait for loading structured values from the environment.
///
/// Implementors read a fixed set of variables, known at compile time and
/// listed by [`FromEnv::inventory`].
pub trait FromEnv: core::fmt::Debug + Sized + 'static {
    /// Error type produced when loading from the environment.
    type Error: core::error::Error;

    /// Get the environment variables this type reads, including optional
    /// ones.
    fn inventory() -> Vec<&'static EnvItemInfo>;

    /// Get a list of missing, non-optional environment variables. Variables
    /// that are set but empty count as missing.
    fn check_inventory() -> Result<(), Vec<&'static EnvItemInfo>> {
        let missing: Vec<_> = Self::inventory()
            .into_iter()
            .filter(|item| {
                !item.optional && std::env::var(item.var).map_or(true, |v| v.is_empty())
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    /// Load from the environment.
    fn from_env() -> Result<Self, FromEnvErr<Self::Error>>;
}

/// Trait for loading primitives that correspond to a single environment
/// variable. Implemented for [`String`], [`bool`] and [`url::Url`].
pub trait FromEnvVar: core::fmt::Debug + Sized + 'static {
    /// Error type produced when parsing the primitive.
    type Error: core::error::Error;

    /// Load the primitive from the environment at the given variable.
    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>>;
}

impl FromEnvVar for String {
    type Error = Infallible;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        let s = std::env::var(env_var).map_err(|e| FromEnvErr::env_err(env_var, e))?;
        if s.is_empty() {
            return Err(FromEnvErr::empty(env_var));
        }
        Ok(s)
    }
}

/// Accepts `true`/`false`, `1`/`0`, and `yes`/`no`, ignoring case.
impl FromEnvVar for bool {
    type Error = std::str::ParseBoolError;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        let s = std::env::var(env_var).map_err(|e| FromEnvErr::env_err(env_var, e))?;
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "yes" => Ok(true),
            "0" | "no" => Ok(false),
            other => other.parse().map_err(FromEnvErr::parse_error),
        }
    }
}

impl FromEnvVar for url::Url {
    type Error = url::ParseError;

    fn from_env_var(env_var: &str) -> Result<Self, FromEnvErr<Self::Error>> {
        parse_env_if_present(env_var)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(env: &str, val: &str) {
        std::env::set_var(env, val);
    }

    #[derive(Debug)]
    struct Endpoints;

    impl FromEnv for Endpoints {
        type Error = Infallible;

        fn inventory() -> Vec<&'static EnvItemInfo> {
            vec![
                &EnvItemInfo {
                    var: "AUTHCODE_TEST_REQUIRED",
                    description: "required",
                    optional: false,
                },
                &EnvItemInfo {
                    var: "AUTHCODE_TEST_OPTIONAL",
                    description: "optional",
                    optional: true,
                },
            ]
        }

        fn from_env() -> Result<Self, FromEnvErr<Self::Error>> {
            Ok(Self)
        }
    }

    #[test]
    fn test_primitives() {
        set("AUTHCODE_TEST_STRING", "hello");
        assert_eq!(String::from_env_var("AUTHCODE_TEST_STRING").unwrap(), "hello");

        set("AUTHCODE_TEST_URL", "https://idp.example.com/oauth2");
        assert_eq!(
            url::Url::from_env_var("AUTHCODE_TEST_URL").unwrap(),
            url::Url::parse("https://idp.example.com/oauth2").unwrap()
        );
    }

    #[test]
    fn test_bools() {
        for (raw, expected) in [("true", true), ("1", true), ("YES", true), ("false", false), ("0", false)] {
            set("AUTHCODE_TEST_BOOL", raw);
            assert_eq!(bool::from_env_var("AUTHCODE_TEST_BOOL").unwrap(), expected);
        }

        set("AUTHCODE_TEST_BOOL", "maybe");
        assert!(matches!(
            bool::from_env_var("AUTHCODE_TEST_BOOL"),
            Err(FromEnvErr::ParseError(_))
        ));
    }

    #[test]
    fn test_a_few_errors() {
        set("AUTHCODE_TEST_BAD_URL", "idp.example.com");
        assert_eq!(
            url::Url::from_env_var("AUTHCODE_TEST_BAD_URL").unwrap_err(),
            FromEnvErr::parse_error(url::ParseError::RelativeUrlWithoutBase),
        );
        assert_eq!(
            url::Url::from_env_var("AUTHCODE_TEST_BAD_URL")
                .map_err(|e| e.map(|inner| inner.to_string()))
                .unwrap_err(),
            FromEnvErr::parse_error("relative URL without a base".to_string()),
        );

        set("AUTHCODE_TEST_EMPTY", "");
        assert_eq!(
            String::from_env_var("AUTHCODE_TEST_EMPTY").unwrap_err(),
            FromEnvErr::empty("AUTHCODE_TEST_EMPTY"),
        );
        assert_eq!(
            url::Url::from_env_var("AUTHCODE_TEST_EMPTY").unwrap_err(),
            FromEnvErr::empty("AUTHCODE_TEST_EMPTY"),
        );
    }

    #[test]
    fn empty_required_var_is_missing() {
        std::env::remove_var("AUTHCODE_TEST_OPTIONAL");

        set("AUTHCODE_TEST_REQUIRED", "");
        let missing = Endpoints::check_inventory().unwrap_err();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].var, "AUTHCODE_TEST_REQUIRED");

        set("AUTHCODE_TEST_REQUIRED", "set");
        assert!(Endpoints::check_inventory().is_ok());

        std::env::remove_var("AUTHCODE_TEST_REQUIRED");
        assert!(Endpoints::check_inventory().is_err());
    }
}
