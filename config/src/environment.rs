use std::fmt;
use std::io::Error;

/// Name of the environment variable selecting the runtime environment.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Local runs: human readable logs on stdout.
const DEV_ENV_NAME: &str = "dev";

/// Scheduled runs: JSON logs written to rolling files.
const PROD_ENV_NAME: &str = "prod";

/// Runtime environment of the extract-load process.
///
/// The environment only influences ambient behavior such as the log format, never the
/// semantics of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Development environment.
    Dev,
    /// Production environment.
    Prod,
}

impl Environment {
    /// Loads the environment from `APP_ENVIRONMENT`, defaulting to [`Environment::Dev`].
    pub fn load() -> Result<Environment, Error> {
        Self::from_value(std::env::var(APP_ENVIRONMENT_ENV_NAME).ok())
    }

    /// Resolves the environment from an optional raw value.
    pub fn from_value(value: Option<String>) -> Result<Environment, Error> {
        value.unwrap_or_else(|| DEV_ENV_NAME.into()).try_into()
    }

    /// Exports this environment into `APP_ENVIRONMENT` so later [`Environment::load`] calls see it.
    ///
    /// Only meant for process setup (and tests) before any other thread is spawned.
    pub fn set(&self) {
        // SAFETY: called during single threaded initialization.
        unsafe {
            std::env::set_var(APP_ENVIRONMENT_ENV_NAME, self.as_str());
        }
    }

    /// Returns the string name of the environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => DEV_ENV_NAME,
            Environment::Prod => PROD_ENV_NAME,
        }
    }

    /// Returns `true` for [`Environment::Prod`].
    pub fn is_prod(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    /// Parses `dev` or `prod`, case-insensitively.
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            DEV_ENV_NAME => Ok(Self::Dev),
            PROD_ENV_NAME => Ok(Self::Prod),
            other => Err(Error::other(format!(
                "{other} is not a supported environment. Use either `{DEV_ENV_NAME}` or `{PROD_ENV_NAME}`.",
            ))),
        }
    }
}
