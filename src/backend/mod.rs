//! Script execution backends.
//!
//! A backend runs one script in one language and reports its exit code and
//! captured output. The pipeline runner only sees the [`ScriptBackend`] trait,
//! so the production [`SubprocessBackend`] and the deterministic
//! [`FakeBackend`] are interchangeable.
//!
//! A nonzero exit code is returned as data in [`ScriptOutput`], never as an
//! error. Errors are reserved for failures to run the script at all.

mod fake;
mod subprocess;

pub use fake::{FakeBackend, STDERR_MARKER, STDOUT_MARKER};
pub use subprocess::{OsFamily, SubprocessBackend};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{BackendConfig, ConfigError};

/// Errors that prevent a script from being executed.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No interpreter mapping for this language on this OS.
    #[error("language {language} on {os} OS is not supported")]
    UnsupportedLanguage { language: String, os: OsFamily },

    /// Writing the script or spawning the interpreter failed.
    #[error("script execution failed: {0}")]
    Io(#[from] std::io::Error),

    /// The script exceeded the configured timeout and was killed.
    #[error("script timed out after {0:?}")]
    Timeout(Duration),
}

/// Exit code and captured streams of one script execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    /// Process exit code (`-1` if killed by a signal).
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executes a single script.
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run `script` with the interpreter for `language`.
    async fn execute(&self, language: &str, script: &str) -> Result<ScriptOutput, BackendError>;
}

/// Which backend implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Run scripts as child processes.
    #[default]
    Subprocess,
    /// Return seeded synthetic output without spawning anything.
    Fake,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Subprocess => f.write_str("subprocess"),
            BackendKind::Fake => f.write_str("fake"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "subprocess" => Ok(BackendKind::Subprocess),
            "fake" => Ok(BackendKind::Fake),
            other => Err(ConfigError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Build the backend selected by the configuration.
///
/// Fails fast on an unrecognized selector.
pub fn get_backend(config: &BackendConfig) -> Result<Arc<dyn ScriptBackend>, ConfigError> {
    let kind: BackendKind = config.kind.parse()?;
    let backend: Arc<dyn ScriptBackend> = match kind {
        BackendKind::Subprocess => {
            let mut backend = SubprocessBackend::new();
            if let Some(secs) = config.script_timeout_secs {
                backend = backend.with_timeout(Duration::from_secs(secs));
            }
            for (language, argv) in &config.interpreters {
                let language = language
                    .parse()
                    .map_err(|e| ConfigError::InvalidConfig(format!("interpreters: {}", e)))?;
                if argv.is_empty() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "interpreters: empty command for {}",
                        language
                    )));
                }
                backend = backend.with_interpreter(language, argv.clone());
            }
            Arc::new(backend)
        }
        BackendKind::Fake => Arc::new(FakeBackend::with_seed(config.fake_seed)),
    };

    tracing::debug!(backend = backend.name(), "Selected script backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!("subprocess".parse::<BackendKind>().unwrap(), BackendKind::Subprocess);
        assert_eq!("fake".parse::<BackendKind>().unwrap(), BackendKind::Fake);
    }

    #[test]
    fn test_unknown_backend_fails_fast() {
        let config = BackendConfig {
            kind: "celery".into(),
            ..BackendConfig::default()
        };
        match get_backend(&config) {
            Err(ConfigError::UnsupportedBackend(name)) => assert_eq!(name, "celery"),
            other => panic!("Expected UnsupportedBackend, got {:?}", other.map(|b| b.name().to_string())),
        }
    }

    #[test]
    fn test_default_config_selects_subprocess() {
        let backend = get_backend(&BackendConfig::default()).unwrap();
        assert_eq!(backend.name(), "subprocess");
    }

    #[test]
    fn test_interpreter_override_rejects_unknown_language() {
        let mut config = BackendConfig::default();
        config
            .interpreters
            .insert("cobol".into(), vec!["cobc".into()]);
        assert!(matches!(
            get_backend(&config),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_get_backend_twice_behaves_the_same() {
        let config = BackendConfig {
            kind: "fake".into(),
            fake_seed: 7,
            ..BackendConfig::default()
        };
        let first = get_backend(&config).unwrap();
        let second = get_backend(&config).unwrap();

        let a = first.execute("python", "print(1)").await.unwrap();
        let b = second.execute("python", "print(1)").await.unwrap();
        assert_eq!(a, b);
    }
}
