//! Subprocess script backend.
//!
//! Each execution writes the script to a fresh temporary file, runs the
//! platform interpreter on it as a child process and captures stdout, stderr
//! and the exit code. The temporary file is removed when the call returns,
//! on success and on every error path.
//!
//! # Example
//!
//! ```no_run
//! use etlman::{Language, ScriptBackend, SubprocessBackend};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), etlman::BackendError> {
//! let backend = SubprocessBackend::new()
//!     .with_interpreter(Language::Python, ["/usr/bin/env", "python3"])
//!     .with_timeout(Duration::from_secs(60));
//!
//! let output = backend.execute("python", "print('hi')").await?;
//! assert_eq!(output.returncode, 0);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::{BackendError, ScriptBackend, ScriptOutput};
use crate::core::pipeline::Language;

/// Operating system family used to pick interpreter invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Windows,
    Posix,
}

impl OsFamily {
    /// The family this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Posix
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Windows => f.write_str("windows"),
            OsFamily::Posix => f.write_str("posix"),
        }
    }
}

fn default_interpreters() -> HashMap<(OsFamily, Language), Vec<String>> {
    let table: [((OsFamily, Language), &[&str]); 4] = [
        ((OsFamily::Windows, Language::Python), &["Python.exe"]),
        ((OsFamily::Windows, Language::R), &["Rscript.exe"]),
        ((OsFamily::Posix, Language::Python), &["/usr/bin/env", "python"]),
        ((OsFamily::Posix, Language::R), &["/usr/bin/env", "Rscript"]),
    ];
    table
        .into_iter()
        .map(|(key, argv)| (key, argv.iter().map(|s| s.to_string()).collect()))
        .collect()
}

/// Backend that runs scripts as child processes.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    /// Interpreter invocation per (OS, language); the script path is appended.
    interpreters: HashMap<(OsFamily, Language), Vec<String>>,
    /// OS family used for lookups.
    os: OsFamily,
    /// Optional wall-clock limit per script.
    timeout: Option<Duration>,
}

impl SubprocessBackend {
    /// Create a backend with the default interpreter table for this OS.
    pub fn new() -> Self {
        Self {
            interpreters: default_interpreters(),
            os: OsFamily::current(),
            timeout: None,
        }
    }

    /// Resolve interpreters as if running on another OS family.
    pub fn with_os(mut self, os: OsFamily) -> Self {
        self.os = os;
        self
    }

    /// Override the interpreter invocation for a language on the current OS family.
    pub fn with_interpreter<I, S>(mut self, language: Language, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        self.interpreters.insert((self.os, language), argv);
        self
    }

    /// Kill scripts that run longer than `duration`.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Interpreter invocation for `language`.
    pub fn interpreter(&self, language: &str) -> Result<(Language, &[String]), BackendError> {
        let unsupported = || BackendError::UnsupportedLanguage {
            language: language.to_string(),
            os: self.os,
        };

        let parsed: Language = language.parse().map_err(|_| unsupported())?;
        match self.interpreters.get(&(self.os, parsed)) {
            Some(argv) if !argv.is_empty() => Ok((parsed, argv.as_slice())),
            _ => Err(unsupported()),
        }
    }
}

impl Default for SubprocessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptBackend for SubprocessBackend {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn execute(&self, language: &str, script: &str) -> Result<ScriptOutput, BackendError> {
        let (language, argv) = self.interpreter(language)?;

        let mut file = tempfile::Builder::new()
            .prefix("etlman-")
            .suffix(language.file_suffix())
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;
        // Close our handle so the interpreter can open the file on every OS.
        // The path guard deletes the file when it goes out of scope.
        let script_path = file.into_temp_path();

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .arg(&script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            language = %language,
            program = %argv[0],
            script = %script_path.display(),
            "Spawning interpreter"
        );

        let child = cmd.spawn()?;
        let output = match self.timeout {
            Some(duration) => timeout(duration, child.wait_with_output())
                .await
                .map_err(|_| BackendError::Timeout(duration))??,
            None => child.wait_with_output().await?,
        };

        Ok(ScriptOutput {
            returncode: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
