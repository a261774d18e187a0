//! Deterministic fake backend for tests.
//!
//! No process is spawned. Every call derives a `ChaCha8Rng` from the backend
//! seed and the (language, script) pair, so the same input always produces
//! the same exit code and output, independent of call order.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{BackendError, OsFamily, ScriptBackend, ScriptOutput};
use crate::core::pipeline::Language;

/// Prefix of every fake stdout.
pub const STDOUT_MARKER: &str = "(stdout)";
/// Prefix of every fake stderr.
pub const STDERR_MARKER: &str = "(stderr)";

const SENTENCES_PER_STREAM: usize = 20;

const WORDS: &[&str] = &[
    "data", "pipeline", "extract", "load", "transform", "table", "query", "row", "column",
    "schema", "batch", "record", "value", "source", "target", "warehouse", "report", "metric",
    "window", "partition", "merge", "join", "filter", "aggregate", "export",
];

/// Backend returning seeded synthetic output.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    seed: u64,
}

impl FakeBackend {
    /// Create a fake backend with seed 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fake backend with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Get the seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn rng_for(&self, language: Language, script: &str) -> ChaCha8Rng {
        // FNV-1a, stable across platforms and toolchains
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in language
            .as_str()
            .bytes()
            .chain([0u8])
            .chain(script.bytes())
        {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        ChaCha8Rng::seed_from_u64(self.seed ^ hash)
    }
}

fn paragraph(rng: &mut ChaCha8Rng, sentences: usize) -> String {
    let mut out = Vec::with_capacity(sentences);
    for _ in 0..sentences {
        let len = rng.random_range(4..10);
        let words: Vec<&str> = (0..len)
            .map(|_| WORDS[rng.random_range(0..WORDS.len())])
            .collect();
        let sentence = words.join(" ");
        out.push(format!(
            "{}{}.",
            sentence[..1].to_uppercase(),
            &sentence[1..]
        ));
    }
    out.join(" ")
}

#[async_trait]
impl ScriptBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn execute(&self, language: &str, script: &str) -> Result<ScriptOutput, BackendError> {
        let parsed: Language =
            language
                .parse()
                .map_err(|_| BackendError::UnsupportedLanguage {
                    language: language.to_string(),
                    os: OsFamily::current(),
                })?;

        let mut rng = self.rng_for(parsed, script);
        let returncode = rng.random_range(0..=10);
        let stdout = format!("{} {}", STDOUT_MARKER, paragraph(&mut rng, SENTENCES_PER_STREAM));
        let stderr = format!("{} {}", STDERR_MARKER, paragraph(&mut rng, SENTENCES_PER_STREAM));

        Ok(ScriptOutput {
            returncode,
            stdout,
            stderr,
        })
    }
}
