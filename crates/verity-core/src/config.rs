//! Analysis configuration, loadable from TOML.
//!
//! Every field has a default so a config file only needs the keys it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoreError, StrategyKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    pub max_section_chars: usize,
    pub min_section_chars: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_section_chars: 1200,
            min_section_chars: 80,
        }
    }
}

/// Blend between retrieval signal and model self-assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub retrieval: f64,
    pub model: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            retrieval: 0.5,
            model: 0.5,
        }
    }
}

/// Score contributed by each compliance level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusWeights {
    pub compliant: f64,
    pub partially_compliant: f64,
    pub non_compliant: f64,
}

impl Default for StatusWeights {
    fn default() -> Self {
        Self {
            compliant: 1.0,
            partially_compliant: 0.5,
            non_compliant: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Evidence breadth per query.
    pub k: usize,
    pub min_similarity: f64,
    /// Step cap for the retrieve-act-observe loop.
    pub max_steps: u32,
    /// Validate retries inside the reasoning engine.
    pub max_retries: u32,
    /// Agent-level reconsider rounds when confidence is low.
    pub max_self_correction_rounds: u32,
    pub confidence_threshold: f64,
    pub per_call_timeout_ms: u64,
    pub section_timeout_ms: Option<u64>,
    pub overall_timeout_ms: Option<u64>,
    /// Concurrent section evaluations.
    pub workers: usize,
    /// Retrieval attempts including the first.
    pub retrieval_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub strategy: StrategyKind,
    pub splitter: SplitterConfig,
    pub confidence_weights: ConfidenceWeights,
    pub status_weights: StatusWeights,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            k: 4,
            min_similarity: 0.35,
            max_steps: 4,
            max_retries: 2,
            max_self_correction_rounds: 1,
            confidence_threshold: 0.6,
            per_call_timeout_ms: 30_000,
            section_timeout_ms: None,
            overall_timeout_ms: None,
            workers: 4,
            retrieval_attempts: 3,
            retry_base_delay_ms: 200,
            strategy: StrategyKind::Direct,
            splitter: SplitterConfig::default(),
            confidence_weights: ConfidenceWeights::default(),
            status_weights: StatusWeights::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load and validate a TOML config file.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: AnalysisConfig = toml::from_str(&text)?;
        cfg.validate()?;
        tracing::debug!(path = %path.display(), "loaded analysis config");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |msg: String| Err(CoreError::Config(msg));

        if self.k == 0 {
            return fail("k must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return fail(format!("min_similarity {} outside [0, 1]", self.min_similarity));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return fail(format!(
                "confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            ));
        }
        if self.max_steps == 0 {
            return fail("max_steps must be at least 1".into());
        }
        if self.workers == 0 {
            return fail("workers must be at least 1".into());
        }
        if self.retrieval_attempts == 0 {
            return fail("retrieval_attempts must be at least 1".into());
        }
        if self.per_call_timeout_ms == 0 {
            return fail("per_call_timeout_ms must be positive".into());
        }
        if self.splitter.min_section_chars >= self.splitter.max_section_chars {
            return fail(format!(
                "splitter.min_section_chars ({}) must be below max_section_chars ({})",
                self.splitter.min_section_chars, self.splitter.max_section_chars
            ));
        }
        let w = &self.confidence_weights;
        if w.retrieval < 0.0 || w.model < 0.0 || w.retrieval + w.model <= 0.0 {
            return fail("confidence_weights must be non-negative and not both zero".into());
        }
        let s = &self.status_weights;
        for (name, v) in [
            ("compliant", s.compliant),
            ("partially_compliant", s.partially_compliant),
            ("non_compliant", s.non_compliant),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return fail(format!("status_weights.{name} {v} outside [0, 1]"));
            }
        }
        if !(s.compliant >= s.partially_compliant && s.partially_compliant >= s.non_compliant) {
            return fail("status_weights must not decrease with compliance level".into());
        }
        if s.compliant <= s.non_compliant {
            return fail(format!(
                "status_weights.compliant ({}) must exceed non_compliant ({})",
                s.compliant, s.non_compliant
            ));
        }
        Ok(())
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn section_timeout(&self) -> Option<Duration> {
        self.section_timeout_ms.map(Duration::from_millis)
    }

    pub fn overall_timeout(&self) -> Option<Duration> {
        self.overall_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AnalysisConfig = toml::from_str(
            r#"
            k = 6
            strategy = "retrieve_act_observe"
            overall_timeout_ms = 120000

            [splitter]
            max_section_chars = 2000

            [confidence_weights]
            retrieval = 0.7
            model = 0.3
            "#,
        )
        .unwrap();

        assert_eq!(cfg.k, 6);
        assert_eq!(cfg.strategy, StrategyKind::RetrieveActObserve);
        assert_eq!(cfg.overall_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(cfg.splitter.max_section_chars, 2000);
        assert_eq!(cfg.splitter.min_section_chars, 80);
        assert_eq!(cfg.confidence_weights.retrieval, 0.7);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.section_timeout(), None);
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "min_similarity = 0.5\nworkers = 2").unwrap();

        let cfg = AnalysisConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.min_similarity, 0.5);
        assert_eq!(cfg.workers, 2);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "min_similarity = 1.5").unwrap();

        let err = AnalysisConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)), "got {err:?}");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AnalysisConfig::load_from(Path::new("/nonexistent/verity.toml")).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }

    #[test]
    fn rejects_inverted_status_weights() {
        let cfg = AnalysisConfig {
            status_weights: StatusWeights {
                compliant: 0.2,
                partially_compliant: 0.5,
                non_compliant: 0.0,
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_flat_status_weights() {
        let cfg = AnalysisConfig {
            status_weights: StatusWeights {
                compliant: 0.5,
                partially_compliant: 0.5,
                non_compliant: 0.5,
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must exceed non_compliant"), "{err}");

        let stepped = AnalysisConfig {
            status_weights: StatusWeights {
                compliant: 0.8,
                partially_compliant: 0.8,
                non_compliant: 0.1,
            },
            ..Default::default()
        };
        stepped.validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_splitter_bounds() {
        let cfg = AnalysisConfig {
            splitter: SplitterConfig {
                max_section_chars: 50,
                min_section_chars: 50,
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
