//! `EngineConfig` — the flat set of options recognized by a query (spec §3, §6.5).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_model_name() -> String {
    "default".to_string()
}

fn default_max_iterations() -> u32 {
    20
}

fn default_per_exec_timeout_ms() -> u64 {
    30_000
}

fn default_overall_read_deadline_ms() -> u64 {
    300_000
}

fn default_max_output_chars() -> usize {
    50_000
}

fn default_max_subcall_chars() -> usize {
    500_000
}

fn default_max_buffer_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

fn default_pool_size() -> usize {
    3
}

fn default_worker_memory_mib() -> u64 {
    512
}

fn default_worker_cpu_cores() -> f64 {
    1.0
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern::new("bearer-token", r"Bearer [A-Za-z0-9._-]{10,}"),
        RedactionPattern::new("aws-key", r"AKIA[0-9A-Z]{16}"),
        RedactionPattern::new("sk-key", r"sk-[A-Za-z0-9]{10,}"),
        RedactionPattern::new("pem-header", r"-----BEGIN [A-Z ]+-----"),
    ]
}

/// One redaction rule: a compiled-once regex and the tag used in its
/// replacement token (`«REDACTED:tag»`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionPattern {
    pub pattern_tag: String,
    pub regex: String,
}

impl RedactionPattern {
    pub fn new(pattern_tag: impl Into<String>, regex: impl Into<String>) -> Self {
        Self {
            pattern_tag: pattern_tag.into(),
            regex: regex.into(),
        }
    }
}

/// Options recognized by one query (spec §3). Field defaults match the values
/// stated there; unknown keys arriving through [`EngineConfig::from_value`] are
/// rejected rather than silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_per_exec_timeout_ms")]
    pub per_exec_timeout_ms: u64,

    #[serde(default = "default_overall_read_deadline_ms")]
    pub overall_read_deadline_ms: u64,

    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    #[serde(default = "default_max_subcall_chars")]
    pub max_subcall_chars: usize,

    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_worker_memory_mib")]
    pub worker_memory_mib: u64,

    #[serde(default = "default_worker_cpu_cores")]
    pub worker_cpu_cores: f64,

    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    #[serde(default = "default_redaction_patterns")]
    pub redaction_patterns: Vec<RedactionPattern>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            max_iterations: default_max_iterations(),
            per_exec_timeout_ms: default_per_exec_timeout_ms(),
            overall_read_deadline_ms: default_overall_read_deadline_ms(),
            max_output_chars: default_max_output_chars(),
            max_subcall_chars: default_max_subcall_chars(),
            max_buffer_bytes: default_max_buffer_bytes(),
            max_line_bytes: default_max_line_bytes(),
            pool_size: default_pool_size(),
            worker_memory_mib: default_worker_memory_mib(),
            worker_cpu_cores: default_worker_cpu_cores(),
            allowed_hosts: Vec::new(),
            redaction_patterns: default_redaction_patterns(),
        }
    }
}

/// `Option<T>` field set for programmatic overrides, applied on top of
/// environment-sourced values and below explicit-argument values per §6.5's
/// precedence: explicit argument > environment > default.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigOverrides {
    pub model_name: Option<String>,
    pub max_iterations: Option<u32>,
    pub per_exec_timeout_ms: Option<u64>,
    pub overall_read_deadline_ms: Option<u64>,
    pub max_output_chars: Option<usize>,
    pub max_subcall_chars: Option<usize>,
    pub max_buffer_bytes: Option<usize>,
    pub max_line_bytes: Option<usize>,
    pub pool_size: Option<usize>,
    pub worker_memory_mib: Option<u64>,
    pub worker_cpu_cores: Option<f64>,
    pub allowed_hosts: Option<Vec<String>>,
    pub redaction_patterns: Option<Vec<RedactionPattern>>,
}

/// Boundary struct used only by [`EngineConfig::from_value`]; rejects unknown
/// keys instead of silently ignoring them (spec §6.5).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineConfigStrict {
    #[serde(default = "default_model_name")]
    model_name: String,
    #[serde(default = "default_max_iterations")]
    max_iterations: u32,
    #[serde(default = "default_per_exec_timeout_ms")]
    per_exec_timeout_ms: u64,
    #[serde(default = "default_overall_read_deadline_ms")]
    overall_read_deadline_ms: u64,
    #[serde(default = "default_max_output_chars")]
    max_output_chars: usize,
    #[serde(default = "default_max_subcall_chars")]
    max_subcall_chars: usize,
    #[serde(default = "default_max_buffer_bytes")]
    max_buffer_bytes: usize,
    #[serde(default = "default_max_line_bytes")]
    max_line_bytes: usize,
    #[serde(default = "default_pool_size")]
    pool_size: usize,
    #[serde(default = "default_worker_memory_mib")]
    worker_memory_mib: u64,
    #[serde(default = "default_worker_cpu_cores")]
    worker_cpu_cores: f64,
    #[serde(default)]
    allowed_hosts: Vec<String>,
    #[serde(default = "default_redaction_patterns")]
    redaction_patterns: Vec<RedactionPattern>,
}

impl From<EngineConfigStrict> for EngineConfig {
    fn from(s: EngineConfigStrict) -> Self {
        Self {
            model_name: s.model_name,
            max_iterations: s.max_iterations,
            per_exec_timeout_ms: s.per_exec_timeout_ms,
            overall_read_deadline_ms: s.overall_read_deadline_ms,
            max_output_chars: s.max_output_chars,
            max_subcall_chars: s.max_subcall_chars,
            max_buffer_bytes: s.max_buffer_bytes,
            max_line_bytes: s.max_line_bytes,
            pool_size: s.pool_size,
            worker_memory_mib: s.worker_memory_mib,
            worker_cpu_cores: s.worker_cpu_cores,
            allowed_hosts: s.allowed_hosts,
            redaction_patterns: s.redaction_patterns,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse from a flat JSON map, rejecting unknown keys with `Error::Config`.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let strict: EngineConfigStrict =
            serde_json::from_value(value).map_err(|e| Error::config(e.to_string()))?;
        let cfg: EngineConfig = strict.into();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve `SHESHA_RLM_*` environment variables, then apply `overrides` on
    /// top, then validate. Precedence: `overrides` > environment > default.
    pub fn from_env_and_overrides(overrides: EngineConfigOverrides) -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SHESHA_RLM_MODEL_NAME") {
            cfg.model_name = v;
        }
        if let Some(v) = env_parsed::<u32>("SHESHA_RLM_MAX_ITERATIONS") {
            cfg.max_iterations = v;
        }
        if let Some(v) = env_parsed::<u64>("SHESHA_RLM_PER_EXEC_TIMEOUT_MS") {
            cfg.per_exec_timeout_ms = v;
        }
        if let Some(v) = env_parsed::<u64>("SHESHA_RLM_OVERALL_READ_DEADLINE_MS") {
            cfg.overall_read_deadline_ms = v;
        }
        if let Some(v) = env_parsed::<usize>("SHESHA_RLM_MAX_OUTPUT_CHARS") {
            cfg.max_output_chars = v;
        }
        if let Some(v) = env_parsed::<usize>("SHESHA_RLM_MAX_SUBCALL_CHARS") {
            cfg.max_subcall_chars = v;
        }
        if let Some(v) = env_parsed::<usize>("SHESHA_RLM_MAX_BUFFER_BYTES") {
            cfg.max_buffer_bytes = v;
        }
        if let Some(v) = env_parsed::<usize>("SHESHA_RLM_MAX_LINE_BYTES") {
            cfg.max_line_bytes = v;
        }
        if let Some(v) = env_parsed::<usize>("SHESHA_RLM_POOL_SIZE") {
            cfg.pool_size = v;
        }
        if let Some(v) = env_parsed::<u64>("SHESHA_RLM_WORKER_MEMORY_MIB") {
            cfg.worker_memory_mib = v;
        }
        if let Some(v) = env_parsed::<f64>("SHESHA_RLM_WORKER_CPU_CORES") {
            cfg.worker_cpu_cores = v;
        }

        if let Some(v) = overrides.model_name {
            cfg.model_name = v;
        }
        if let Some(v) = overrides.max_iterations {
            cfg.max_iterations = v;
        }
        if let Some(v) = overrides.per_exec_timeout_ms {
            cfg.per_exec_timeout_ms = v;
        }
        if let Some(v) = overrides.overall_read_deadline_ms {
            cfg.overall_read_deadline_ms = v;
        }
        if let Some(v) = overrides.max_output_chars {
            cfg.max_output_chars = v;
        }
        if let Some(v) = overrides.max_subcall_chars {
            cfg.max_subcall_chars = v;
        }
        if let Some(v) = overrides.max_buffer_bytes {
            cfg.max_buffer_bytes = v;
        }
        if let Some(v) = overrides.max_line_bytes {
            cfg.max_line_bytes = v;
        }
        if let Some(v) = overrides.pool_size {
            cfg.pool_size = v;
        }
        if let Some(v) = overrides.worker_memory_mib {
            cfg.worker_memory_mib = v;
        }
        if let Some(v) = overrides.worker_cpu_cores {
            cfg.worker_cpu_cores = v;
        }
        if let Some(v) = overrides.allowed_hosts {
            cfg.allowed_hosts = v;
        }
        if let Some(v) = overrides.redaction_patterns {
            cfg.redaction_patterns = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Enforce §3's invariants. Called before any worker starts (spec §4.5).
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations < 1 {
            return Err(Error::config("max_iterations must be >= 1"));
        }
        if self.overall_read_deadline_ms < self.per_exec_timeout_ms {
            return Err(Error::config(
                "overall_read_deadline_ms must be >= per_exec_timeout_ms",
            ));
        }
        if self.pool_size < 1 {
            return Err(Error::config("pool_size must be >= 1"));
        }
        if self.max_line_bytes == 0 || self.max_buffer_bytes == 0 {
            return Err(Error::config(
                "max_line_bytes and max_buffer_bytes must be > 0",
            ));
        }
        if self.max_buffer_bytes < self.max_line_bytes {
            return Err(Error::config(
                "max_buffer_bytes must be >= max_line_bytes",
            ));
        }
        for p in &self.redaction_patterns {
            if regex::Regex::new(&p.regex).is_err() {
                return Err(Error::config(format!(
                    "redaction pattern {:?} is not a valid regex",
                    p.pattern_tag
                )));
            }
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Builder for programmatic construction, mirroring the teacher's
/// config-builder pattern.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    cfg: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn model_name(mut self, v: impl Into<String>) -> Self {
        self.cfg.model_name = v.into();
        self
    }

    pub fn max_iterations(mut self, v: u32) -> Self {
        self.cfg.max_iterations = v;
        self
    }

    pub fn per_exec_timeout_ms(mut self, v: u64) -> Self {
        self.cfg.per_exec_timeout_ms = v;
        self
    }

    pub fn overall_read_deadline_ms(mut self, v: u64) -> Self {
        self.cfg.overall_read_deadline_ms = v;
        self
    }

    pub fn max_output_chars(mut self, v: usize) -> Self {
        self.cfg.max_output_chars = v;
        self
    }

    pub fn max_subcall_chars(mut self, v: usize) -> Self {
        self.cfg.max_subcall_chars = v;
        self
    }

    pub fn max_buffer_bytes(mut self, v: usize) -> Self {
        self.cfg.max_buffer_bytes = v;
        self
    }

    pub fn max_line_bytes(mut self, v: usize) -> Self {
        self.cfg.max_line_bytes = v;
        self
    }

    pub fn pool_size(mut self, v: usize) -> Self {
        self.cfg.pool_size = v;
        self
    }

    pub fn worker_memory_mib(mut self, v: u64) -> Self {
        self.cfg.worker_memory_mib = v;
        self
    }

    pub fn worker_cpu_cores(mut self, v: f64) -> Self {
        self.cfg.worker_cpu_cores = v;
        self
    }

    pub fn allowed_hosts(mut self, v: Vec<String>) -> Self {
        self.cfg.allowed_hosts = v;
        self
    }

    pub fn redaction_patterns(mut self, v: Vec<RedactionPattern>) -> Self {
        self.cfg.redaction_patterns = v;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_iterations() {
        let cfg = EngineConfig {
            max_iterations: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_deadlines() {
        let cfg = EngineConfig {
            per_exec_timeout_ms: 1_000,
            overall_read_deadline_ms: 500,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_value_rejects_unknown_keys() {
        let v = serde_json::json!({"pool_size": 2, "bogus_key": true});
        assert!(EngineConfig::from_value(v).is_err());
    }

    #[test]
    fn builder_round_trip() {
        let cfg = EngineConfig::builder()
            .pool_size(5)
            .max_iterations(10)
            .build()
            .unwrap();
        assert_eq!(cfg.pool_size, 5);
        assert_eq!(cfg.max_iterations, 10);
    }
}
