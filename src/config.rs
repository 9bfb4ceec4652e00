use crate::errors::WardenError;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;

/// Top-level configuration loaded from warden.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    pub session: SessionConfig,
    pub intervals: IntervalsConfig,
    pub limits: LimitsConfig,
    pub payload: PayloadConfig,
    pub site: SiteConfig,
    pub container: ContainerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default agent lifetime in seconds, used when the queue configuration
    /// does not carry a usable maxtime value.
    pub lifetime: u64,
    /// How often (s) to verify that registered worker tasks are alive.
    pub thread_check_interval: u64,
    /// How often (s) to sample and log the agent's own CPU consumption.
    pub cpu_check_interval: u64,
}

/// Per-check verification intervals, all in seconds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub memory_usage_verification_time: u64,
    pub proxy_verification_time: u64,
    pub looping_verification_time: u64,
    pub disk_space_verification_time: u64,
    pub cpu_consumption_sampling_time: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max allowed payload stdout size, in kB.
    pub local_size_limit_stdout: u64,
    /// Minimum free space on the local disk, human-readable ("2 GB").
    pub free_space_limit: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// File name the payload wrapper writes stdout to. Multi-run payloads
    /// get an _N suffix before the extension, one file per run.
    pub payload_stdout: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Key selecting the registered site-validator implementation.
    pub user_profile: String,
    /// Whether the credential (proxy) check runs at all.
    pub verify_proxy: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ContainerConfig {
    /// Run utility subprocesses through the container wrapper below.
    pub enabled: bool,
    /// Wrapper command prefix, e.g. "apptainer exec image.sif".
    pub command: String,
}

// --- Default implementations ---

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime: 324_000,
            thread_check_interval: 60,
            cpu_check_interval: 120,
        }
    }
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            memory_usage_verification_time: 60,
            proxy_verification_time: 600,
            looping_verification_time: 600,
            disk_space_verification_time: 300,
            cpu_consumption_sampling_time: 60,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            local_size_limit_stdout: 2048,
            free_space_limit: "2 GB".to_string(),
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            payload_stdout: "payload.stdout.txt".to_string(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            user_profile: "generic".to_string(),
            verify_proxy: true,
        }
    }
}

impl WardenConfig {
    /// Stdout size limit in bytes (stored in the config file as kB).
    pub fn stdout_size_limit_bytes(&self) -> u64 {
        self.limits.local_size_limit_stdout * 1024
    }

    /// Free-space limit in bytes, parsed from the human-readable setting.
    /// A bad value falls back to the default limit with a warning.
    pub fn free_space_limit_bytes(&self) -> u64 {
        match parse_human_size(&self.limits.free_space_limit) {
            Some(bytes) => bytes,
            None => {
                tracing::warn!(
                    value = %self.limits.free_space_limit,
                    "bad free_space_limit in config, using default of 2 GB"
                );
                2 * 1024 * 1024 * 1024
            }
        }
    }
}

/// Load configuration from a TOML file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<WardenConfig, WardenError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        return Ok(WardenConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|e| WardenError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(&text).map_err(|e| WardenError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

static HUMAN_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    // "2 GB", "512MB", "10 kB", "3", "1.5 GiB"
    Regex::new(r"(?i)^\s*([0-9]+(?:\.[0-9]+)?)\s*([kmgt]?)i?b?\s*$").unwrap()
});

/// Parse a human-readable size ("2 GB", "512 MB", "1024") into bytes,
/// using 1024-based multipliers. Returns None for unparsable input.
pub fn parse_human_size(text: &str) -> Option<u64> {
    let caps = HUMAN_SIZE.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier: u64 = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        "t" => 1024u64.pow(4),
        _ => return None,
    };
    Some((value * multiplier as f64) as u64)
}
