use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Environment variable naming the engine config file.
pub const CONFIG_ENV: &str = "CADENCE_CONFIG";

/// Longest sleep allowed between paused frames.
const MAX_PAUSE_SLEEP_MS: u64 = 1000;

/// Engine configuration loaded from `cadence.toml`.
///
/// Every section is optional; missing sections and fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub app: AppSection,
    pub debugger: DebuggerSection,
    pub frame: FrameSection,
    pub perf: PerfSection,
}

/// Application identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppSection {
    pub id: String,
    pub version: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            id: "cadence.app".to_string(),
            version: "0.1.0".to_string(),
        }
    }
}

/// Script debugger settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DebuggerSection {
    /// Greater than zero enables the per-frame debugger client update.
    pub wait_for_debugger: u32,
}

/// Per-frame dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FrameSection {
    /// Name of the per-frame profiling scope and block.
    pub profile_name: String,
    /// Frame block budget; longer frames are reported.
    pub budget_ms: u64,
    /// Sleep between frames while ticking is disabled.
    pub pause_sleep_ms: u64,
}

impl Default for FrameSection {
    fn default() -> Self {
        Self {
            profile_name: "frame_tick".to_string(),
            budget_ms: 17,
            pause_sleep_ms: 30,
        }
    }
}

/// Performance counter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PerfSection {
    /// Sliding window for the frames-per-second counter.
    pub window_ms: u64,
    /// Minimum interval between process memory samples; `0` disables sampling.
    pub sample_interval_ms: u64,
}

impl Default for PerfSection {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            sample_interval_ms: 1000,
        }
    }
}

impl FrameSection {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn pause_sleep(&self) -> Duration {
        Duration::from_millis(self.pause_sleep_ms)
    }
}

impl PerfSection {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// `None` when memory sampling is disabled.
    pub fn sample_interval(&self) -> Option<Duration> {
        (self.sample_interval_ms > 0).then(|| Duration::from_millis(self.sample_interval_ms))
    }
}

impl EngineConfig {
    /// Parse and validate config TOML.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse engine config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config at {}", path.display()))?;

        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid engine config at {}", path.display()))
    }

    /// Load from the file named by `CADENCE_CONFIG`, or fall back to defaults.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Validate required fields and semantic constraints.
    pub fn validate(&self) -> Result<()> {
        validate_nonempty("app.id", &self.app.id)?;
        validate_nonempty("app.version", &self.app.version)?;
        validate_nonempty("frame.profile_name", &self.frame.profile_name)?;

        Version::parse(&self.app.version)
            .with_context(|| format!("app.version must be valid semver: {}", self.app.version))?;

        if self.frame.budget_ms == 0 {
            bail!("frame.budget_ms must be greater than zero");
        }
        if self.frame.pause_sleep_ms > MAX_PAUSE_SLEEP_MS {
            bail!(
                "frame.pause_sleep_ms must be at most {MAX_PAUSE_SLEEP_MS}, got {}",
                self.frame.pause_sleep_ms
            );
        }
        if self.perf.window_ms == 0 {
            bail!("perf.window_ms must be greater than zero");
        }

        Ok(())
    }

    /// Return `true` when the per-frame debugger update should run.
    pub fn debugger_enabled(&self) -> bool {
        self.debugger.wait_for_debugger > 0
    }
}

/// Return the config path from `CADENCE_CONFIG`, if set and non-empty.
pub fn config_path() -> Option<PathBuf> {
    let raw = std::env::var_os(CONFIG_ENV)?;
    if raw.is_empty() {
        return None;
    }
    Some(PathBuf::from(raw))
}

fn validate_nonempty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must not be empty")
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid data races.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const FULL_CONFIG: &str = r#"
[app]
id = "com.example.demo"
version = "1.2.0"

[debugger]
wait_for_debugger = 0

[frame]
profile_name = "demo_tick"
budget_ms = 33
pause_sleep_ms = 30

[perf]
window_ms = 2000
sample_interval_ms = 0
"#;

    #[test]
    fn parses_full_config() {
        let config = EngineConfig::from_toml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.app.id, "com.example.demo");
        assert_eq!(config.frame.profile_name, "demo_tick");
        assert_eq!(config.frame.budget(), Duration::from_millis(33));
        assert_eq!(config.perf.window(), Duration::from_secs(2));
        assert_eq!(config.perf.sample_interval(), None);
        assert!(!config.debugger_enabled());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.frame.pause_sleep(), Duration::from_millis(30));
        assert_eq!(config.perf.sample_interval(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str("[debugger]\nwait_for_debugger = 5\n").unwrap();
        assert!(config.debugger_enabled());
        assert_eq!(config.frame, FrameSection::default());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let raw = FULL_CONFIG.replace("budget_ms = 33", "budget_ms = 33\nvsync = true");
        let err = EngineConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("failed to parse engine config TOML"));
    }

    #[test]
    fn invalid_semver_is_rejected() {
        let raw = FULL_CONFIG.replace("version = \"1.2.0\"", "version = \"banana\"");
        let err = EngineConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("app.version must be valid semver"));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let raw = FULL_CONFIG.replace("budget_ms = 33", "budget_ms = 0");
        let err = EngineConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("frame.budget_ms must be greater than zero"));
    }

    #[test]
    fn long_pause_sleep_is_rejected() {
        let raw = FULL_CONFIG.replace("pause_sleep_ms = 30", "pause_sleep_ms = 5000");
        let err = EngineConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("frame.pause_sleep_ms must be at most"));
    }

    #[test]
    fn blank_profile_name_is_rejected() {
        let raw = FULL_CONFIG.replace("profile_name = \"demo_tick\"", "profile_name = \"  \"");
        let err = EngineConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("frame.profile_name must not be empty"));
    }

    #[test]
    fn from_path_reports_missing_file() {
        let err = EngineConfig::from_path(Path::new("/nonexistent/cadence.toml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("failed to read engine config"));
    }

    #[test]
    fn load_reads_file_named_by_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        let original = std::env::var(CONFIG_ENV).ok();

        let tmp = std::env::temp_dir().join("cadence-test-config");
        let _ = fs::create_dir_all(&tmp);
        let path = tmp.join("cadence.toml");
        fs::write(&path, FULL_CONFIG).unwrap();

        unsafe { std::env::set_var(CONFIG_ENV, &path) };
        let config = EngineConfig::load().unwrap();
        assert_eq!(config.app.id, "com.example.demo");

        unsafe { std::env::remove_var(CONFIG_ENV) };
        assert_eq!(EngineConfig::load().unwrap(), EngineConfig::default());

        if let Some(v) = original {
            unsafe { std::env::set_var(CONFIG_ENV, v) };
        }
        let _ = fs::remove_dir_all(&tmp);
    }
}
