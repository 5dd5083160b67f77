use std::path::{Path, PathBuf};
use std::time::Duration;

use directories_next::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_REQUIRED_RETRY_LIMIT;
use crate::remote::DEFAULT_LAUNCH_URL;
use crate::wait::WaitPolicy;

pub const CONFIG_DIR_ENV: &str = "NF_LAUNCH_CONFIG_DIR";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaunchSettings {
    #[serde(default = "default_launch_url")]
    pub web_launch_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound for the doubling poll delay; equal to the interval
    /// (or unset) means a fixed delay.
    #[serde(default)]
    pub max_poll_interval_secs: Option<u64>,
    #[serde(default = "default_retry_limit")]
    pub required_retry_limit: usize,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            web_launch_url: default_launch_url(),
            poll_interval_secs: default_poll_interval(),
            max_poll_interval_secs: None,
            required_retry_limit: default_retry_limit(),
        }
    }
}

impl LaunchSettings {
    pub fn wait_policy(&self) -> WaitPolicy {
        let interval = Duration::from_secs(self.poll_interval_secs);
        match self.max_poll_interval_secs {
            Some(max) => WaitPolicy::backoff(interval, Duration::from_secs(max)),
            None => WaitPolicy::fixed(interval),
        }
    }
}

fn default_launch_url() -> String {
    DEFAULT_LAUNCH_URL.to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_retry_limit() -> usize {
    DEFAULT_REQUIRED_RETRY_LIMIT
}

pub fn load_settings() -> anyhow::Result<LaunchSettings> {
    let path = settings_path()?;
    load_settings_from(&path)
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<LaunchSettings> {
    if !path.exists() {
        return Ok(LaunchSettings::default());
    }
    let contents = std::fs::read_to_string(path)?;
    let settings: LaunchSettings = serde_yaml_bw::from_str(&contents)?;
    Ok(settings)
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(Path::new(&value).join("launch.yaml"));
    }
    let dirs = ProjectDirs::from("", "nf-core", "launch")
        .ok_or_else(|| anyhow::anyhow!("unable to determine config directory"))?;
    Ok(dirs.config_dir().join("launch.yaml"))
}
