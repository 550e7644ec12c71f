//! The config module owns the definition and loading process for spotsys' own configuration.
//! This is separate from the spot request template, which describes the instance to launch;
//! Spotsys.toml describes where and how to launch it.

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// The region spot requests go to when neither the command line nor Spotsys.toml names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for launching spot instances
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SpotsysConfig {
    // Config for the EC2 API connection
    pub aws: Option<AwsConfig>,

    // Config for the run log
    pub log: Option<LogConfig>,
}

impl SpotsysConfig {
    /// Deserializes a SpotsysConfig from a given path
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).context(error::FileSnafu { path })?;
        toml::from_str(&config_str).context(error::InvalidTomlSnafu { path })
    }

    /// Deserializes a SpotsysConfig from a given path, if it exists, otherwise builds a default
    /// config
    pub fn from_path_or_default<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        if path.as_ref().exists() {
            Self::from_path(path)
        } else {
            debug!(
                "No config found at {}, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// Returns the region to use, preferring the given override, then the config, then
    /// DEFAULT_REGION.
    pub fn region(&self, region_override: Option<&str>) -> String {
        region_override
            .map(str::to_string)
            .or_else(|| self.aws.as_ref().and_then(|aws| aws.region.clone()))
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Returns the credentials profile to use, preferring the given override.
    pub fn profile(&self, profile_override: Option<&str>) -> Option<String> {
        profile_override
            .map(str::to_string)
            .or_else(|| self.aws.as_ref().and_then(|aws| aws.profile.clone()))
    }

    /// Returns the directory run logs are written to, preferring the given override, then the
    /// config, then the current directory.
    pub fn log_directory(&self, directory_override: Option<&Path>) -> PathBuf {
        directory_override
            .map(Path::to_path_buf)
            .or_else(|| self.log.as_ref().and_then(|log| log.directory.clone()))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// AWS-specific configuration
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
    /// Custom EC2 endpoint, e.g. a local emulator
    pub endpoint: Option<Url>,
}

/// Run log configuration
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub directory: Option<PathBuf>,
}

mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Failed to read '{}': {}", path.display(), source))]
        File { path: PathBuf, source: io::Error },

        #[snafu(display("Invalid config file at '{}': {}", path.display(), source))]
        InvalidToml {
            path: PathBuf,
            source: toml::de::Error,
        },
    }
}
pub use error::Error;
pub type Result<T> = std::result::Result<T, error::Error>;
