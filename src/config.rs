use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

/// Run configuration, loaded once at process start. The roots are opaque
/// location strings as far as the pipeline is concerned; the credential
/// pair, when present, is exported to the environment for whatever storage
/// layer the roots resolve to.
#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub description: Option<String>,
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    #[serde(default)]
    pub aws: Option<AwsCredentials>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open run configuration file: {}", path.display()))?;
        let config: RunConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse run configuration YAML from {}", path.display()))?;
        Ok(config)
    }

    /// Puts the configured credential pair into the process environment
    /// under the standard AWS variable names.
    pub fn export_credentials(&self) {
        if let Some(aws) = &self.aws {
            std::env::set_var("AWS_ACCESS_KEY_ID", &aws.access_key_id);
            std::env::set_var("AWS_SECRET_ACCESS_KEY", &aws.secret_access_key);
            info!("Exported object-store credentials to the process environment");
        }
    }
}
