//! Suite file loading.
//!
//! A suite is YAML by default, or TOML when the file ends in `.toml`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tfprobe_core::{ModuleDescriptor, StagingOptions, TerraformConfig};
use tfprobe_health::HealthClientConfig;
use tfprobe_runner::ContainerSpec;

pub const DEFAULT_SUITE_FILE: &str = "tfprobe.yaml";

/// A test suite: shared settings plus the modules to run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    #[serde(default)]
    pub terraform: TerraformSettings,
    #[serde(default)]
    pub health: HealthClientConfig,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

/// `terraform` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerraformSettings {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub copy_lock_file: bool,
    #[serde(default)]
    pub stream_logs: bool,
}

fn default_binary() -> String {
    "terraform".to_string()
}

fn default_timeout() -> u64 {
    3600
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            container: None,
            timeout_seconds: default_timeout(),
            copy_lock_file: false,
            stream_logs: false,
        }
    }
}

impl TerraformSettings {
    pub fn terraform_config(&self) -> TerraformConfig {
        TerraformConfig {
            binary: self.binary.clone(),
            container: self.container.clone(),
            timeout_seconds: self.timeout_seconds,
            stream_logs: self.stream_logs,
        }
    }

    pub fn staging_options(&self, keep: bool) -> StagingOptions {
        StagingOptions {
            copy_lock_file: self.copy_lock_file,
            keep,
            temp_root: None,
        }
    }
}

/// One module under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    #[serde(default)]
    pub root_folder_path: String,
    #[serde(default)]
    pub module_path: String,
    #[serde(default)]
    pub static_analysis: bool,
    #[serde(default)]
    pub health_check: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub backend_config: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ModuleEntry {
    /// Descriptor for this entry; relative and defaulted roots resolve against `base`.
    pub fn descriptor(&self, base: &Path) -> ModuleDescriptor {
        let root = if self.root_folder_path.is_empty() {
            tfprobe_core::DEFAULT_ROOT_FOLDER_PATH
        } else {
            self.root_folder_path.as_str()
        };
        let root_folder_path = if Path::new(root).is_absolute() {
            root.to_string()
        } else {
            base.join(root).to_string_lossy().into_owned()
        };

        ModuleDescriptor {
            root_folder_path,
            module_path: self.module_path.clone(),
            variables: self.variables.clone(),
            backend_config: self.backend_config.clone(),
            env: self.env.clone(),
        }
    }
}

impl SuiteConfig {
    /// Load a suite file, choosing the format by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read suite file {}", path.display()))?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let suite = if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_yaml(&content)
        }
        .with_context(|| format!("Invalid suite file {}", path.display()))?;

        suite.check()?;
        Ok(suite)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Module names must be present and unique.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.name.trim().is_empty() {
                bail!("Suite contains a module without a name");
            }
            if !seen.insert(module.name.as_str()) {
                bail!("Duplicate module name in suite: {}", module.name);
            }
        }
        Ok(())
    }

    /// Modules named in `names`, or all of them when `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<&ModuleEntry>> {
        if names.is_empty() {
            return Ok(self.modules.iter().collect());
        }

        let unknown: Vec<&str> = names
            .iter()
            .filter(|n| !self.modules.iter().any(|m| &m.name == *n))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            bail!("Unknown module(s): {}", unknown.join(", "));
        }

        Ok(self
            .modules
            .iter()
            .filter(|m| names.contains(&m.name))
            .collect())
    }
}

/// Directory relative module roots are resolved against.
pub fn suite_base_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
