//! Module descriptor and execution outcome.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Root folder used when none is given, assuming tests live in `./test`.
pub const DEFAULT_ROOT_FOLDER_PATH: &str = "../";

/// Module path used when none is given, assuming `.tf` files sit in the root.
pub const DEFAULT_MODULE_PATH: &str = ".";

/// Identifies the Terraform module a test exercises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Folder copied to the staging directory
    #[serde(default)]
    pub root_folder_path: String,
    /// Path of the module inside the root folder
    #[serde(default)]
    pub module_path: String,
    /// Input variables, passed verbatim to terraform
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// `-backend-config` pairs forwarded to `terraform init`
    #[serde(default)]
    pub backend_config: BTreeMap<String, String>,
    /// Environment exported to every terraform process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ModuleDescriptor {
    pub fn new(root_folder_path: impl Into<String>, module_path: impl Into<String>) -> Self {
        Self {
            root_folder_path: root_folder_path.into(),
            module_path: module_path.into(),
            ..Self::default()
        }
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn backend_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.backend_config.insert(key.into(), value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Fill empty paths with [`DEFAULT_ROOT_FOLDER_PATH`] and [`DEFAULT_MODULE_PATH`].
    pub fn resolve_defaults(&mut self) {
        if self.root_folder_path.is_empty() {
            self.root_folder_path = DEFAULT_ROOT_FOLDER_PATH.to_string();
        }
        if self.module_path.is_empty() {
            self.module_path = DEFAULT_MODULE_PATH.to_string();
        }
    }

    /// Check that every variable name is a valid terraform identifier.
    pub fn validate_variables(&self) -> CoreResult<()> {
        static IDENT: OnceLock<Regex> = OnceLock::new();
        let ident = IDENT.get_or_init(|| {
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("identifier pattern is valid")
        });

        match self.variables.keys().find(|name| !ident.is_match(name)) {
            Some(name) => Err(CoreError::InvalidVariable(name.clone())),
            None => Ok(()),
        }
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> String {
        let root = self.root_folder_path.trim_end_matches('/');
        match self.module_path.as_str() {
            "" | "." => root.to_string(),
            module => format!("{}/{}", root, module),
        }
    }
}

/// Binary verdict of a module test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// Every step succeeded
    Successful,
    /// Staging, a command or the health check failed
    Failed,
}

impl ExecutionOutcome {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Successful
        } else {
            Self::Failed
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Successful)
    }

    /// Successful only if both are successful.
    pub fn and(self, other: Self) -> Self {
        Self::from_success(self.is_successful() && other.is_successful())
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Successful => write!(f, "Successful"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_paths_resolve_to_defaults() {
        let mut module = ModuleDescriptor::default();
        module.resolve_defaults();

        assert_eq!(module.root_folder_path, "../");
        assert_eq!(module.module_path, ".");
    }

    #[test]
    fn test_explicit_paths_are_kept() {
        let mut module = ModuleDescriptor::new("../../", "examples/azure/tf-storage");
        module.resolve_defaults();

        assert_eq!(module.root_folder_path, "../../");
        assert_eq!(module.module_path, "examples/azure/tf-storage");
    }

    #[test]
    fn test_only_empty_field_is_defaulted() {
        let mut module = ModuleDescriptor::new("", "modules/net");
        module.resolve_defaults();

        assert_eq!(module.root_folder_path, "../");
        assert_eq!(module.module_path, "modules/net");
    }

    #[test]
    fn test_variable_names_are_validated() {
        let module = ModuleDescriptor::default()
            .variable("account_tier", "Standard")
            .variable("replicas", 3)
            .variable("tags", json!({"env": "dev"}));
        assert!(module.validate_variables().is_ok());

        let bad = ModuleDescriptor::default().variable("bad name", "x");
        assert!(matches!(
            bad.validate_variables(),
            Err(CoreError::InvalidVariable(name)) if name == "bad name"
        ));
    }

    #[test]
    fn test_label() {
        assert_eq!(ModuleDescriptor::new("../", ".").label(), "..");
        assert_eq!(
            ModuleDescriptor::new("../", "examples/azure/tf-storage").label(),
            "../examples/azure/tf-storage"
        );
    }

    #[test]
    fn test_outcome_serializes_as_name() {
        assert_eq!(
            serde_json::to_string(&ExecutionOutcome::Successful).unwrap(),
            "\"Successful\""
        );
        assert_eq!(ExecutionOutcome::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_outcome_and() {
        use ExecutionOutcome::*;
        assert_eq!(Successful.and(Successful), Successful);
        assert_eq!(Successful.and(Failed), Failed);
        assert_eq!(Failed.and(Successful), Failed);
    }
}
