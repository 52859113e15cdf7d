//! Copying a module into an isolated temporary working directory.
//!
//! Terraform writes `.terraform/`, lock files and state next to the
//! configuration it runs. Staging copies the root folder first so none of
//! that lands in the source tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};
use crate::module::ModuleDescriptor;

/// Hidden file that is still copied.
const TERRAFORM_VERSION_FILE: &str = ".terraform-version";
const LOCK_FILE: &str = ".terraform.lock.hcl";

/// Staging behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingOptions {
    /// Copy `.terraform.lock.hcl` along with the configuration
    #[serde(default)]
    pub copy_lock_file: bool,
    /// Leave the staged copy on disk after the run
    #[serde(default)]
    pub keep: bool,
    /// Parent directory for staged copies (system temp dir when unset)
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
}

/// Working directory and inputs derived from a [`ModuleDescriptor`].
///
/// Owns the temporary directory; the copy is removed when this is dropped
/// unless [`StagingOptions::keep`] was set.
#[derive(Debug)]
pub struct StagedOptions {
    /// Module directory inside the staged copy
    pub working_dir: PathBuf,
    pub variables: BTreeMap<String, Value>,
    pub backend_config: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    staging_root: PathBuf,
    _temp_dir: Option<TempDir>,
}

impl StagedOptions {
    /// Options for a directory that already exists and is not owned.
    pub fn for_dir(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            staging_root: working_dir.clone(),
            working_dir,
            variables: BTreeMap::new(),
            backend_config: BTreeMap::new(),
            env: BTreeMap::new(),
            _temp_dir: None,
        }
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Top of the staged copy.
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Whether the copy is removed on drop.
    pub fn is_ephemeral(&self) -> bool {
        self._temp_dir.is_some()
    }
}

/// Copy the module's root folder to a fresh temp directory.
pub fn stage(module: &ModuleDescriptor, options: &StagingOptions) -> CoreResult<StagedOptions> {
    let source_root = Path::new(&module.root_folder_path);
    if !source_root.is_dir() {
        return Err(CoreError::Staging(format!(
            "root folder {:?} does not exist or is not a directory",
            source_root
        )));
    }
    let module_rel = checked_module_path(&module.module_path)?;

    let source_module = source_root.join(&module_rel);
    if !source_module.is_dir() {
        return Err(CoreError::Staging(format!(
            "module path {:?} does not exist",
            source_module
        )));
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("tfprobe-");
    let temp_dir = match &options.temp_root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(|e| CoreError::Staging(format!("cannot create temp directory: {}", e)))?;

    let canonical_root = source_root
        .canonicalize()
        .map_err(|e| CoreError::Staging(format!("cannot resolve {:?}: {}", source_root, e)))?;
    let root_name = canonical_root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "root".into());
    let staging_root = temp_dir.path().join(root_name);

    let copied = copy_tree(&canonical_root, &staging_root, options.copy_lock_file)?;
    let working_dir = staging_root.join(&module_rel);

    if !has_terraform_files(&working_dir)? {
        return Err(CoreError::Staging(format!(
            "no terraform files found in {:?}",
            source_module
        )));
    }

    info!(
        "Staged {} ({} files) to {:?}",
        module.label(),
        copied,
        working_dir
    );

    let temp_dir = if options.keep {
        info!("Keeping staged copy at {:?}", temp_dir.path());
        let _ = temp_dir.into_path();
        None
    } else {
        Some(temp_dir)
    };

    Ok(StagedOptions {
        working_dir,
        variables: module.variables.clone(),
        backend_config: module.backend_config.clone(),
        env: module.env.clone(),
        staging_root,
        _temp_dir: temp_dir,
    })
}

/// Reject absolute module paths and paths that climb out of the root.
fn checked_module_path(module_path: &str) -> CoreResult<PathBuf> {
    let path = Path::new(module_path);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(CoreError::Staging(format!(
                        "module path {:?} escapes the root folder",
                        module_path
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::Staging(format!(
                    "module path {:?} must be relative to the root folder",
                    module_path
                )));
            }
        }
    }
    Ok(normalized)
}

/// Whether a path relative to the root is left out of the staged copy.
fn is_excluded(relative: &Path, is_dir: bool, copy_lock_file: bool) -> bool {
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        let name = component.as_os_str().to_string_lossy();
        let is_last = components.peek().is_none();

        if name == ".terraform" {
            return true;
        }
        if is_last && !is_dir {
            if name.ends_with(".tfstate") || name.ends_with(".tfstate.backup") {
                return true;
            }
            if name == TERRAFORM_VERSION_FILE {
                return false;
            }
            if name == LOCK_FILE {
                return !copy_lock_file;
            }
        }
        if name.starts_with('.') {
            return true;
        }
    }
    false
}

fn copy_tree(source: &Path, dest: &Path, copy_lock_file: bool) -> CoreResult<usize> {
    fs::create_dir_all(dest)?;
    let mut copied = 0;

    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            relative.as_os_str().is_empty()
                || !is_excluded(relative, entry.file_type().is_dir(), copy_lock_file)
        });

    for entry in walker {
        let entry = entry.map_err(|e| CoreError::Staging(format!("cannot read source tree: {}", e)))?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() && entry.path().is_dir() {
            debug!("Skipping directory symlink {:?}", entry.path());
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn has_terraform_files(dir: &Path) -> CoreResult<bool> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    for suffix in ["*.tf", "*.tf.json"] {
        let pattern = format!("{}/{}", escaped, suffix);
        let mut matches = glob::glob(&pattern)
            .map_err(|e| CoreError::Staging(format!("invalid pattern {}: {}", pattern, e)))?;
        if matches.any(|m| m.map(|p| p.is_file()).unwrap_or(false)) {
            return Ok(true);
        }
    }
    Ok(false)
}
