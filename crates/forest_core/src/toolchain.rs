//! C toolchain driver
//!
//! Compiles generated translation units into a shared library: one object per
//! unit, compiled concurrently, then a single link step.

use crate::codegen::GeneratedSources;
use crate::errors::{ForestError, Result};
use crate::native::shared_library_name;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable; `$CC` and then `cc` when unset
    pub compiler: Option<String>,
    /// Passed as `-O<n>`
    pub opt_level: u8,
    /// Appended to every compile invocation
    pub extra_flags: Vec<String>,
    /// Library stem, `forest` gives `libforest.so`
    pub library_name: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: None,
            opt_level: 2,
            extra_flags: Vec::new(),
            library_name: "forest".to_string(),
        }
    }
}

impl ToolchainConfig {
    pub fn resolve_compiler(&self) -> String {
        self.compiler
            .clone()
            .or_else(|| std::env::var("CC").ok().filter(|cc| !cc.trim().is_empty()))
            .unwrap_or_else(|| "cc".to_string())
    }

    pub fn library_file(&self) -> String {
        shared_library_name(&self.library_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.opt_level > 3 {
            return Err(ForestError::InvalidConfig(format!(
                "opt_level must be between 0 and 3, got {}",
                self.opt_level
            )));
        }
        if self.library_name.is_empty()
            || !self
                .library_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ForestError::InvalidConfig(format!(
                "library name `{}` must be non-empty and contain only [A-Za-z0-9_-]",
                self.library_name
            )));
        }
        Ok(())
    }

    /// Whether the configured compiler can be executed at all
    pub fn compiler_available(&self) -> bool {
        Command::new(self.resolve_compiler())
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

fn run(command: &mut Command, what: &str) -> Result<()> {
    debug!("Running {:?}", command);
    let Output { status, stderr, .. } = command
        .output()
        .map_err(|e| ForestError::Toolchain(format!("failed to invoke compiler for {what}: {e}")))?;

    if !status.success() {
        return Err(ForestError::Toolchain(format!(
            "{what} failed with exit code {:?}: {}",
            status.code(),
            String::from_utf8_lossy(&stderr).trim()
        )));
    }
    Ok(())
}

fn object_path(out_dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unit".to_string());
    out_dir.join(format!("{stem}.o"))
}

/// Compile and link `sources` into a shared library inside `out_dir`.
pub fn build_shared_library<P: AsRef<Path>>(
    sources: &GeneratedSources,
    out_dir: P,
    config: &ToolchainConfig,
) -> Result<PathBuf> {
    if cfg!(target_os = "windows") {
        return Err(ForestError::Toolchain(
            "building shared libraries is not supported on Windows".to_string(),
        ));
    }
    config.validate()?;

    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir)?;
    let compiler = config.resolve_compiler();
    let opt = format!("-O{}", config.opt_level);

    let units: Vec<&Path> = sources.translation_units().collect();
    let objects = units
        .par_iter()
        .map(|source| {
            let object = object_path(out_dir, source);
            let mut command = Command::new(&compiler);
            command
                .args(["-c", opt.as_str(), "-fPIC", "-fvisibility=hidden"])
                .arg("-I")
                .arg(&sources.dir)
                .args(&config.extra_flags)
                .arg("-o")
                .arg(&object)
                .arg(source);
            run(&mut command, &format!("compiling {}", source.display()))?;
            Ok(object)
        })
        .collect::<Result<Vec<_>>>()?;

    let library = out_dir.join(config.library_file());
    let mut link = Command::new(&compiler);
    if cfg!(target_os = "macos") {
        link.arg("-dynamiclib");
    } else {
        link.arg("-shared");
    }
    link.arg("-o").arg(&library).args(&objects);
    run(&mut link, "linking")?;

    info!(
        "Built {} from {} translation units with {}",
        library.display(),
        objects.len(),
        compiler
    );
    Ok(library)
}
