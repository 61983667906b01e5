//! Wiring check: is every newly added source file referenced somewhere?
//!
//! Name-based only. A file counts as wired when another source file contains
//! an import/require/export-from whose module specifier ends in the new
//! file's base name. This can both miss and over-report.

use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::config::IntegrationConfig;
use crate::domain::WiringResult;
use crate::error::{GateError, Result};
use crate::paths::{base_name, extension, is_barrel_path, is_config_path, is_test_path};

pub const NO_NEW_FILES_WARNING: &str = "No new code files detected";

/// New files that must be referenced from elsewhere.
pub fn wiring_candidates(new_files: &[String], config: &IntegrationConfig) -> Vec<String> {
    new_files
        .iter()
        .filter(|f| {
            extension(f).is_some_and(|ext| config.source_extensions.iter().any(|e| e == ext))
        })
        .filter(|f| !is_test_path(f) && !is_config_path(f) && !is_barrel_path(f))
        .cloned()
        .collect()
}

fn reference_pattern(base: &str) -> Result<Regex> {
    let pattern = format!(
        r#"(?:\bimport\b|\brequire\s*\(|\bfrom\b|\bexport\b)[^\n]*['"](?:[^'"\n]*/)?{}(?:\.[A-Za-z]+)?['"]"#,
        regex::escape(base)
    );
    Regex::new(&pattern).map_err(|e| GateError::InvalidConfig(e.to_string()))
}

fn is_ignored(path: &Path, root: &Path, config: &IntegrationConfig) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| {
            let part = c.as_os_str().to_string_lossy();
            config.ignored_dirs.iter().any(|d| *d == part)
        })
}

/// Source files under `root`, as (relative path, contents).
fn source_tree(root: &Path, config: &IntegrationConfig) -> Vec<(String, String)> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_ignored(e.path(), root, config))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap_or(e.path())
                .to_string_lossy()
                .replace('\\', "/");
            let is_source = extension(&rel)
                .is_some_and(|ext| config.source_extensions.iter().any(|s| s == ext));
            if !is_source {
                return None;
            }
            std::fs::read_to_string(e.path()).ok().map(|src| (rel, src))
        })
        .collect()
}

/// Blocking scan of `root` for references to each candidate.
pub fn scan_references(
    root: &Path,
    candidates: &[String],
    config: &IntegrationConfig,
) -> Result<WiringResult> {
    if candidates.is_empty() {
        return Ok(WiringResult {
            passed: true,
            warnings: vec![NO_NEW_FILES_WARNING.to_string()],
            ..WiringResult::default()
        });
    }

    let tree = source_tree(root, config);
    let mut result = WiringResult::default();

    for candidate in candidates {
        let re = reference_pattern(base_name(candidate))?;
        let referenced = tree
            .iter()
            .any(|(path, src)| path != candidate && re.is_match(src));
        if referenced {
            result.wired_files.push(candidate.clone());
        } else {
            result
                .warnings
                .push(format!("{candidate} is not imported by any other file"));
            result.unwired_files.push(candidate.clone());
        }
    }

    result.passed = result.unwired_files.is_empty();
    Ok(result)
}

/// Run [`scan_references`] on the blocking pool.
pub async fn verify_wiring(
    root: PathBuf,
    new_files: Vec<String>,
    config: IntegrationConfig,
) -> Result<WiringResult> {
    let candidates = wiring_candidates(&new_files, &config);
    tokio::task::spawn_blocking(move || scan_references(&root, &candidates, &config))
        .await
        .map_err(|e| GateError::Io(std::io::Error::other(e.to_string())))?
}
