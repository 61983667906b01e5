//! File path heuristics shared by the TDD classifier and the wiring check.
//!
//! These are name-based on purpose; nothing here reads file contents.

use std::path::Path;

/// Extensions counted as source code by the TDD classifier.
pub const CODE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "vue", "svelte", "py", "go", "rs", "java", "kt", "rb",
    "php", "cs", "swift",
];

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn extension(path: &str) -> Option<&str> {
    Path::new(path).extension().and_then(|e| e.to_str())
}

pub fn has_code_extension(path: &str) -> bool {
    extension(path).is_some_and(|ext| CODE_EXTENSIONS.contains(&ext))
}

/// Test file by naming convention or directory.
pub fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let name = file_name(&normalized);

    name.contains(".test.")
        || name.contains(".spec.")
        || (name.starts_with("test_") && name.ends_with(".py"))
        || name.ends_with("_test.py")
        || name.ends_with("_test.go")
        || normalized.contains("__tests__/")
        || normalized.starts_with("tests/")
        || normalized.starts_with("test/")
        || normalized.contains("/tests/")
        || normalized.contains("/test/")
}

/// Tool configuration (`vite.config.ts`, `.eslintrc.js`, type declarations).
pub fn is_config_path(path: &str) -> bool {
    let name = file_name(path);
    name.contains(".config.")
        || (name.starts_with('.') && name.contains("rc."))
        || name.ends_with(".d.ts")
}

/// Barrel or entry-point file that is wired by convention.
pub fn is_barrel_path(path: &str) -> bool {
    let name = file_name(path);
    name.starts_with("index.") || name.starts_with("main.") || name == "mod.rs" || name == "lib.rs"
}

/// File stem used to look for references (`src/auth/login.service.ts` -> `login.service`).
pub fn base_name(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
