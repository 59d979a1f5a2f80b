//! FileWalker — yields `{path, content, size, lastModified}` for a source tree.
//!
//! Built on the `ignore` crate so `.gitignore` is always respected; a second,
//! project-specific ignore file (`.searchgrepignore`) is registered alongside
//! it via `add_custom_ignore_filename`, so the two apply as a union rather
//! than one overriding the other.

use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{Result, SearchgrepError};

pub const SEARCHGREPIGNORE: &str = ".searchgrepignore";

#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Repo-relative, POSIX-normalized.
    pub path: String,
    pub content: String,
    pub size: u64,
    pub last_modified: i64,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub root: PathBuf,
    pub max_file_size: u64,
    pub max_file_count: usize,
}

fn build_overrides(root: &Path) -> Result<Override> {
    let mut ob = OverrideBuilder::new(root);
    for pattern in [
        "**/*.lock",
        "**/package-lock.json",
        "**/pnpm-lock.yaml",
        "**/yarn.lock",
        "**/Cargo.lock",
    ] {
        ob.add(pattern)
            .map_err(|e| SearchgrepError::WatcherFailure(e.into()))?;
    }
    for dir in [
        ".git",
        "node_modules",
        "target",
        "dist",
        "build",
        "out",
        "coverage",
        ".next",
        ".nuxt",
    ] {
        ob.add(&format!("**/{dir}"))
            .map_err(|e| SearchgrepError::WatcherFailure(e.into()))?;
        ob.add(&format!("**/{dir}/**"))
            .map_err(|e| SearchgrepError::WatcherFailure(e.into()))?;
    }
    ob.build().map_err(|e| SearchgrepError::WatcherFailure(e.into()))
}

fn is_binary(bytes: &[u8]) -> bool {
    let probe = &bytes[..bytes.len().min(8 * 1024)];
    probe.contains(&0u8)
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `opts.root`, reading every non-ignored, non-binary file up to the
/// configured size/count bounds. Oversized files are skipped with a
/// diagnostic rather than aborting the walk.
pub fn walk(opts: &WalkOptions) -> Result<Vec<FileEntry>> {
    let overrides = build_overrides(&opts.root)?;
    let walker = WalkBuilder::new(&opts.root)
        .standard_filters(true)
        .hidden(true)
        .add_custom_ignore_filename(SEARCHGREPIGNORE)
        .overrides(overrides)
        .build();

    let mut entries = Vec::new();

    for item in walker {
        if entries.len() >= opts.max_file_count {
            crate::debug_log!(
                "[scanner] maxFileCount ({}) reached, truncating walk",
                opts.max_file_count
            );
            break;
        }

        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.path();
        let meta = match std::fs::metadata(abs_path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let size = meta.len();
        if size > opts.max_file_size {
            crate::debug_log!(
                "[scanner] skipping {} ({} bytes > maxFileSize)",
                abs_path.display(),
                size
            );
            continue;
        }

        let bytes = match std::fs::read(abs_path) {
            Ok(b) => b,
            Err(_) => continue,
        };
        if is_binary(&bytes) {
            continue;
        }

        let rel_path = match abs_path.strip_prefix(&opts.root) {
            Ok(p) => p,
            Err(_) => continue,
        };

        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        entries.push(FileEntry {
            path: to_posix(rel_path),
            content: String::from_utf8_lossy(&bytes).into_owned(),
            size,
            last_modified,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(root: &Path) -> WalkOptions {
        WalkOptions {
            root: root.to_path_buf(),
            max_file_size: 10 * 1024 * 1024,
            max_file_count: 10_000,
        }
    }

    #[test]
    fn skips_dotfiles_and_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "1").unwrap();
        std::fs::write(dir.path().join(".hidden"), "secret").unwrap();

        let entries = walk(&opts(dir.path())).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["main.rs"]);
    }

    #[test]
    fn honors_searchgrepignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SEARCHGREPIGNORE), "generated.rs\n").unwrap();
        std::fs::write(dir.path().join("generated.rs"), "// generated\n").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();

        let entries = walk(&opts(dir.path())).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["main.rs"]);
    }

    #[test]
    fn skips_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();
        let mut small_opts = opts(dir.path());
        small_opts.max_file_size = 10;

        let entries = walk(&small_opts).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn skips_binary_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 0, 3]).unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();

        let entries = walk(&opts(dir.path())).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["main.rs"]);
    }
}
