//! Walks configured sources and yields candidate files with metadata (§4.1).
//!
//! Glob filters are applied relative to each source root; ignore rules are
//! layered explicit `ignore` > `ignore_preset` > `.gitignore`, matching git's
//! own precedence. Binary files are detected by sampling the first 8KiB and
//! skipped silently; symlink cycles are broken with a `(device, inode)` set.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::Result;
use crate::models::{ScannedFile, Source};

/// Built-in ignore lists for common languages, selected via `ignore_preset`.
fn preset_patterns(preset: &str) -> &'static [&'static str] {
    match preset {
        "rust" => &["target/**", "**/*.rs.bk", "Cargo.lock"],
        "node" => &["node_modules/**", "dist/**", "**/*.log"],
        "python" => &["__pycache__/**", "*.pyc", ".venv/**", "venv/**"],
        _ => &[],
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub visited: u64,
    pub skipped_binary: u64,
    pub skipped_ignored: u64,
    pub errors: u64,
}

/// Scans every configured `Source` and returns a deduplicated, ordered list
/// of candidate files plus aggregate stats for the whole call.
pub fn scan(sources: &[Source]) -> Result<(Vec<ScannedFile>, ScanStats)> {
    let mut out = Vec::new();
    let mut stats = ScanStats::default();
    let mut seen_abs = HashSet::new();

    for source in sources {
        scan_one(source, &mut out, &mut stats, &mut seen_abs)?;
    }

    out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    tracing::info!(
        visited = stats.visited,
        skipped_binary = stats.skipped_binary,
        skipped_ignored = stats.skipped_ignored,
        errors = stats.errors,
        "scan complete"
    );
    Ok((out, stats))
}

fn scan_one(
    source: &Source,
    out: &mut Vec<ScannedFile>,
    stats: &mut ScanStats,
    seen_abs: &mut HashSet<(u64, u64)>,
) -> Result<()> {
    let root = &source.path;
    if !root.exists() {
        stats.errors += 1;
        return Ok(());
    }

    let include = build_globset(&source.glob)?;
    let ignore = build_ignore_set(source, root)?;

    let mut it = WalkDir::new(root).follow_links(true).into_iter();
    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => {
                stats.errors += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            // A symlinked directory that re-enters an ancestor would make
            // `follow_links(true)` recurse without bound; walkdir has no
            // built-in protection for that, so cycles are broken here by
            // (device, inode), same as for files below.
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => {
                    stats.errors += 1;
                    continue;
                }
            };
            if !seen_abs.insert((meta.dev(), meta.ino())) {
                it.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => {
                stats.errors += 1;
                continue;
            }
        };
        let inode_key = (meta.dev(), meta.ino());
        if !seen_abs.insert(inode_key) {
            continue; // symlink cycle or duplicate hardlink target
        }

        let abs_path = entry.path().to_path_buf();
        let relative_path = match abs_path.strip_prefix(root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };

        stats.visited += 1;

        if !include.is_empty() && !include.is_match(&relative_path) {
            stats.skipped_ignored += 1;
            continue;
        }
        if ignore.is_match(&relative_path) {
            stats.skipped_ignored += 1;
            continue;
        }

        if is_binary(&abs_path) {
            stats.skipped_binary += 1;
            continue;
        }

        out.push(ScannedFile {
            relative_path,
            absolute_path: abs_path,
            type_: source.type_.clone(),
            mtime: meta.mtime(),
            size: meta.size(),
        });
    }

    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        if let Ok(g) = Glob::new(p) {
            builder.add(g);
        }
    }
    Ok(builder.build().unwrap_or_else(|_| GlobSet::empty()))
}

/// Explicit `ignore` patterns take precedence over `ignore_preset`, which
/// takes precedence over `.gitignore` — but all three are merged into one
/// matcher since each is sufficient on its own to exclude a path.
fn build_ignore_set(source: &Source, root: &Path) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    for p in &source.ignore {
        if let Ok(g) = Glob::new(p) {
            builder.add(g);
        }
    }
    if let Some(preset) = &source.ignore_preset {
        for p in preset_patterns(preset) {
            if let Ok(g) = Glob::new(p) {
                builder.add(g);
            }
        }
    }
    if source.use_gitignore {
        let gitignore_path = root.join(".gitignore");
        if let Ok(content) = std::fs::read_to_string(&gitignore_path) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let pattern = if line.ends_with('/') {
                    format!("{line}**")
                } else {
                    line.to_string()
                };
                if let Ok(g) = Glob::new(&pattern) {
                    builder.add(g);
                }
                // also match the bare filename anywhere in the tree
                if let Ok(g) = Glob::new(&format!("**/{pattern}")) {
                    builder.add(g);
                }
            }
        }
    }

    Ok(builder.build().unwrap_or_else(|_| GlobSet::empty()))
}

/// Reads the first 8KiB; binary iff any NUL byte appears or invalid UTF-8
/// exceeds a 1% tolerance (§4.1).
fn is_binary(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return true,
    };
    let mut buf = [0u8; 8192];
    let n = match file.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return true,
    };
    let sample = &buf[..n];
    if sample.contains(&0) {
        return true;
    }
    if n == 0 {
        return false;
    }

    // Counts actual invalid bytes (via `error_len`, or the remainder when an
    // incomplete sequence is cut off at the sample boundary), not one per
    // decode-error event, so a multi-byte bad sequence weighs proportionally
    // against the 1% tolerance (§4.1).
    let mut invalid = 0usize;
    let mut rest = sample;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(_) => break,
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                let bad_len = e.error_len().unwrap_or(rest.len() - valid_up_to);
                invalid += bad_len;
                rest = &rest[valid_up_to + bad_len..];
            }
        }
    }
    (invalid as f64 / n as f64) > 0.01
}
