//! GitResolver: an opaque collaborator (out of scope per §1) that best-effort
//! enriches ingest and registry output with Git metadata. Every lookup
//! degrades to `None` rather than failing the caller — a source root that
//! isn't a Git checkout, or a `git` binary that isn't on `PATH`, is a normal
//! outcome, not an error.

use std::path::Path;
use std::process::Command;

/// Repository-level info surfaced in `IndexInfo.git` (§4.10).
#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub web_url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Last commit timestamp (Unix epoch seconds) touching `file_path`, relative
/// to `repo_dir`. `None` if the path has no history or isn't under Git.
pub fn file_last_commit_time(repo_dir: &Path, file_path: &Path) -> Option<i64> {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%ct", "--"])
        .arg(file_path)
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse::<i64>().ok()
}

pub fn repo_info(repo_dir: &Path) -> Option<RepoInfo> {
    let branch = current_branch(repo_dir);
    let commit = head_sha(repo_dir);
    let web_url = commit.as_deref().and_then(|sha| remote_web_url(repo_dir, sha));
    if branch.is_none() && commit.is_none() && web_url.is_none() {
        return None;
    }
    Some(RepoInfo { web_url, branch, commit })
}

fn current_branch(repo_dir: &Path) -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "--abbrev-ref", "HEAD"]).current_dir(repo_dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch)
    }
}

fn head_sha(repo_dir: &Path) -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).current_dir(repo_dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        None
    } else {
        Some(sha)
    }
}

fn remote_web_url(repo_dir: &Path, sha: &str) -> Option<String> {
    let output = Command::new("git").args(["remote", "get-url", "origin"]).current_dir(repo_dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let remote = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if remote.is_empty() {
        return None;
    }
    Some(build_web_url(&remote, sha))
}

/// Normalizes SSH and HTTPS remote forms into a browsable commit URL.
fn build_web_url(remote_url: &str, sha: &str) -> String {
    let normalized = remote_url.trim_end_matches(".git");
    let normalized = if let Some(rest) = normalized.strip_prefix("git@") {
        rest.replacen(':', "/", 1)
    } else {
        normalized.trim_start_matches("https://").trim_start_matches("http://").to_string()
    };
    format!("https://{normalized}/commit/{sha}")
}
