//! Repository ingest: cloning and walking source trees.

use std::path::Path;

use anyhow::Context;
use walkdir::WalkDir;

/// File types pulled into the index.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "py", "md", "txt", "rs", "js", "ts", "go", "toml", "json", "yaml", "yml",
];

/// Files above this size are skipped.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// A text file extracted from a repository checkout.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the repository root.
    pub path: String,
    pub content: String,
}

/// Clone a repository into `dest`, replacing any previous checkout so that a
/// rebuild always reflects the current remote state.
pub fn clone_repo(url: &str, dest: &Path) -> anyhow::Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!("Cloning {} into {}", redact_url(url), dest.display());
    git2::Repository::clone(url, dest)
        .with_context(|| format!("Failed to clone {}", redact_url(url)))?;
    Ok(())
}

/// Inject a per-repository token into an https clone URL. The resulting URL
/// must never be logged verbatim.
pub fn authenticated_url(repo_url: &str, token: &str) -> String {
    repo_url.replacen("https://", &format!("https://{}@", token), 1)
}

/// Strip userinfo from a URL before it reaches a log line.
fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if !parsed.username().is_empty() => {
            let _ = parsed.set_username("***");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// Walk all indexable text files under `root`, sorted by path.
pub fn read_repo_files(root: &Path) -> Vec<SourceFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        // depth 0 is the checkout root itself, whatever it is named
        .filter_entry(|e| e.depth() == 0 || !is_hidden_or_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_indexable_file(path) {
            continue;
        }

        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() > MAX_FILE_BYTES {
                continue;
            }
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        // Skip files that can't be read as UTF-8.
        if let Ok(content) = std::fs::read_to_string(path) {
            files.push(SourceFile {
                path: relative,
                content,
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn is_hidden_or_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') && name.len() > 1 {
        return true;
    }
    matches!(
        name.as_ref(),
        "node_modules" | "target" | "dist" | "build" | "__pycache__" | "vendor" | "venv"
    )
}

fn is_indexable_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
