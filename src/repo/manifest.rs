//! Structural manifest of an indexed repository: the directory tree plus
//! per-file symbol lists extracted with line-anchored regexes.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::ingest::SourceFile;

static PY_FUNC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());
static PY_CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static RS_FN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});
static RS_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoManifest {
    pub files: Vec<FileEntry>,
    /// Directory ("." for the root) → file names within it.
    pub structure: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Build the manifest from the walked source files.
pub fn build_manifest(files: &[SourceFile]) -> RepoManifest {
    let mut manifest = RepoManifest::default();

    for file in files {
        let (dir, name) = match file.path.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (".".to_string(), file.path.clone()),
        };
        manifest.structure.entry(dir).or_default().push(name);

        let (functions, classes) = extract_symbols(&file.path, &file.content);
        manifest.files.push(FileEntry {
            path: file.path.clone(),
            functions,
            classes,
        });
    }

    manifest
}

fn extract_symbols(path: &str, content: &str) -> (Vec<String>, Vec<String>) {
    let capture_all = |re: &Regex| -> Vec<String> {
        re.captures_iter(content)
            .map(|c| c[1].to_string())
            .collect()
    };

    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("py") => (capture_all(&PY_FUNC_RE), capture_all(&PY_CLASS_RE)),
        Some("rs") => (capture_all(&RS_FN_RE), capture_all(&RS_TYPE_RE)),
        _ => (Vec::new(), Vec::new()),
    }
}

impl RepoManifest {
    /// Human-readable folder rendering used for structural chat answers.
    pub fn render_structure(&self) -> String {
        let mut lines = Vec::new();
        for (folder, files) in &self.structure {
            if folder.starts_with(".git") {
                continue;
            }
            let folder_name = if folder == "." { "repo" } else { folder };
            lines.push(format!("{}/", folder_name));
            for file in files {
                lines.push(format!("  ├─ {}", file));
            }
        }
        lines.join("\n")
    }

    /// Flat `{path, type}` listing for the tree endpoint, `.git` excluded.
    pub fn tree_entries(&self) -> Vec<TreeEntry> {
        let mut tree = Vec::new();
        for (folder, files) in &self.structure {
            if folder.starts_with(".git") {
                continue;
            }
            let prefix = if folder == "." {
                String::new()
            } else {
                format!("{}/", folder)
            };
            if !prefix.is_empty() {
                tree.push(TreeEntry {
                    path: prefix.clone(),
                    kind: "dir",
                });
            }
            for file in files {
                if file.starts_with(".git") {
                    continue;
                }
                tree.push(TreeEntry {
                    path: format!("{}{}", prefix, file),
                    kind: "file",
                });
            }
        }
        tree
    }
}
