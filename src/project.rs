/// Project folders and the project file walk used by `/codebase` and `/add-folder`.
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

use crate::conversation::ConversationStore;

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects_dir: PathBuf,
}

impl ProjectRegistry {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.projects_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.dir(name).is_dir()
    }

    /// Project names, sorted. Creates the projects directory on first use.
    pub fn list(&self) -> Result<Vec<String>> {
        fs::create_dir_all(&self.projects_dir)
            .with_context(|| format!("Failed to create {}", self.projects_dir.display()))?;
        let entries = fs::read_dir(&self.projects_dir)
            .with_context(|| format!("Failed to read {}", self.projects_dir.display()))?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn create(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let dir = self.dir(name);
        if dir.exists() {
            bail!("Project '{name}' already exists");
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create project directory {}", dir.display()))?;
        tracing::info!(project = name, dir = %dir.display(), "project created");
        Ok(dir)
    }

    /// Directory of `name`, creating the project on first use.
    pub fn ensure(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        if self.exists(name) {
            return Ok(self.dir(name));
        }
        self.create(name)
    }

    /// Remove the project folder and every chat stored for it.
    pub fn delete(&self, name: &str, store: &ConversationStore) -> Result<()> {
        validate_name(name)?;
        let dir = self.dir(name);
        if !dir.is_dir() {
            bail!("Project '{name}' not found");
        }
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete project directory {}", dir.display()))?;
        store
            .purge_project(name)
            .with_context(|| format!("Failed to delete chat history of '{name}'"))?;
        tracing::info!(project = name, "project deleted");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        bail!("Invalid project name '{name}'");
    }
    Ok(())
}

// ── File walk ─────────────────────────────────────────────────────────────────

static IGNORED_DIRS: &[&str] = &[
    "__pycache__",
    "venv",
    "env",
    "node_modules",
    "build",
    "dist",
    "site-packages",
    "egg-info",
    "coverage",
    "htmlcov",
    "vendor",
    "bower_components",
    "jspm_packages",
    "lib",
    "libs",
    "bin",
    "obj",
    "target",
    "out",
];

/// Extensions whose files are embedded as text.
static TEXT_EXTENSIONS: &[&str] = &[
    "txt", "py", "js", "html", "css", "json", "md", "yml", "yaml", "xml", "csv", "ini", "conf",
    "sh", "bat", "ps1", "env", "gitignore", "sql", "java", "cpp", "c", "h", "hpp", "ts", "jsx",
    "tsx", "vue", "php", "rb", "pl", "go", "rs", "toml",
];

pub fn is_text_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Every non-hidden file under `start`, as sorted `/`-separated paths relative
/// to `root`. Hidden and noise directories are not entered.
pub fn walk_files(root: &Path, start: &Path) -> Vec<String> {
    let mut out = Vec::new();
    walk(root, start, &mut out);
    out.sort();
    out
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let Ok(kind) = entry.file_type() else { continue };
        if kind.is_dir() {
            if !IGNORED_DIRS.contains(&name.as_ref()) {
                walk(root, &path, out);
            }
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(relative_display(rel));
        }
    }
}

fn relative_display(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Text files among `files` with their contents; unreadable ones are returned
/// separately with the reason.
pub fn read_text_files(root: &Path, files: &[String]) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let mut read = Vec::new();
    let mut failed = Vec::new();
    for file in files.iter().filter(|f| is_text_file(f)) {
        match fs::read_to_string(root.join(file)) {
            Ok(content) => read.push((file.clone(), content)),
            Err(e) => failed.push((file.clone(), e.to_string())),
        }
    }
    (read, failed)
}
