//! Best-effort project snapshot fed into every agent prompt.
//!
//! The scanner recognises languages by extension and pulls class and method
//! names out with regexes. It is meant to give the model a map of the code,
//! not to be right about every declaration.

use crate::mutation::editor::matching_brace;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Files larger than this are listed but not read.
const MAX_SOURCE_BYTES: u64 = 1024 * 1024;

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".devloop",
    ".idea",
    ".vs",
    ".vscode",
    "node_modules",
    "target",
    "bin",
    "obj",
    "Library",
    "Temp",
    "dist",
    "__pycache__",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Braced,
    Python,
    Rust,
    Go,
}

const LANGUAGES: &[(&str, &[&str], Family)] = &[
    ("C#", &["cs"], Family::Braced),
    ("Java", &["java"], Family::Braced),
    ("TypeScript", &["ts", "tsx"], Family::Braced),
    ("JavaScript", &["js", "jsx"], Family::Braced),
    ("C++", &["cpp", "hpp", "cc"], Family::Braced),
    ("C", &["c", "h"], Family::Braced),
    ("PHP", &["php"], Family::Braced),
    ("Swift", &["swift"], Family::Braced),
    ("Kotlin", &["kt"], Family::Braced),
    ("Dart", &["dart"], Family::Braced),
    ("Python", &["py"], Family::Python),
    ("Rust", &["rs"], Family::Rust),
    ("Go", &["go"], Family::Go),
];

static CLASS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:class|struct|interface)\s+([A-Za-z_]\w*)").ok());
static BRACED_METHOD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?:public|private|protected|internal|static|virtual|override|abstract|sealed|async|final|export|function)\s+)*(?:[\w<>\[\],.?]+\s+)?([A-Za-z_]\w*)\s*\([^;{}()]*\)\s*(?::\s*[\w<>\[\],.? |]+\s*)?\{").ok()
});
static PY_CLASS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^class\s+([A-Za-z_]\w*)").ok());
static PY_DEF_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_]\w*)").ok());
static RUST_FN_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\bfn\s+([A-Za-z_]\w*)").ok());
static GO_FUNC_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)").ok());
static IMPORT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:using|import|from|use|#include)\s+[^\n;]+").ok());

/// Keywords that the braced method regex also catches.
const NOT_METHODS: &[&str] = &["if", "for", "foreach", "while", "switch", "catch", "using", "lock", "return", "else", "new"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub package_manager: Option<String>,
    /// Paths relative to the project root, `/`-separated.
    pub files: Vec<String>,
    pub classes: Vec<String>,
    pub methods: Vec<String>,
    pub imports: Vec<String>,
    /// `Class:Method` pairs.
    pub files_with_methods: Vec<String>,
}

impl ProjectSnapshot {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Summary object handed to prompts as `ProjectInfo`.
    pub fn info(&self) -> BTreeMap<&'static str, Vec<String>> {
        let mut info = BTreeMap::new();
        info.insert("languages", self.languages.clone());
        info.insert("frameworks", self.frameworks.clone());
        info.insert(
            "packageManager",
            self.package_manager.iter().cloned().collect(),
        );
        info
    }

    pub fn info_json(&self) -> String {
        serde_json::to_string(&self.info()).unwrap_or_default()
    }
}

pub trait ProjectScanner: Send + Sync {
    fn scan(&self, root: &Path) -> Result<ProjectSnapshot>;
}

/// [`ProjectScanner`] over the file tree with regex extraction.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceScanner;

impl SourceScanner {
    pub fn new() -> Self {
        Self
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        entry.depth() > 0 && SKIPPED_DIRS.contains(&name.as_ref())
    } else {
        name.ends_with(".bak")
    }
}

fn language_for(path: &Path) -> Option<(&'static str, Family)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(_, exts, _)| exts.contains(&ext.as_str()))
        .map(|(name, _, family)| (*name, *family))
}

#[derive(Default)]
struct Collected {
    languages: BTreeSet<String>,
    classes: BTreeSet<String>,
    methods: BTreeSet<String>,
    imports: BTreeSet<String>,
    pairs: BTreeSet<String>,
}

impl ProjectScanner for SourceScanner {
    fn scan(&self, root: &Path) -> Result<ProjectSnapshot> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Project directory not readable: {}", root.display()))?;

        let mut files = Vec::new();
        let mut collected = Collected::default();
        for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            files.push(rel.to_string_lossy().replace('\\', "/"));

            let Some((language, family)) = language_for(path) else {
                continue;
            };
            collected.languages.insert(language.to_string());
            if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_SOURCE_BYTES {
                continue;
            }
            match std::fs::read_to_string(path) {
                Ok(source) => extract(&source, family, &mut collected),
                Err(e) => debug!(file = %path.display(), error = %e, "skipping unreadable source"),
            }
        }

        let snapshot = ProjectSnapshot {
            languages: collected.languages.into_iter().collect(),
            frameworks: detect_frameworks(&root),
            package_manager: detect_package_manager(&root),
            files,
            classes: collected.classes.into_iter().collect(),
            methods: collected.methods.into_iter().collect(),
            imports: collected.imports.into_iter().collect(),
            files_with_methods: collected.pairs.into_iter().collect(),
        };
        info!(
            files = snapshot.files.len(),
            classes = snapshot.classes.len(),
            methods = snapshot.methods.len(),
            "project scanned"
        );
        Ok(snapshot)
    }
}

fn extract(source: &str, family: Family, out: &mut Collected) {
    if let Some(re) = IMPORT_RE.as_ref() {
        for m in re.find_iter(source) {
            out.imports.insert(m.as_str().trim().to_string());
        }
    }
    match family {
        Family::Braced => extract_braced(source, out),
        Family::Python => extract_python(source, out),
        Family::Rust => extract_names(source, &RUST_FN_RE, out),
        Family::Go => extract_names(source, &GO_FUNC_RE, out),
    }
}

fn extract_braced(source: &str, out: &mut Collected) {
    let (Some(class_re), Some(method_re)) = (CLASS_RE.as_ref(), BRACED_METHOD_RE.as_ref()) else {
        return;
    };

    // Class spans, so each method can be credited to its innermost class.
    let mut spans = Vec::new();
    for caps in class_re.captures_iter(source) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.classes.insert(name.as_str().to_string());
        let Some(open_rel) = source[whole.end()..].find(['{', ';']) else {
            continue;
        };
        let open = whole.end() + open_rel;
        if source.as_bytes()[open] != b'{' {
            continue;
        }
        if let Some(close) = matching_brace(source, open) {
            spans.push((open, close, name.as_str().to_string()));
        }
    }

    for caps in method_re.captures_iter(source) {
        let Some(name) = caps.get(1) else {
            continue;
        };
        let method = name.as_str();
        if NOT_METHODS.contains(&method) || out.classes.contains(method) {
            continue;
        }
        out.methods.insert(method.to_string());
        let at = name.start();
        if let Some((_, _, class)) = spans
            .iter()
            .filter(|(open, close, _)| *open < at && at < *close)
            .min_by_key(|(open, close, _)| close - open)
        {
            out.pairs.insert(format!("{}:{}", class, method));
        }
    }
}

fn extract_python(source: &str, out: &mut Collected) {
    let (Some(class_re), Some(def_re)) = (PY_CLASS_RE.as_ref(), PY_DEF_RE.as_ref()) else {
        return;
    };
    let mut current: Option<String> = None;
    for line in source.lines() {
        if let Some(caps) = class_re.captures(line) {
            let name = caps[1].to_string();
            out.classes.insert(name.clone());
            current = Some(name);
            continue;
        }
        if let Some(caps) = def_re.captures(line) {
            let method = caps[2].to_string();
            let indented = !caps[1].is_empty();
            if indented {
                if let Some(class) = &current {
                    out.pairs.insert(format!("{}:{}", class, method));
                }
            } else {
                current = None;
            }
            out.methods.insert(method);
            continue;
        }
        if !line.is_empty() && !line.starts_with(char::is_whitespace) && !line.starts_with('#') && !line.starts_with('@') {
            current = None;
        }
    }
}

fn extract_names(source: &str, re: &LazyLock<Option<Regex>>, out: &mut Collected) {
    if let Some(re) = re.as_ref() {
        for caps in re.captures_iter(source) {
            out.methods.insert(caps[1].to_string());
        }
    }
    if let Some(class_re) = CLASS_RE.as_ref() {
        for caps in class_re.captures_iter(source) {
            out.classes.insert(caps[1].to_string());
        }
    }
}

fn file_contains(root: &Path, name: &str, needle: &str) -> bool {
    std::fs::read_to_string(root.join(name))
        .map(|c| c.contains(needle))
        .unwrap_or(false)
}

fn detect_frameworks(root: &Path) -> Vec<String> {
    let mut found = Vec::new();
    if root.join("Assets").is_dir() && root.join("ProjectSettings").is_dir() {
        found.push("Unity");
    }
    if file_contains(root, "package.json", "\"react\"") {
        found.push("React");
    }
    if file_contains(root, "package.json", "\"vue\"") {
        found.push("Vue.js");
    }
    if root.join("angular.json").is_file() {
        found.push("Angular");
    }
    if root.join("manage.py").is_file() {
        found.push("Django");
    }
    if file_contains(root, "requirements.txt", "flask") {
        found.push("Flask");
    }
    if root.join("artisan").is_file() {
        found.push("Laravel");
    }
    if file_contains(root, "pom.xml", "org.springframework.boot") {
        found.push("Spring Boot");
    }
    if file_contains(root, "Cargo.toml", "axum") {
        found.push("Axum");
    }
    found.into_iter().map(str::to_string).collect()
}

fn detect_package_manager(root: &Path) -> Option<String> {
    let markers = [
        ("Cargo.toml", "cargo"),
        ("yarn.lock", "yarn"),
        ("pnpm-lock.yaml", "pnpm"),
        ("package.json", "npm"),
        ("pyproject.toml", "pip"),
        ("requirements.txt", "pip"),
        ("composer.json", "composer"),
        ("go.mod", "go"),
        ("Gemfile", "bundler"),
        ("pom.xml", "maven"),
        ("build.gradle", "gradle"),
    ];
    markers
        .iter()
        .find(|(file, _)| root.join(file).is_file())
        .map(|(_, pm)| pm.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PLAYER_CS: &str = r#"using UnityEngine;

public class Player : MonoBehaviour
{
    private int hp;

    void Start()
    {
        hp = 3;
    }

    public void TakeDamage(int amount)
    {
        if (hp > 0) { hp -= amount; }
    }
}
"#;

    const SHOP_PY: &str = "import os\n\nclass Shop:\n    def buy(self, item):\n        pass\n\ndef helper():\n    pass\n";

    #[test]
    fn test_scan_csharp_project() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Assets/Scripts")).unwrap();
        fs::create_dir_all(dir.path().join("ProjectSettings")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("Assets/Scripts/Player.cs"), PLAYER_CS).unwrap();
        fs::write(dir.path().join("Assets/Scripts/Player.cs.bak"), PLAYER_CS).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let snap = SourceScanner::new().scan(dir.path()).unwrap();

        assert_eq!(snap.files, vec!["Assets/Scripts/Player.cs"]);
        assert_eq!(snap.languages, vec!["C#"]);
        assert_eq!(snap.frameworks, vec!["Unity"]);
        assert!(snap.classes.contains(&"Player".to_string()));
        assert_eq!(
            snap.files_with_methods,
            vec!["Player:Start", "Player:TakeDamage"]
        );
        assert!(!snap.methods.contains(&"if".to_string()));
        assert!(snap.imports.contains(&"using UnityEngine".to_string()));
    }

    #[test]
    fn test_scan_python_methods_credit_class() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("shop.py"), SHOP_PY).unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask\n").unwrap();

        let snap = SourceScanner::new().scan(dir.path()).unwrap();

        assert_eq!(snap.files_with_methods, vec!["Shop:buy"]);
        assert!(snap.methods.contains(&"helper".to_string()));
        assert_eq!(snap.package_manager.as_deref(), Some("pip"));
        assert_eq!(snap.frameworks, vec!["Flask"]);
    }

    #[test]
    fn test_empty_project() {
        let dir = tempdir().unwrap();
        let snap = SourceScanner::new().scan(dir.path()).unwrap();
        assert!(snap.is_empty());
        assert_eq!(
            snap.info_json(),
            r#"{"frameworks":[],"languages":[],"packageManager":[]}"#
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(SourceScanner::new().scan(&dir.path().join("nope")).is_err());
    }
}
