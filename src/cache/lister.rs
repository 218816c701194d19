//! Build context dependency listing
//!
//! Treats every file in the artifact's build context as an input, minus
//! `.git` and whatever `.dockerignore` excludes. The Dockerfile is always
//! an input, even when ignored. Symlinks are listed as links and never
//! followed, since the daemon receives the link and not its target.

use crate::artifact::Artifact;
use crate::cache::hash::DependencyLister;
use crate::error::{ImgcacheError, ImgcacheResult};
use async_trait::async_trait;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

const DOCKERIGNORE: &str = ".dockerignore";

/// Exclusion rules parsed from a `.dockerignore` file
///
/// Every pattern is anchored at the context root, so `*.log` only matches
/// top-level files while `**/*.log` matches at any depth. The last matching
/// rule wins, which lets `!` rules re-include paths an earlier rule excluded.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Parse `.dockerignore` content for a context rooted at `root`
    pub fn parse(root: &Path, content: &str) -> Result<Self, ignore::Error> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in content.lines().filter_map(anchored_pattern) {
            builder.add_line(None, &pattern)?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            matcher: builder.build()?,
        })
    }

    /// Whether a context-relative path is excluded, directly or through a parent
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(self.root.join(relative), is_dir)
            .is_ignore()
    }

    /// Exceptions can re-include files below an excluded directory
    fn has_exceptions(&self) -> bool {
        self.matcher.num_whitelists() > 0
    }
}

/// Rewrite a `.dockerignore` line as a root-anchored gitignore pattern
fn anchored_pattern(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (negated, pattern) = match line.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, line),
    };
    let pattern = pattern
        .trim_start_matches("./")
        .trim_start_matches('/')
        .trim_end_matches('/');
    if pattern.is_empty() || pattern == "." {
        return None;
    }

    let prefix = if negated { "!/" } else { "/" };
    Some(format!("{}{}", prefix, pattern))
}

fn load_rules(context: &Path) -> Result<IgnoreRules, String> {
    let path = context.join(DOCKERIGNORE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(format!("reading {}: {}", path.display(), e)),
    };

    IgnoreRules::parse(context, &content).map_err(|e| format!("parsing {}: {}", path.display(), e))
}

/// Walk the context and collect every file and symlink the rules keep
fn walk_context(context: &Path, rules: &IgnoreRules) -> Result<Vec<PathBuf>, String> {
    let prune = rules.clone();
    let root = context.to_path_buf();

    let mut walker = WalkBuilder::new(context);
    walker
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            if entry.depth() == 1 && entry.file_name() == ".git" {
                return false;
            }
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                return true;
            };
            prune.has_exceptions() || !prune.is_ignored(relative, true)
        });

    let mut files = Vec::new();
    for result in walker.build() {
        let entry = result.map_err(|e| e.to_string())?;
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() && !file_type.is_symlink() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(context) else {
            continue;
        };
        if rules.is_ignored(relative, false) {
            continue;
        }
        files.push(relative.to_path_buf());
    }

    Ok(files)
}

/// Lists the files of an artifact's build context
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextLister;

impl ContextLister {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DependencyLister for ContextLister {
    async fn dependencies_for_artifact(&self, artifact: &Artifact) -> ImgcacheResult<Vec<PathBuf>> {
        let context = artifact.context.clone();
        let dependency_error = |reason: String| ImgcacheError::Dependencies {
            artifact: artifact.image.clone(),
            reason,
        };

        let is_dir = tokio::fs::metadata(&context)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(dependency_error(format!(
                "build context {} is not a directory",
                context.display()
            )));
        }

        let mut files = tokio::task::spawn_blocking(move || {
            let rules = load_rules(&context)?;
            walk_context(&context, &rules)
        })
        .await
        .map_err(|e| ImgcacheError::Internal(format!("context walk failed: {}", e)))?
        .map_err(dependency_error)?;

        let dockerfile = PathBuf::from(&artifact.dockerfile);
        if !files.contains(&dockerfile) {
            files.push(dockerfile);
        }

        files.sort();
        debug!("Found {} dependencies for {}", files.len(), artifact.image);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::cache_key;
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        stdfs::create_dir_all(path.parent().unwrap()).unwrap();
        stdfs::write(path, content).unwrap();
    }

    async fn list(dir: &Path) -> Vec<PathBuf> {
        ContextLister::new()
            .dependencies_for_artifact(&Artifact::new("app", dir))
            .await
            .unwrap()
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn ignore_rules_parse() {
        let rules = IgnoreRules::parse(
            Path::new("/ctx"),
            "# comment\n\nnode_modules/\n./dist\n*.log\ntmp*\n",
        )
        .unwrap();

        assert!(rules.is_ignored(Path::new("node_modules"), true));
        assert!(rules.is_ignored(Path::new("node_modules/pkg/index.js"), false));
        assert!(rules.is_ignored(Path::new("dist"), true));
        assert!(rules.is_ignored(Path::new("tmpfile"), false));
        assert!(!rules.is_ignored(Path::new("distribution"), false));
        assert!(!rules.is_ignored(Path::new("src/main.rs"), false));
    }

    #[test]
    fn extension_pattern_matches_top_level_only() {
        let rules = IgnoreRules::parse(Path::new("/ctx"), "*.log\n").unwrap();

        assert!(rules.is_ignored(Path::new("debug.log"), false));
        assert!(!rules.is_ignored(Path::new("logs/debug.log"), false));
        assert!(!rules.is_ignored(Path::new("debug.txt"), false));

        let rules = IgnoreRules::parse(Path::new("/ctx"), "**/*.log\n").unwrap();
        assert!(rules.is_ignored(Path::new("logs/debug.log"), false));
    }

    #[test]
    fn negation_reincludes() {
        let rules = IgnoreRules::parse(Path::new("/ctx"), "*.log\n!keep.log\n").unwrap();

        assert!(rules.is_ignored(Path::new("debug.log"), false));
        assert!(!rules.is_ignored(Path::new("keep.log"), false));
    }

    #[test]
    fn later_rule_wins() {
        let rules = IgnoreRules::parse(Path::new("/ctx"), "!keep.log\n*.log\n").unwrap();
        assert!(rules.is_ignored(Path::new("keep.log"), false));
    }

    #[tokio::test]
    async fn lists_context_files_sorted() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Dockerfile", "FROM scratch");
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "src/lib/mod.rs", "");
        write(dir.path(), ".env", "MODE=prod");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main");

        assert_eq!(
            list(dir.path()).await,
            paths(&[".env", "Dockerfile", "src/lib/mod.rs", "src/main.rs"])
        );
    }

    #[tokio::test]
    async fn honours_dockerignore_but_keeps_dockerfile() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Dockerfile", "FROM scratch");
        write(dir.path(), ".dockerignore", "target\nDockerfile\n*.log\n");
        write(dir.path(), "target/debug/app", "elf");
        write(dir.path(), "build.log", "");
        write(dir.path(), "app.rs", "");

        assert_eq!(
            list(dir.path()).await,
            paths(&[".dockerignore", "Dockerfile", "app.rs"])
        );
    }

    #[tokio::test]
    async fn exception_below_excluded_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Dockerfile", "FROM scratch");
        write(dir.path(), ".dockerignore", "vendor\n!vendor/keep.txt\n");
        write(dir.path(), "vendor/keep.txt", "kept");
        write(dir.path(), "vendor/drop.txt", "dropped");

        assert_eq!(
            list(dir.path()).await,
            paths(&[".dockerignore", "Dockerfile", "vendor/keep.txt"])
        );
    }

    #[tokio::test]
    async fn allowlist_dockerignore_tracks_sent_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Dockerfile", "FROM scratch\nCOPY src /src\n");
        write(dir.path(), ".dockerignore", "*\n!src\n!Dockerfile\n");
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "README.md", "docs");

        assert_eq!(list(dir.path()).await, paths(&["Dockerfile", "src/main.rs"]));

        let artifact = Artifact::new("app", dir.path());
        let lister = ContextLister::new();
        let before = cache_key(&artifact, &lister).await.unwrap();

        write(dir.path(), "README.md", "more docs");
        assert_eq!(cache_key(&artifact, &lister).await.unwrap(), before);

        write(dir.path(), "src/main.rs", "fn main() { println!(\"hi\"); }");
        assert_ne!(cache_key(&artifact, &lister).await.unwrap(), before);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_inputs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Dockerfile", "FROM scratch");
        write(dir.path(), "a", "same");
        write(dir.path(), "b", "same");
        std::os::unix::fs::symlink("a", dir.path().join("link")).unwrap();

        assert_eq!(list(dir.path()).await, paths(&["Dockerfile", "a", "b", "link"]));

        let artifact = Artifact::new("app", dir.path());
        let lister = ContextLister::new();
        let before = cache_key(&artifact, &lister).await.unwrap();

        stdfs::remove_file(dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink("b", dir.path().join("link")).unwrap();

        assert_ne!(cache_key(&artifact, &lister).await.unwrap(), before);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_symlink_is_listed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Dockerfile", "FROM scratch");
        std::os::unix::fs::symlink("nowhere", dir.path().join("stale")).unwrap();

        assert_eq!(list(dir.path()).await, paths(&["Dockerfile", "stale"]));
    }

    #[tokio::test]
    async fn missing_context_is_error() {
        let dir = TempDir::new().unwrap();
        let artifact = Artifact::new("app", dir.path().join("absent"));

        let err = ContextLister::new()
            .dependencies_for_artifact(&artifact)
            .await
            .unwrap_err();

        assert!(matches!(err, ImgcacheError::Dependencies { .. }));
    }
}
