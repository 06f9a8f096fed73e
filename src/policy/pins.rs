//! Pin rule store.
//!
//! Pins exempt matching paths from deletion regardless of tier. The rule
//! language is deliberately small: four tagged variants with one match
//! function each, no general pattern engine. Rules are loaded fresh at the
//! start of every cleanup run; a missing or unreadable policy file degrades
//! to an empty set, never an error.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::is_forbidden_root;

/// A single pin rule. One line of the policy file:
///
/// ```text
/// # comments and blank lines are skipped
/// model:flux1-dev            substring match anywhere in the path
/// folder:loras               path prefix, relative ones anchor to workspace
/// /workspace/keep/exactly    absolute path (or prefix of it)
/// *.safetensors              anything else is a shell-style glob
/// ```
#[derive(Debug, Clone)]
pub enum PinRule {
    AbsolutePath(PathBuf),
    FolderPrefix(PathBuf),
    ModelTag(String),
    Glob(glob::Pattern),
}

impl PinRule {
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            PinRule::AbsolutePath(pin) | PinRule::FolderPrefix(pin) => path.starts_with(pin),
            PinRule::ModelTag(tag) => path.to_string_lossy().contains(tag.as_str()),
            PinRule::Glob(pattern) => pattern.matches_path(path),
        }
    }
}

impl fmt::Display for PinRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRule::AbsolutePath(p) => write!(f, "{}", p.display()),
            PinRule::FolderPrefix(p) => write!(f, "folder:{}", p.display()),
            PinRule::ModelTag(t) => write!(f, "model:{t}"),
            PinRule::Glob(g) => write!(f, "{}", g.as_str()),
        }
    }
}

#[derive(Debug, Default)]
pub struct PinSet {
    rules: Vec<PinRule>,
}

impl PinSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the pin policy file. Never errors: a missing or unreadable file
    /// yields the empty set, and invalid lines are dropped with a warning.
    pub fn load(path: &Path, workspace_root: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if path.exists() {
                    warn!("pin file {} unreadable ({}), no pins active", path.display(), e);
                } else {
                    debug!("no pin file at {}, no pins active", path.display());
                }
                return Self::empty();
            }
        };

        let mut rules = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_rule(line, workspace_root) {
                Some(rule) => rules.push(rule),
                None => warn!(
                    "pin file {}:{}: invalid rule {:?}, dropped",
                    path.display(),
                    lineno + 1,
                    line
                ),
            }
        }
        debug!("loaded {} pin rule(s) from {}", rules.len(), path.display());
        Self { rules }
    }

    /// First rule matching `path`, if any.
    pub fn matching(&self, path: &Path) -> Option<&PinRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Classify and validate one policy line. A pattern that names a system root
/// is never stored.
fn parse_rule(line: &str, workspace_root: &Path) -> Option<PinRule> {
    if let Some(tag) = line.strip_prefix("model:") {
        let tag = tag.trim();
        if tag.is_empty() || is_forbidden_root(Path::new(tag)) {
            return None;
        }
        return Some(PinRule::ModelTag(tag.to_string()));
    }

    if let Some(folder) = line.strip_prefix("folder:") {
        let folder = folder.trim().trim_end_matches('/');
        if folder.is_empty() {
            return None;
        }
        let folder = Path::new(folder);
        let anchored = if folder.is_absolute() {
            folder.to_path_buf()
        } else {
            workspace_root.join(folder)
        };
        if is_forbidden_root(&anchored) {
            return None;
        }
        return Some(PinRule::FolderPrefix(anchored));
    }

    if line.starts_with('/') {
        let path = Path::new(line.trim_end_matches('/'));
        if path.as_os_str().is_empty() || is_forbidden_root(path) {
            return None;
        }
        return Some(PinRule::AbsolutePath(path.to_path_buf()));
    }

    if is_forbidden_root(Path::new(line)) {
        return None;
    }
    glob::Pattern::new(line).ok().map(PinRule::Glob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn load_str(content: &str, workspace: &Path) -> PinSet {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pins.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        PinSet::load(&path, workspace)
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let pins = PinSet::load(Path::new("/nonexistent/pins.conf"), Path::new("/workspace"));
        assert!(pins.is_empty());
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let pins = load_str("# a comment\n\nmodel:flux\n", Path::new("/workspace"));
        assert_eq!(pins.len(), 1);
    }

    #[test]
    fn lines_classify_by_prefix() {
        let pins = load_str(
            "model:flux1-dev\nfolder:loras\n/workspace/keep\n*.safetensors\n",
            Path::new("/workspace"),
        );
        assert_eq!(pins.len(), 4);
        assert!(matches!(pins.rules[0], PinRule::ModelTag(_)));
        assert!(matches!(pins.rules[1], PinRule::FolderPrefix(_)));
        assert!(matches!(pins.rules[2], PinRule::AbsolutePath(_)));
        assert!(matches!(pins.rules[3], PinRule::Glob(_)));
    }

    #[test]
    fn system_root_patterns_are_rejected() {
        let pins = load_str("/etc\n/\nfolder:/usr\nmodel:\n", Path::new("/workspace"));
        assert!(pins.is_empty());
    }

    #[test]
    fn model_tag_matches_substring() {
        let rule = PinRule::ModelTag("flux1-dev".to_string());
        assert!(rule.matches(Path::new(
            "/workspace/ComfyUI/models/checkpoints/flux1-dev.safetensors"
        )));
        assert!(!rule.matches(Path::new("/workspace/ComfyUI/output/render.png")));
    }

    #[test]
    fn folder_prefix_is_component_wise() {
        let rule = PinRule::FolderPrefix(PathBuf::from("/workspace/loras"));
        assert!(rule.matches(Path::new("/workspace/loras/style.safetensors")));
        assert!(rule.matches(Path::new("/workspace/loras")));
        assert!(!rule.matches(Path::new("/workspace/loras-old/x")));
    }

    #[test]
    fn relative_folder_anchors_to_workspace() {
        let pins = load_str("folder:loras\n", Path::new("/data"));
        assert!(pins.matching(Path::new("/data/loras/a.bin")).is_some());
        assert!(pins.matching(Path::new("/other/loras/a.bin")).is_none());
    }

    #[test]
    fn glob_matches_against_the_full_path() {
        let pins = load_str("**/*.safetensors\n", Path::new("/workspace"));
        assert!(pins
            .matching(Path::new("/workspace/models/model.safetensors"))
            .is_some());
        assert!(pins.matching(Path::new("/workspace/models/readme.txt")).is_none());
    }

    #[test]
    fn invalid_glob_is_dropped() {
        let pins = load_str("[unclosed\n", Path::new("/workspace"));
        assert!(pins.is_empty());
    }
}
