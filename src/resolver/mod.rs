//! Card identifier resolution.
//!
//! Investigation reports reference cards inconsistently: bare card IDs,
//! repository-relative paths, absolute paths, Windows separators, leading
//! `./`. [`CardResolver`] keeps an index from every practical spelling of a
//! manifest path to the card IDs declared for it, and resolves a query token by
//! generating the same spellings for the token.
//!
//! Resolution never fails. A token that matches nothing yields an empty set and
//! the caller decides how to degrade.

use std::collections::{BTreeSet, HashMap};

/// Index of path variants to card IDs.
#[derive(Debug, Clone, Default)]
pub struct CardResolver {
    /// Lookup key (one path spelling) → card IDs declared for that path.
    index: HashMap<String, BTreeSet<String>>,
    /// Cleaned repository root, when the manifest declares one.
    repo_root: Option<String>,
}

impl CardResolver {
    /// Create an empty resolver without a repository root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the repository root used to relate absolute and relative paths.
    pub fn with_repo_root(mut self, root: impl AsRef<str>) -> Self {
        let cleaned = clean_path(root.as_ref());
        self.repo_root = if cleaned.is_empty() || cleaned == "/" {
            None
        } else {
            Some(cleaned)
        };
        self
    }

    /// Repository root, if one was configured.
    pub fn repo_root(&self) -> Option<&str> {
        self.repo_root.as_deref()
    }

    /// Number of distinct lookup keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no path has been indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Associate every variant of `path` with `card_id`.
    pub fn index_path(&mut self, path: &str, card_id: &str) {
        if path.is_empty() || card_id.is_empty() {
            return;
        }
        for key in self.candidate_keys(path) {
            self.index
                .entry(key)
                .or_default()
                .insert(card_id.to_string());
        }
    }

    /// All lookup keys a path or identifier may be stored under.
    ///
    /// The set contains the original string, the separator-normalized form,
    /// the lexically cleaned form, each of those without leading `./` or `/`,
    /// and, with a repository root, the root-relative form of an absolute path
    /// or the root-joined form of a relative one.
    pub fn candidate_keys(&self, value: &str) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        if value.is_empty() {
            return keys;
        }

        let normalized = normalize_separators(value);
        let cleaned = clean_path(&normalized);
        for variant in [value, normalized.as_str(), cleaned.as_str()] {
            keys.insert(variant.to_string());
            keys.insert(strip_leading(variant).to_string());
        }

        if let Some(root) = &self.repo_root {
            if is_absolute(&cleaned) {
                if let Some(relative) = relative_to(&cleaned, root) {
                    keys.insert(relative);
                }
            } else {
                keys.insert(clean_path(&format!("{}/{}", root, cleaned)));
            }
        }

        keys.retain(|key| !key.is_empty());
        keys
    }

    /// Resolve a raw token to the card IDs it denotes.
    ///
    /// `is_known_card` accepts bare IDs that already belong to the card
    /// universe. Indexed path variants are probed next; when neither matches,
    /// paths are compared by whole-segment suffix.
    pub fn resolve<F>(&self, token: &str, is_known_card: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut resolved = BTreeSet::new();
        if token.is_empty() {
            return resolved;
        }

        if is_known_card(token) {
            resolved.insert(token.to_string());
        }

        for key in self.candidate_keys(token) {
            if let Some(cards) = self.index.get(&key) {
                resolved.extend(cards.iter().cloned());
            }
        }

        if resolved.is_empty() {
            resolved = self.resolve_by_suffix(token);
        }
        resolved
    }

    fn resolve_by_suffix(&self, token: &str) -> BTreeSet<String> {
        let mut resolved = BTreeSet::new();
        let cleaned = clean_path(token);
        let probe = strip_leading(&cleaned);
        if probe.is_empty() {
            return resolved;
        }

        for (key, cards) in &self.index {
            if ends_with_segments(probe, key) || ends_with_segments(key, probe) {
                resolved.extend(cards.iter().cloned());
            }
        }
        resolved
    }
}

fn normalize_separators(value: &str) -> String {
    value.replace('\\', "/")
}

/// Lexically clean a path: unify separators, drop empty and `.` segments and
/// fold `..` into its parent where one exists. A leading `/` is kept.
pub(crate) fn clean_path(value: &str) -> String {
    let normalized = normalize_separators(value);
    let absolute = normalized.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                None if absolute => {}
                _ => segments.push(segment),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

fn strip_leading(value: &str) -> &str {
    let mut rest = value;
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            return rest;
        }
    }
}

fn is_absolute(value: &str) -> bool {
    let bytes = value.as_bytes();
    let has_drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && bytes[2] == b'/';
    value.starts_with('/') || has_drive
}

fn relative_to(path: &str, root: &str) -> Option<String> {
    let rest = path.strip_prefix(root)?.strip_prefix('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Whether `haystack` ends with `needle` on a segment boundary.
fn ends_with_segments(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || !haystack.ends_with(needle) {
        return false;
    }
    let head = &haystack[..haystack.len() - needle.len()];
    head.is_empty() || head.ends_with('/') || needle.starts_with('/')
}
