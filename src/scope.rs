//! Project scoping for indexes that span several checked-out projects.
//!
//! Flow stores record the root's file as the recording machine saw it, often
//! an absolute path, while the index keeps paths relative to its checkout
//! root. The root file is matched against indexed paths by file name, and the
//! top-level directory of the best match becomes the scope. Symbols and
//! callees outside that directory are then ignored where the project's own
//! ones exist.

use crate::error::{ValidateError, ValidateResult};
use crate::model::IndexedSymbol;
use crate::source::StaticIndex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProjectScope {
    prefix: String,
}

fn normalize(path: &str) -> String {
    path.trim().replace('\\', "/")
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn top_level(path: &str) -> Option<&str> {
    let (head, rest) = path.split_once('/')?;
    if head.is_empty() || rest.is_empty() {
        None
    } else {
        Some(head)
    }
}

impl ProjectScope {
    /// A scope rooted at `prefix`, or none for a blank prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        let prefix = normalize(prefix);
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            None
        } else {
            Some(Self {
                prefix: prefix.to_string(),
            })
        }
    }

    /// Derive the scope of `root_file` from the indexed paths. Paths with the
    /// same file name are preferred over paths with the same stem
    /// (`Unit1.dfm` vs `Unit1.pas`); among those, a path whose directory the
    /// root file's directory ends with wins, then the first in order.
    pub fn derive(index: &dyn StaticIndex, root_file: &str) -> ValidateResult<Option<Self>> {
        let root = normalize(root_file);
        let root_name = file_name(&root);
        if root_name.is_empty() {
            return Ok(None);
        }
        let root_stem = stem(root_name);
        let paths: Vec<String> = index
            .file_paths_containing(root_stem)
            .map_err(ValidateError::index_unavailable)?
            .iter()
            .map(|p| normalize(p))
            .collect();

        let same_name: Vec<&String> = paths
            .iter()
            .filter(|p| file_name(p).eq_ignore_ascii_case(root_name))
            .collect();
        let candidates = if same_name.is_empty() {
            paths
                .iter()
                .filter(|p| stem(file_name(p)).eq_ignore_ascii_case(root_stem))
                .collect()
        } else {
            same_name
        };

        let root_dir = parent(&root).to_ascii_uppercase();
        let chosen = candidates
            .iter()
            .find(|p| {
                let dir = parent(p).to_ascii_uppercase();
                !dir.is_empty() && (root_dir == dir || root_dir.ends_with(&format!("/{dir}")))
            })
            .or_else(|| candidates.first());
        let scope = chosen
            .and_then(|p| top_level(p))
            .and_then(Self::from_prefix);
        tracing::debug!(
            root_file,
            candidates = candidates.len(),
            scope = scope.as_ref().map(|s| s.prefix()),
            "project scope derived"
        );
        Ok(scope)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True when the first path segment of `file_path` is the scope prefix.
    pub fn contains(&self, file_path: &str) -> bool {
        let path = normalize(file_path);
        let path = path.trim_start_matches('/');
        match path.split_once('/') {
            Some((head, _)) => head.eq_ignore_ascii_case(&self.prefix),
            None => false,
        }
    }

    /// Keep only in-scope symbols when that leaves something.
    pub fn narrow(&self, matches: Vec<IndexedSymbol>) -> (Vec<IndexedSymbol>, bool) {
        let inside: Vec<IndexedSymbol> = matches
            .iter()
            .filter(|s| self.contains(&s.file_path))
            .cloned()
            .collect();
        if inside.is_empty() || inside.len() == matches.len() {
            (matches, false)
        } else {
            (inside, true)
        }
    }
}
