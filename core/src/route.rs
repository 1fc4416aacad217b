//! Route matching and source-browsing path extraction
//!
//! Route patterns use the `/segment/:param/:optional?/*` syntax. Source
//! locations look like `/projects/<domain>/<name>/source/<rev>/<kind>/<path>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

static SOURCE_PATH_MATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/source/(.*)/(blob|tree)/(.*)").expect("source path pattern is valid")
});

/// Kind of object a source location points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    #[default]
    Tree,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blob" => Ok(ObjectKind::Blob),
            "tree" => Ok(ObjectKind::Tree),
            other => Err(format!("unknown object kind: {other}")),
        }
    }
}

/// Revision, object kind and path addressed by a source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub revision: String,
    pub kind: ObjectKind,
    pub path: String,
}

/// Extracts [`SourceLocation`]s, falling back to a configured revision
#[derive(Debug, Clone)]
pub struct SourceRouter {
    default_revision: String,
}

impl SourceRouter {
    pub fn new(default_revision: impl Into<String>) -> Self {
        Self {
            default_revision: default_revision.into(),
        }
    }

    pub fn default_revision(&self) -> &str {
        &self.default_revision
    }

    /// Extract the source location, or the defaults (configured revision,
    /// tree, `/`) when `location` is not a source object path.
    pub fn extract(&self, location: &str) -> SourceLocation {
        match SOURCE_PATH_MATCH.captures(location) {
            Some(caps) => SourceLocation {
                revision: caps[1].to_string(),
                kind: caps[2].parse().unwrap_or_default(),
                path: caps[3].to_string(),
            },
            None => SourceLocation {
                revision: self.default_revision.clone(),
                kind: ObjectKind::Tree,
                path: "/".to_string(),
            },
        }
    }

    pub fn revision(&self, location: &str) -> String {
        self.extract(location).revision
    }

    pub fn kind(&self, location: &str) -> ObjectKind {
        self.extract(location).kind
    }

    pub fn path(&self, location: &str) -> String {
        self.extract(location).path
    }
}

impl Default for SourceRouter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PROJECT_REVISION)
    }
}

/// Whether `location` matches the route `pattern`
///
/// With `loose`, the pattern only has to match a prefix ending on a segment
/// boundary. Matching is case-insensitive.
pub fn active(pattern: &str, location: &str, loose: bool) -> bool {
    match compile_pattern(pattern, loose) {
        Ok(re) => re.is_match(location),
        Err(e) => {
            warn!("Invalid route pattern {:?}: {}", pattern, e);
            false
        }
    }
}

fn compile_pattern(pattern: &str, loose: bool) -> Result<Regex, regex::Error> {
    let mut source = String::from("(?i)^");

    let mut segments = pattern.split('/').peekable();
    if segments.peek() == Some(&"") {
        segments.next();
    }

    for segment in segments {
        // An empty segment ends the pattern, so `/a/` compiles like `/a`
        if segment.is_empty() {
            break;
        }

        if segment.starts_with('*') {
            source.push_str("/(.*)");
        } else if let Some(param) = segment.strip_prefix(':') {
            let optional = param.find('?');
            let ext = param.find('.');
            match (optional, ext) {
                (Some(_), None) => source.push_str("(?:/([^/]+?))?"),
                _ => source.push_str("/([^/]+?)"),
            }
            if let Some(ext) = ext {
                if optional.is_some() {
                    source.push('?');
                }
                source.push_str(&regex::escape(&param[ext..]));
            }
        } else {
            source.push('/');
            source.push_str(&regex::escape(segment));
        }
    }

    source.push_str(if loose { "(?:$|/)" } else { "/?$" });
    Regex::new(&source)
}

/// Path builders for the application's routes
pub mod paths {
    use super::ObjectKind;

    pub fn search() -> String {
        "/search".to_string()
    }

    pub fn feed() -> String {
        "/feed".to_string()
    }

    pub fn projects() -> String {
        "/projects".to_string()
    }

    pub fn project_overview(domain: &str, name: &str) -> String {
        format!("/projects/{domain}/{name}/overview")
    }

    pub fn project_feed(domain: &str, name: &str) -> String {
        format!("/projects/{domain}/{name}/feed")
    }

    pub fn project_members(domain: &str, name: &str) -> String {
        format!("/projects/{domain}/{name}/members")
    }

    pub fn project_funds(domain: &str, name: &str) -> String {
        format!("/projects/{domain}/{name}/funds")
    }

    pub fn project_commits(domain: &str, name: &str) -> String {
        format!("/projects/{domain}/{name}/commits")
    }

    pub fn project_branches(domain: &str, name: &str) -> String {
        format!("/projects/{domain}/{name}/branches")
    }

    /// Source browser path; without both a revision and a path this is the
    /// project's source root.
    pub fn project_source(
        domain: &str,
        name: &str,
        revision: Option<&str>,
        kind: ObjectKind,
        path: Option<&str>,
    ) -> String {
        match (revision, path) {
            (Some(revision), Some(path)) if !revision.is_empty() && !path.is_empty() => {
                format!("/projects/{domain}/{name}/source/{revision}/{kind}/{path}")
            }
            _ => format!("/projects/{domain}/{name}/source"),
        }
    }

    pub fn design_system() -> String {
        "/design-system".to_string()
    }

    pub fn wallet() -> String {
        "/wallet".to_string()
    }

    pub fn profile() -> String {
        "/profile".to_string()
    }
}
