//! Route discovery: walk the routes root and derive URL patterns from paths.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// File names that mark a directory as a route.
pub const ROUTE_FILE_NAMES: [&str; 2] = ["route.rs", "route.toml"];

/// A route file found under the routes root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRoute {
    /// Pattern derived from the directory, e.g. `/users/:id`.
    pub url_pattern: String,
    /// Absolute (or root-relative, if the root was relative) path of the file.
    pub source_file: PathBuf,
    /// The file's directory relative to the root, `/`-separated, e.g. `users/[id]`.
    pub relative_dir: String,
}

/// Translates a root-relative directory into a URL pattern.
///
/// A segment that is exactly `[name]` becomes `:name` and exactly
/// `[...name]` becomes the catch-all `*name`. Any other segment, brackets
/// included, is a literal. Empty segments disappear and the result always
/// starts with `/`.
///
/// # Examples
///
/// ```
/// use lithe::routes::url_pattern;
///
/// assert_eq!(url_pattern("users/[id]"), "/users/:id");
/// assert_eq!(url_pattern("docs/[...slug]"), "/docs/*slug");
/// assert_eq!(url_pattern("v[version]"), "/v[version]");
/// assert_eq!(url_pattern(""), "/");
/// ```
pub fn url_pattern(relative_dir: &str) -> String {
    let segments: Vec<String> = relative_dir
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .map(translate_segment)
        .collect();
    format!("/{}", segments.join("/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SegmentKind {
    Literal,
    Param,
    CatchAll,
}

fn classify(segment: &str) -> (SegmentKind, &str) {
    let Some(inner) = segment
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .filter(|inner| !inner.is_empty() && !inner.contains(['[', ']']))
    else {
        return (SegmentKind::Literal, segment);
    };
    match inner.strip_prefix("...") {
        Some(name) if !name.is_empty() => (SegmentKind::CatchAll, name),
        Some(_) => (SegmentKind::Literal, segment),
        None => (SegmentKind::Param, inner),
    }
}

fn translate_segment(segment: &str) -> String {
    match classify(segment) {
        (SegmentKind::Literal, literal) => literal.to_owned(),
        (SegmentKind::Param, name) => format!(":{name}"),
        (SegmentKind::CatchAll, name) => format!("*{name}"),
    }
}

/// Walks `root` and returns every route file in a stable order.
///
/// Siblings are visited static names first, then `[param]` names, then
/// `[...catch-all]` names, each group alphabetically, so a literal route is
/// registered before a dynamic one that would also match it. A missing root
/// is not an error: it yields no routes.
pub fn discover(root: &Path) -> Vec<DiscoveredRoute> {
    if !root.is_dir() {
        warn!(root = %root.display(), "routes root not found, serving no routes");
        return Vec::new();
    }

    let mut routes = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by(|a, b| compare_entries(a, b));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry under routes root");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_route_file(entry.file_name()) {
            continue;
        }

        let relative_dir = entry
            .path()
            .parent()
            .and_then(|dir| dir.strip_prefix(root).ok())
            .map(join_components)
            .unwrap_or_default();
        let route = DiscoveredRoute {
            url_pattern: url_pattern(&relative_dir),
            source_file: entry.into_path(),
            relative_dir,
        };
        debug!(pattern = %route.url_pattern, file = %route.source_file.display(), "discovered route");
        routes.push(route);
    }
    routes
}

fn is_route_file(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| ROUTE_FILE_NAMES.contains(&n))
}

fn join_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a = a.file_name().to_string_lossy();
    let b = b.file_name().to_string_lossy();
    classify(&a).0.cmp(&classify(&b).0).then_with(|| a.cmp(&b))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn plain_segments_join_with_single_slash() {
        assert_eq!(url_pattern("users"), "/users");
        assert_eq!(url_pattern("/admin//reports/"), "/admin/reports");
        assert_eq!(url_pattern("a\\b"), "/a/b");
    }

    #[test]
    fn bracketed_segments_become_params() {
        assert_eq!(url_pattern("users/[id]/posts/[postId]"), "/users/:id/posts/:postId");
        assert_eq!(url_pattern("files/[...path]/raw"), "/files/*path/raw");
    }

    #[test]
    fn partial_brackets_stay_literal() {
        assert_eq!(url_pattern("v[version]"), "/v[version]");
        assert_eq!(url_pattern("[a]-[b]"), "/[a]-[b]");
        assert_eq!(url_pattern("odd[name"), "/odd[name");
        assert_eq!(url_pattern("[]/[...]"), "/[]/[...]");
    }

    #[test]
    fn missing_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&dir.path().join("api")).is_empty());
    }

    #[test]
    fn finds_route_files_only() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "route.toml");
        touch(dir.path(), "users/route.rs");
        touch(dir.path(), "users/[id]/route.toml");
        touch(dir.path(), "users/helpers.rs");
        touch(dir.path(), "users/[id]/route.ts");

        let routes = discover(dir.path());
        let patterns: Vec<_> = routes.iter().map(|r| r.url_pattern.as_str()).collect();
        assert_eq!(patterns, vec!["/", "/users", "/users/:id"]);
        assert_eq!(routes[2].relative_dir, "users/[id]");
        assert!(routes[2].source_file.ends_with("users/[id]/route.toml"));
    }

    #[test]
    fn static_siblings_come_before_dynamic_ones() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "docs/[...slug]/route.toml");
        touch(dir.path(), "docs/[section]/route.toml");
        touch(dir.path(), "docs/intro/route.toml");

        let patterns: Vec<_> = discover(dir.path())
            .into_iter()
            .map(|r| r.url_pattern)
            .collect();
        assert_eq!(patterns, vec!["/docs/intro", "/docs/:section", "/docs/*slug"]);
    }

    #[test]
    fn discovery_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a/route.toml");
        touch(dir.path(), "b/[x]/route.rs");
        assert_eq!(discover(dir.path()), discover(dir.path()));
    }
}
