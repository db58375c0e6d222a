//! URL patterns: literal segments, `:name` captures and `*name` catch-alls.

use std::borrow::Cow;
use std::fmt;

use percent_encoding::percent_decode_str;

use crate::context::PathParams;

/// Parameter name used for a bare `*` catch-all.
pub const WILDCARD: &str = "wildcard";

// A single pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Parameter(String),
    // Swallows one or more path segments.
    CatchAll(String),
}

/// A compiled route pattern.
///
/// | Pattern            | Example match             | Captured params            |
/// |--------------------|---------------------------|----------------------------|
/// | `/users`           | `/users`                  | *(none)*                   |
/// | `/users/:id`       | `/users/42`               | `id → "42"`                |
/// | `/docs/*slug`      | `/docs/guide/intro`       | `slug → "guide/intro"`     |
/// | `/files/*/raw`     | `/files/a/b/raw`          | `wildcard → "a/b"`         |
///
/// A catch-all needs at least one segment and keeps its position: segments
/// after it must match the tail of the path. Trailing and duplicate slashes
/// are ignored on both sides.
///
/// Captured values are percent-decoded (`+` stays a plus sign). A segment
/// that does not decode to UTF-8 is captured as sent.
///
/// # Examples
///
/// ```
/// use lithe::router::Pattern;
///
/// let pattern = Pattern::parse("/users/:id");
/// let params = pattern.matches("/users/42/").unwrap();
/// assert_eq!(params.get("id"), Some("42"));
/// assert!(pattern.matches("/users").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(pattern: &str) -> Self {
        let segments: Vec<Segment> = split(pattern)
            .map(|s| {
                if let Some(name) = s.strip_prefix(':') {
                    Segment::Parameter(name.to_owned())
                } else if let Some(name) = s.strip_prefix('*') {
                    let name = if name.is_empty() { WILDCARD } else { name };
                    Segment::CatchAll(name.to_owned())
                } else {
                    Segment::Static(s.to_owned())
                }
            })
            .collect();

        let raw = format!(
            "/{}",
            segments
                .iter()
                .map(|s| match s {
                    Segment::Static(s) => s.clone(),
                    Segment::Parameter(name) => format!(":{name}"),
                    Segment::CatchAll(name) if name == WILDCARD => "*".to_owned(),
                    Segment::CatchAll(name) => format!("*{name}"),
                })
                .collect::<Vec<_>>()
                .join("/")
        );

        Self { raw, segments }
    }

    /// The normalized pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the parameters this pattern captures, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Static(_) => None,
            Segment::Parameter(name) | Segment::CatchAll(name) => Some(name.as_str()),
        })
    }

    /// Matches `path`, returning captured parameters on success.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let parts: Vec<&str> = split(path).collect();
        let mut params = PathParams::new();

        let Some(star) = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::CatchAll(_)))
        else {
            if parts.len() != self.segments.len() {
                return None;
            }
            return match_all(&self.segments, &parts, &mut params).then_some(params);
        };

        let tail = self.segments.len() - star - 1;
        if parts.len() < star + 1 + tail {
            return None;
        }
        let swallowed_end = parts.len() - tail;

        if !match_all(&self.segments[..star], &parts[..star], &mut params)
            || !match_all(&self.segments[star + 1..], &parts[swallowed_end..], &mut params)
        {
            return None;
        }

        if let Segment::CatchAll(name) = &self.segments[star] {
            let swallowed: Vec<Cow<'_, str>> =
                parts[star..swallowed_end].iter().map(|part| decode(part)).collect();
            params.insert(name.clone(), swallowed.join("/"));
        }
        Some(params)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

// Pairwise match of equally long segment and path slices. A catch-all that
// is not the first one binds exactly one segment.
fn match_all(segments: &[Segment], parts: &[&str], params: &mut PathParams) -> bool {
    segments.iter().zip(parts).all(|(segment, part)| match segment {
        Segment::Static(s) => s == part,
        Segment::Parameter(name) | Segment::CatchAll(name) => {
            params.insert(name.clone(), decode(part));
            true
        }
    })
}

fn decode(part: &str) -> Cow<'_, str> {
    percent_decode_str(part)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_slashes() {
        assert_eq!(Pattern::parse("/").as_str(), "/");
        assert_eq!(Pattern::parse("users//").as_str(), "/users");
        assert_eq!(Pattern::parse("/files/*").as_str(), "/files/*");
        assert_eq!(Pattern::parse("/docs/*slug").as_str(), "/docs/*slug");
    }

    #[test]
    fn root_matches_only_root() {
        let pat = Pattern::parse("/");
        assert!(pat.matches("/").is_some());
        assert!(pat.matches("").is_some());
        assert!(pat.matches("/other").is_none());
    }

    #[test]
    fn static_match_ignores_trailing_slash() {
        let pat = Pattern::parse("/users");
        assert!(pat.matches("/users/").is_some());
        assert!(pat.matches("/posts").is_none());
    }

    #[test]
    fn parameters_are_captured() {
        let pat = Pattern::parse("/users/:id/posts/:post_id");
        let params = pat.matches("/users/7/posts/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
        assert!(pat.matches("/users/7/posts").is_none());
        assert!(pat.matches("/people/7/posts/99").is_none());
    }

    #[test]
    fn trailing_catch_all_swallows_rest() {
        let pat = Pattern::parse("/docs/*slug");
        let params = pat.matches("/docs/guide/getting-started").unwrap();
        assert_eq!(params.get("slug"), Some("guide/getting-started"));
        assert!(pat.matches("/docs").is_none());
    }

    #[test]
    fn bare_star_uses_wildcard_name() {
        let params = Pattern::parse("/files/*").matches("/files/a.txt").unwrap();
        assert_eq!(params.get(WILDCARD), Some("a.txt"));
    }

    #[test]
    fn catch_all_keeps_its_position() {
        let pat = Pattern::parse("/repos/*path/blame/:line");
        let params = pat.matches("/repos/src/lib/mod.rs/blame/12").unwrap();
        assert_eq!(params.get("path"), Some("src/lib/mod.rs"));
        assert_eq!(params.get("line"), Some("12"));
        assert!(pat.matches("/repos/blame/12").is_none());
        assert!(pat.matches("/repos/a/b/12").is_none());
    }

    #[test]
    fn param_names_in_order() {
        let pat = Pattern::parse("/a/:x/*rest");
        let names: Vec<_> = pat.param_names().collect();
        assert_eq!(names, vec!["x", "rest"]);
    }

    #[test]
    fn captures_are_percent_decoded() {
        let pat = Pattern::parse("/users/:id");
        let params = pat.matches("/users/john%20doe").unwrap();
        assert_eq!(params.get("id"), Some("john doe"));

        let params = pat.matches("/users/a+b%2Bc").unwrap();
        assert_eq!(params.get("id"), Some("a+b+c"));

        let params = pat.matches("/users/%FF%FE").unwrap();
        assert_eq!(params.get("id"), Some("%FF%FE"));

        let params = Pattern::parse("/docs/*slug")
            .matches("/docs/caf%C3%A9/menu%20du%20jour")
            .unwrap();
        assert_eq!(params.get("slug"), Some("café/menu du jour"));
    }
}
