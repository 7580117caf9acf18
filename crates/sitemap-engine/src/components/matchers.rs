//! URI matchers: wildcard and regular-expression patterns.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;
use sitemap_types::{Parameters, Result, SitemapError};

use crate::component::{Bindings, Matcher};
use crate::environment::Environment;

/// Regexes for the static patterns checked while building a tree. Patterns
/// resolved from request data are compiled per call and never stored.
#[derive(Default)]
struct PatternCache {
    compiled: RwLock<HashMap<String, Arc<Regex>>>,
}

impl PatternCache {
    fn register(&self, pattern: &str, compile: impl FnOnce(&str) -> Result<Regex>) -> Result<()> {
        let re = Arc::new(compile(pattern)?);
        if let Ok(mut guard) = self.compiled.write() {
            guard.insert(pattern.to_string(), re);
        }
        Ok(())
    }

    fn get_or_compile(
        &self,
        pattern: &str,
        compile: impl FnOnce(&str) -> Result<Regex>,
    ) -> Result<Arc<Regex>> {
        if let Ok(guard) = self.compiled.read() {
            if let Some(re) = guard.get(pattern) {
                return Ok(Arc::clone(re));
            }
        }
        Ok(Arc::new(compile(pattern)?))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.compiled.read().map(|g| g.len()).unwrap_or(0)
    }
}

fn bindings_from(re: &Regex, input: &str) -> Option<Bindings> {
    let caps = re.captures(input)?;
    let mut bindings = Bindings::new();
    for (i, group) in caps.iter().enumerate() {
        if let Some(m) = group {
            bindings.insert(i.to_string(), m.as_str().to_string());
        }
    }
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            bindings.insert(name.to_string(), m.as_str().to_string());
        }
    }
    Some(bindings)
}

// ---------------------------------------------------------------------------
// Wildcard
// ---------------------------------------------------------------------------

/// Translate a wildcard pattern into an anchored regex.
///
/// `**` matches any characters, `*` matches within one path segment and
/// `\` escapes the next character. Each wildcard becomes a numbered group.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str("(.*)");
            }
            '*' => out.push_str("([^/]*)"),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => {
                    return Err(SitemapError::configuration(
                        "wildcard",
                        format!("Pattern '{pattern}' ends with a dangling escape"),
                    ))
                }
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| SitemapError::configuration("wildcard", e.to_string()))
}

/// Matches the request URI against a wildcard pattern.
#[derive(Default)]
pub struct WildcardUriMatcher {
    cache: PatternCache,
}

impl Matcher for WildcardUriMatcher {
    fn check_pattern(&self, pattern: &str) -> Result<()> {
        self.cache.register(pattern, wildcard_to_regex)
    }

    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Bindings>> {
        let re = self.cache.get_or_compile(pattern, wildcard_to_regex)?;
        Ok(bindings_from(&re, env.uri()))
    }
}

// ---------------------------------------------------------------------------
// Regexp
// ---------------------------------------------------------------------------

/// Matches the request URI against a regular expression. Numbered and
/// named groups are both bound.
#[derive(Default)]
pub struct RegexpUriMatcher {
    cache: PatternCache,
}

fn compile_regexp(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| SitemapError::configuration("regexp", e.to_string()))
}

impl Matcher for RegexpUriMatcher {
    fn check_pattern(&self, pattern: &str) -> Result<()> {
        self.cache.register(pattern, compile_regexp)
    }

    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        _parameters: &Parameters,
    ) -> Result<Option<Bindings>> {
        let re = self.cache.get_or_compile(pattern, compile_regexp)?;
        Ok(bindings_from(&re, env.uri()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;

    fn match_uri(matcher: &dyn Matcher, pattern: &str, uri: &str) -> Option<Bindings> {
        let env = RequestEnvironment::new(uri);
        matcher.matches(pattern, &env, &Parameters::new()).unwrap()
    }

    #[test]
    fn wildcard_literal_match_has_whole_uri_binding() {
        let m = WildcardUriMatcher::default();
        let b = match_uri(&m, "hello.html", "hello.html").unwrap();
        assert_eq!(b.get("0").map(String::as_str), Some("hello.html"));
        assert_eq!(b.len(), 1);
        assert!(match_uri(&m, "hello.html", "other.html").is_none());
    }

    #[test]
    fn wildcard_single_star_stays_in_segment() {
        let m = WildcardUriMatcher::default();
        let b = match_uri(&m, "docs/*.html", "docs/intro.html").unwrap();
        assert_eq!(b.get("1").map(String::as_str), Some("intro"));
        assert!(match_uri(&m, "docs/*.html", "docs/a/intro.html").is_none());
    }

    #[test]
    fn wildcard_double_star_crosses_segments() {
        let m = WildcardUriMatcher::default();
        let b = match_uri(&m, "**/*.html", "a/b/c.html").unwrap();
        assert_eq!(b.get("1").map(String::as_str), Some("a/b"));
        assert_eq!(b.get("2").map(String::as_str), Some("c"));
    }

    #[test]
    fn wildcard_escape_matches_literal_star() {
        let m = WildcardUriMatcher::default();
        assert!(match_uri(&m, r"a\*b", "a*b").is_some());
        assert!(match_uri(&m, r"a\*b", "axb").is_none());
    }

    #[test]
    fn wildcard_dangling_escape_rejected() {
        let m = WildcardUriMatcher::default();
        assert!(m.check_pattern("abc\\").unwrap_err().is_configuration());
    }

    #[test]
    fn regexp_binds_numbered_and_named_groups() {
        let m = RegexpUriMatcher::default();
        let b = match_uri(&m, r"^(?P<section>\w+)/(\d+)$", "news/42").unwrap();
        assert_eq!(b.get("section").map(String::as_str), Some("news"));
        assert_eq!(b.get("1").map(String::as_str), Some("news"));
        assert_eq!(b.get("2").map(String::as_str), Some("42"));
    }

    #[test]
    fn only_checked_patterns_are_cached() {
        let m = WildcardUriMatcher::default();
        m.check_pattern("static/*.html").unwrap();
        assert_eq!(m.cache.len(), 1);

        for value in ["a", "b", "c"] {
            let pattern = format!("{value}/*.html");
            assert!(match_uri(&m, &pattern, &format!("{value}/x.html")).is_some());
        }
        assert!(match_uri(&m, "static/*.html", "static/x.html").is_some());
        assert_eq!(m.cache.len(), 1);
    }

    #[test]
    fn regexp_invalid_pattern_rejected() {
        let m = RegexpUriMatcher::default();
        assert!(m.check_pattern("(unclosed").unwrap_err().is_configuration());
    }
}
