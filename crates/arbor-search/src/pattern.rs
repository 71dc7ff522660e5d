use std::fmt;

use arbor_types::path;

use crate::error::{SearchError, SearchResult};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    /// Matches one segment; `*` inside the text matches any run of characters.
    Glob(String),
    /// `**`: zero or more whole segments.
    Any,
}

/// An absolute path pattern.
///
/// `*` within a segment matches any characters of that segment, and a `**`
/// segment matches any number of segments (including none):
///
/// ```text
/// /arbor/workspace/*/vdb*     every top-level vdb* node in any home
/// /arbor/library/**           the library root and everything beneath it
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> SearchResult<Self> {
        let raw = path::normalize(pattern).map_err(|e| SearchError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let mut segments = Vec::new();
        for seg in path::segments(&raw) {
            if seg == "**" {
                if segments.last() != Some(&Segment::Any) {
                    segments.push(Segment::Any);
                }
            } else if seg.contains("**") {
                return Err(SearchError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "'**' must be a whole segment".into(),
                });
            } else {
                segments.push(Segment::Glob(seg.to_string()));
            }
        }
        Ok(Self { raw, segments })
    }

    /// The longest wildcard-free path prefix. Matches always lie within it.
    pub fn literal_prefix(&self) -> String {
        let mut prefix = path::ROOT.to_string();
        for seg in &self.segments {
            match seg {
                Segment::Glob(g) if !g.contains('*') => prefix = path::join(&prefix, g),
                _ => break,
            }
        }
        prefix
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let parts: Vec<&str> = path::segments(candidate).collect();
        match_segments(&self.segments, &parts)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn match_segments(pattern: &[Segment], parts: &[&str]) -> bool {
    match pattern.split_first() {
        None => parts.is_empty(),
        Some((Segment::Any, rest)) => (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..])),
        Some((Segment::Glob(glob), rest)) => match parts.split_first() {
            Some((head, tail)) => glob_matches(glob, head) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Single-segment glob where `*` matches any run of characters.
pub fn glob_matches(glob: &str, text: &str) -> bool {
    let pieces: Vec<&str> = glob.split('*').collect();
    if pieces.len() == 1 {
        return glob == text;
    }
    let (first, last) = (pieces[0], pieces[pieces.len() - 1]);
    if !text.starts_with(first) || !text[first.len()..].ends_with(last) {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for piece in &pieces[1..pieces.len() - 1] {
        match rest.find(piece) {
            Some(idx) => rest = &rest[idx + piece.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn literal_patterns() {
        let p = PathPattern::parse("/a/b/").unwrap();
        assert_eq!(p.literal_prefix(), "/a/b");
        assert!(p.matches("/a/b"));
        assert!(!p.matches("/a/b/c"));
        assert!(!p.matches("/a"));
    }

    #[test]
    fn single_segment_wildcards() {
        let p = PathPattern::parse("/ws/*/vdb*").unwrap();
        assert_eq!(p.literal_prefix(), "/ws");
        assert!(p.matches("/ws/alice/vdb1"));
        assert!(p.matches("/ws/bob/vdb"));
        assert!(!p.matches("/ws/alice/model"));
        assert!(!p.matches("/ws/alice/x/vdb1"));
    }

    #[test]
    fn multi_segment_wildcard() {
        let p = PathPattern::parse("/lib/**").unwrap();
        assert!(p.matches("/lib"));
        assert!(p.matches("/lib/a/b/c"));
        assert!(!p.matches("/library"));

        let p = PathPattern::parse("/**/column*").unwrap();
        assert!(p.matches("/column1"));
        assert!(p.matches("/a/b/columnX"));
        assert!(!p.matches("/a/b/col"));
    }

    #[test]
    fn inner_glob_pieces() {
        assert!(glob_matches("a*b*c", "aXXbYYc"));
        assert!(glob_matches("a*b*c", "abc"));
        assert!(!glob_matches("a*b*c", "acb"));
        assert!(glob_matches("*", ""));
        assert!(!glob_matches("ab*ba", "aba"));
        assert!(glob_matches("test*", "test1"));
        assert!(glob_matches("oth*", "other"));
        assert!(glob_matches("*2", "test2"));
        assert!(!glob_matches("test1", "test10"));
        assert!(glob_matches("folder", "folder"));
        assert!(glob_matches("a*c*e", "abcde"));
        assert!(!glob_matches("*x", "abc"));
    }

    #[test]
    fn rejects_bad_patterns() {
        assert!(PathPattern::parse("relative/*").is_err());
        assert!(PathPattern::parse("/a/x**").is_err());
    }

    proptest! {
        #[test]
        fn literal_pattern_matches_itself(segs in proptest::collection::vec("[a-z0-9]{1,6}", 0..5)) {
            let raw = format!("/{}", segs.join("/"));
            let p = PathPattern::parse(&raw).unwrap();
            prop_assert_eq!(p.literal_prefix(), p.as_str());
            prop_assert!(p.matches(p.as_str()));
        }

        #[test]
        fn double_star_matches_every_descendant(segs in proptest::collection::vec("[a-z0-9]{1,6}", 1..5)) {
            let p = PathPattern::parse(&format!("/{}/**", segs[0])).unwrap();
            let candidate = format!("/{}", segs.join("/"));
            prop_assert!(p.matches(&candidate));
        }
    }
}
