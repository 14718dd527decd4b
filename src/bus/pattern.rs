//! # Subscription patterns.
//!
//! A [`Pattern`] is compared with an [`EventName`] segment by segment:
//!
//! ```text
//! pattern:  sre :: *     :: app :: **
//! name:     sre :: alice :: app :: start :: v2
//!                  └─ capture       └────┴── captures (rest)
//! ```
//!
//! - a literal segment matches itself;
//! - `*` matches exactly one segment;
//! - a trailing `**` matches the remaining segments, including none;
//! - `**` anywhere else behaves like `*`;
//! - lengths must agree unless the pattern ends with `**`.

use std::fmt;

use super::event::{DEFAULT_DELIMITER, EventName};

const ONE: &str = "*";
const REST: &str = "**";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Rest,
}

/// Precompiled subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses `pattern` split by `delimiter`.
    pub fn parse(pattern: &str, delimiter: &str) -> Self {
        let name = EventName::parse(pattern, delimiter);
        let last = name.len().saturating_sub(1);
        let segments = name
            .segments()
            .iter()
            .enumerate()
            .map(|(i, s)| match s.as_str() {
                REST if i == last => Segment::Rest,
                ONE | REST => Segment::One,
                _ => Segment::Literal(s.clone()),
            })
            .collect();
        Self { segments }
    }

    /// Whether the pattern contains wildcards.
    pub fn is_wildcard(&self) -> bool {
        self.segments.iter().any(|s| !matches!(s, Segment::Literal(_)))
    }

    /// Whether `name` matches.
    pub fn matches(&self, name: &EventName) -> bool {
        self.walk(name, |_| {})
    }

    /// Returns the segments matched by wildcards, in order, or `None` when `name` does not match.
    ///
    /// # Example
    /// ```
    /// use apiary::{EventName, Pattern};
    ///
    /// let pattern = Pattern::from("sre::*::app::**");
    /// let name = EventName::from("sre::alice::app::start::v2");
    /// assert_eq!(pattern.captures(&name).unwrap(), ["alice", "start", "v2"]);
    /// assert!(pattern.captures(&EventName::from("sre::alice::other::start")).is_none());
    /// ```
    pub fn captures<'a>(&self, name: &'a EventName) -> Option<Vec<&'a str>> {
        let mut captured = Vec::new();
        self.walk(name, |s| captured.push(s)).then_some(captured)
    }

    fn walk<'a>(&self, name: &'a EventName, mut capture: impl FnMut(&'a str)) -> bool {
        let segments = name.segments();
        for (i, pattern) in self.segments.iter().enumerate() {
            if *pattern == Segment::Rest {
                let Some(rest) = segments.get(i..) else {
                    return false;
                };
                rest.iter().for_each(|s| capture(s.as_str()));
                return true;
            }
            let Some(segment) = segments.get(i) else {
                return false;
            };
            match pattern {
                Segment::Literal(literal) if literal != segment => return false,
                Segment::Literal(_) => {}
                Segment::One | Segment::Rest => capture(segment.as_str()),
            }
        }
        segments.len() == self.segments.len()
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Self {
        Pattern::parse(pattern, DEFAULT_DELIMITER)
    }
}

impl From<&EventName> for Pattern {
    fn from(name: &EventName) -> Self {
        Self {
            segments: name
                .segments()
                .iter()
                .cloned()
                .map(Segment::Literal)
                .collect(),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(DEFAULT_DELIMITER)?;
            }
            match segment {
                Segment::Literal(s) => f.write_str(s)?,
                Segment::One => f.write_str(ONE)?,
                Segment::Rest => f.write_str(REST)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> EventName {
        EventName::from(s)
    }

    #[test]
    fn test_wildcard_routing_captures_segments() {
        let p = Pattern::from("sre::*::app::**");
        assert_eq!(
            p.captures(&name("sre::alice::app::start::v2")),
            Some(vec!["alice", "start", "v2"])
        );
        assert!(!p.matches(&name("sre::alice::other::start")));
    }

    #[test]
    fn test_trailing_rest_matches_zero_segments() {
        let p = Pattern::from("sre::*::app::**");
        assert_eq!(p.captures(&name("sre::bob::app")), Some(vec!["bob"]));
        assert!(!p.matches(&name("sre::bob")));
    }

    #[test]
    fn test_single_wildcard_needs_exact_length() {
        let p = Pattern::from("*::exit");
        assert!(p.matches(&name("alice::exit")));
        assert!(!p.matches(&name("exit")));
        assert!(!p.matches(&name("a::b::exit")));
    }

    #[test]
    fn test_literal_pattern() {
        let p = Pattern::from("service::start");
        assert!(!p.is_wildcard());
        assert!(p.matches(&name("service::start")));
        assert!(!p.matches(&name("service::start::now")));
        assert!(!p.matches(&name("service")));
    }

    #[test]
    fn test_inner_rest_acts_as_single_wildcard() {
        let p = Pattern::from("a::**::c");
        assert!(p.matches(&name("a::b::c")));
        assert!(!p.matches(&name("a::b::x::c")));
        assert_eq!(p.to_string(), "a::*::c");
    }

    #[test]
    fn test_lone_rest_matches_everything() {
        let p = Pattern::from("**");
        assert!(p.matches(&name("")));
        assert!(p.matches(&name("a::b::c")));
    }

    #[test]
    fn test_custom_delimiter() {
        let p = Pattern::parse("log.*.exit", ".");
        assert!(p.matches(&EventName::parse("log.alice.exit", ".")));
    }
}
