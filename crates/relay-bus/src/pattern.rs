//! Dot-segment wildcard matching.
//!
//! `*` matches exactly one segment; `**` matches zero or more segments and may
//! appear anywhere in the pattern. Matching is case-sensitive and must cover
//! the whole event type.

/// One parsed pattern segment.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Globstar,
}

/// A parsed subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse a pattern string.
    ///
    /// Runs of consecutive `**` segments are collapsed into one: they accept
    /// exactly the same types, and the collapse keeps backtracking bounded.
    pub fn parse(raw: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::new();
        for part in raw.split('.') {
            let segment = match part {
                "**" => Segment::Globstar,
                "*" => Segment::Single,
                lit => Segment::Literal(lit.to_owned()),
            };
            if segment == Segment::Globstar && segments.last() == Some(&Segment::Globstar) {
                continue;
            }
            segments.push(segment);
        }
        Self {
            raw: raw.to_owned(),
            segments,
        }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains no wildcards.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Whether `event_type` is accepted by this pattern.
    pub fn matches(&self, event_type: &str) -> bool {
        let parts: Vec<&str> = event_type.split('.').collect();
        match_segments(&self.segments, &parts)
    }
}

/// One-shot convenience: parse `pattern` and test `event_type`.
pub fn matches(pattern: &str, event_type: &str) -> bool {
    Pattern::parse(pattern).matches(event_type)
}

fn match_segments(pattern: &[Segment], parts: &[&str]) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return parts.is_empty();
    };
    match head {
        Segment::Globstar => {
            if rest.is_empty() {
                return true;
            }
            (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..]))
        }
        Segment::Single => parts
            .split_first()
            .is_some_and(|(_, tail)| match_segments(rest, tail)),
        Segment::Literal(lit) => parts
            .split_first()
            .is_some_and(|(part, tail)| *part == lit.as_str() && match_segments(rest, tail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_wildcard_matches_one_segment() {
        assert!(matches("agent.*", "agent.step"));
        assert!(!matches("agent.*", "agent.step.detail"));
        assert!(!matches("agent.*", "agent"));
    }

    #[test]
    fn globstar_matches_zero_or_more() {
        assert!(matches("agent.**", "agent.step"));
        assert!(matches("agent.**", "agent.step.detail"));
        assert!(matches("agent.**", "agent"));
        assert!(!matches("agent.**", "tool.step"));
    }

    #[test]
    fn embedded_globstar_backtracks() {
        assert!(matches("agent.**.done", "agent.done"));
        assert!(matches("agent.**.done", "agent.a.b.c.done"));
        assert!(!matches("agent.**.done", "agent.a.b.c.done.x"));
        assert!(matches("**.done", "done"));
        assert!(matches("a.**.b.**.c", "a.x.b.y.z.c"));
        assert!(!matches("a.**.b.**.c", "a.x.y.c"));
    }

    #[test]
    fn bare_globstar_matches_everything() {
        assert!(matches("**", "agent"));
        assert!(matches("**", "a.b.c.d"));
    }

    #[test]
    fn literal_requires_full_coverage() {
        assert!(matches("agent.complete", "agent.complete"));
        assert!(!matches("agent", "agent.complete"));
        assert!(!matches("agent.complete", "agent"));
        assert!(!matches("agent.complete", "agent.completed"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!matches("Agent.*", "agent.step"));
    }

    #[test]
    fn consecutive_globstars_collapse() {
        let p = Pattern::parse("a.**.**.**.b");
        assert_eq!(p.segments.len(), 3);
        assert_eq!(p.as_str(), "a.**.**.**.b");
        assert!(p.matches("a.b"));
        assert!(p.matches("a.x.y.b"));
    }

    #[test]
    fn is_literal() {
        assert!(Pattern::parse("agent.complete").is_literal());
        assert!(!Pattern::parse("agent.*").is_literal());
    }

    #[test]
    fn many_globstars_stay_fast() {
        let pattern = "**.x.**.x.**.x.**.y";
        let event_type = vec!["x"; 40].join(".");
        assert!(!matches(pattern, &event_type));
    }

    proptest! {
        #[test]
        fn literal_pattern_matches_itself(parts in prop::collection::vec("[a-z]{1,6}", 1..6)) {
            let t = parts.join(".");
            prop_assert!(matches(&t, &t));
        }

        #[test]
        fn globstar_suffix_matches_any_extension(
            prefix in prop::collection::vec("[a-z]{1,6}", 1..4),
            suffix in prop::collection::vec("[a-z]{1,6}", 0..4),
        ) {
            let pattern = format!("{}.**", prefix.join("."));
            let mut all = prefix.clone();
            all.extend(suffix);
            prop_assert!(matches(&pattern, &all.join(".")));
        }

        #[test]
        fn single_wildcards_fix_depth(parts in prop::collection::vec("[a-z]{1,6}", 1..7)) {
            let pattern = vec!["*"; parts.len()].join(".");
            prop_assert!(matches(&pattern, &parts.join(".")));
            let deeper = format!("{}.extra", parts.join("."));
            prop_assert!(!matches(&pattern, &deeper));
        }
    }
}
