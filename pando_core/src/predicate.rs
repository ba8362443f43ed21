//! Tag predicates - decide whether a unit may run against an entry.
//!
//! A predicate is a pure function of an immutable tag snapshot. It holds iff
//! every required tag is present and no excluded tag is present. Units
//! always exclude their own terminal and wait tags, which is what keeps
//! repeated evaluation from re-triggering finished or parked work.

use pando_env::TagSet;

/// `required_all` / `excluded_any` eligibility check.
pub fn eligible(tags: &TagSet, required_all: &[String], excluded_any: &[String]) -> bool {
    required_all.iter().all(|t| tags.contains(t)) && !excluded_any.iter().any(|t| tags.contains(t))
}

/// A reusable eligibility predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPredicate {
    /// Every one of these tags must be present
    pub required_all: Vec<String>,

    /// None of these tags may be present
    pub excluded_any: Vec<String>,
}

impl TagPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required tag.
    pub fn require(mut self, tag: impl Into<String>) -> Self {
        self.required_all.push(tag.into());
        self
    }

    /// Adds an excluded tag.
    pub fn exclude(mut self, tag: impl Into<String>) -> Self {
        self.excluded_any.push(tag.into());
        self
    }

    /// Evaluates the predicate against a tag snapshot.
    pub fn eligible(&self, tags: &TagSet) -> bool {
        eligible(tags, &self.required_all, &self.excluded_any)
    }
}

/// Decodes a parameterized tag such as `"from=42"` into its parsed value.
///
/// Returns `None` if no tag has the prefix or the suffix does not parse.
pub fn tag_param<T: std::str::FromStr>(tags: &TagSet, prefix: &str) -> Option<T> {
    tags.value_of(prefix).and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> TagSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_required_and_excluded() {
        let p = TagPredicate::new()
            .require("BTC")
            .require("TX")
            .exclude("vals:done")
            .exclude("vals:fail");

        assert!(p.eligible(&tags(&["TX", "BTC"])));
        assert!(!p.eligible(&tags(&["BTC"])));
        assert!(!p.eligible(&tags(&["BTC", "TX", "vals:done"])));
        assert!(!p.eligible(&tags(&["BTC", "TX", "vals:fail"])));
    }

    #[test]
    fn test_case_sensitive() {
        let p = TagPredicate::new().require("BTC");
        assert!(!p.eligible(&tags(&["btc"])));
    }

    #[test]
    fn test_empty_predicate_matches_everything() {
        assert!(TagPredicate::new().eligible(&tags(&[])));
    }

    #[test]
    fn test_tag_param() {
        let t = tags(&["from=17", "name=abc"]);
        assert_eq!(tag_param::<i64>(&t, "from="), Some(17));
        assert_eq!(tag_param::<i64>(&t, "name="), None);
        assert_eq!(tag_param::<String>(&t, "name="), Some("abc".to_string()));
        assert_eq!(tag_param::<i64>(&t, "to="), None);
    }
}
