use crate::common::data::{Pattern, PatternMatcher};

impl PatternMatcher for regex::Regex {
    fn matches(&self, value: &str) -> bool {
        self.is_match(value)
    }
}

/// Decides whether `value` satisfies `pattern`. Exact patterns compare case-sensitively;
/// callers lowercase host and method values on both sides beforehand.
pub(crate) fn matches(pattern: &Pattern, value: &str) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::Exact(expected) => expected == value,
        Pattern::Custom(matcher) => matcher.matches(value),
    }
}

pub(crate) fn lowercase(pattern: Pattern) -> Pattern {
    match pattern {
        Pattern::Exact(value) => Pattern::Exact(value.to_lowercase()),
        other => other,
    }
}
