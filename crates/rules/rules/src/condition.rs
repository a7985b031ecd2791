use warden_core::{Condition, RequestContext};

/// Match a single condition against `ctx`. A rule fires only when every one
/// of its conditions matches, so this never needs to know about the rest of
/// the rule.
#[must_use]
pub fn matches(condition: &Condition, ctx: &RequestContext) -> bool {
    match condition {
        Condition::Equals { field, value } => ctx
            .field(field)
            .is_some_and(|actual| actual.eq_ignore_ascii_case(value)),
        Condition::Glob { field, pattern } => ctx
            .field(field)
            .is_some_and(|actual| glob_match(pattern, &actual)),
        Condition::NumericLte { field, bound } => ctx
            .field(field)
            .and_then(|actual| actual.parse::<f64>().ok())
            .is_some_and(|actual| actual <= *bound),
        Condition::Interval { field, low, high } => ctx
            .field(field)
            .and_then(|actual| actual.parse::<f64>().ok())
            .is_some_and(|actual| actual >= *low && actual <= *high),
    }
}

/// Shell-style glob with only `*` (any run of characters) and `?` (single
/// character) as wildcards, matched case-insensitively.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let text: Vec<char> = text.to_ascii_lowercase().chars().collect();
    glob_rec(&pattern, &text)
}

fn glob_rec(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            glob_rec(&pattern[1..], text)
                || (!text.is_empty() && glob_rec(pattern, &text[1..]))
        }
        Some('?') => !text.is_empty() && glob_rec(&pattern[1..], &text[1..]),
        Some(c) => text.first() == Some(c) && glob_rec(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_suffix() {
        assert!(glob_match("gpt-4*", "gpt-4-turbo"));
        assert!(glob_match("gpt-4*", "gpt-4"));
        assert!(!glob_match("gpt-4*", "gpt-3.5-turbo"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(glob_match("gpt-?", "gpt-4"));
        assert!(!glob_match("gpt-?", "gpt-40"));
    }

    #[test]
    fn glob_is_case_insensitive() {
        assert!(glob_match("GPT-4*", "gpt-4-turbo"));
    }

    #[test]
    fn exact_pattern_with_no_wildcards() {
        assert!(glob_match("gpt-4", "gpt-4"));
        assert!(!glob_match("gpt-4", "gpt-40"));
    }
}
