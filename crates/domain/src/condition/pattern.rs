//! Name matching for NPCs and items.

use std::fmt;

use regex::{Regex, RegexBuilder};

/// Case-insensitive name matcher.
///
/// A source that looks like a regular expression (anchored with `^`/`$`, or
/// containing `.*`, `[` or `(`) is compiled as one and must match the whole
/// name. Anything else is a substring match. An empty source matches every
/// name. A source that fails to compile degrades to a substring match.
#[derive(Clone)]
pub struct NamePattern {
    source: String,
    matcher: Matcher,
}

#[derive(Clone)]
enum Matcher {
    Any,
    Substring(String),
    Regex(Regex),
}

impl NamePattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let trimmed = source.trim();

        let matcher = if trimmed.is_empty() {
            Matcher::Any
        } else if looks_like_regex(trimmed) {
            RegexBuilder::new(&format!("^(?:{})$", trimmed))
                .case_insensitive(true)
                .build()
                .map(Matcher::Regex)
                .unwrap_or_else(|_| Matcher::Substring(trimmed.to_lowercase()))
        } else {
            Matcher::Substring(trimmed.to_lowercase())
        };

        Self { source, matcher }
    }

    pub fn is_match(&self, name: &str) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Substring(needle) => name.to_lowercase().contains(needle.as_str()),
            Matcher::Regex(regex) => regex.is_match(name.trim()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches_any(&self) -> bool {
        matches!(self.matcher, Matcher::Any)
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.matcher, Matcher::Regex(_))
    }
}

fn looks_like_regex(source: &str) -> bool {
    source.starts_with('^')
        || source.ends_with('$')
        || source.contains(".*")
        || source.contains('[')
        || source.contains('(')
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamePattern").field(&self.source).finish()
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matches_any() {
            f.write_str("any")
        } else {
            f.write_str(&self.source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_is_case_insensitive_substring() {
        let pattern = NamePattern::new("chaos fanatic");
        assert!(pattern.is_match("Chaos Fanatic"));
        assert!(pattern.is_match("Greater Chaos Fanatic"));
        assert!(!pattern.is_match("Chaos Elemental"));
        assert!(!pattern.is_regex());
    }

    #[test]
    fn metacharacters_switch_to_full_regex_match() {
        let pattern = NamePattern::new("^goblin$");
        assert!(pattern.is_regex());
        assert!(pattern.is_match("Goblin"));
        assert!(!pattern.is_match("Hobgoblin"));

        let alternation = NamePattern::new("(cow|chicken)");
        assert!(alternation.is_match("Chicken"));
        assert!(!alternation.is_match("Cow calf"));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let pattern = NamePattern::new("  ");
        assert!(pattern.matches_any());
        assert!(pattern.is_match("Anything at all"));
    }

    #[test]
    fn invalid_regex_degrades_to_substring() {
        let pattern = NamePattern::new("Rune (g");
        assert!(!pattern.is_regex());
        assert!(pattern.is_match("rune (g)"));
    }
}
