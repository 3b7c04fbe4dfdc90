//! Redis-style glob patterns for pattern subscriptions

use regex::Regex;

/// Compiled glob pattern supporting `*`, `?`, `[...]` and `\` escapes
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    regex: Option<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            regex: Regex::new(&glob_to_regex(pattern)).ok(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(topic),
            // Unbalanced classes and the like degrade to a literal match.
            None => self.raw == topic,
        }
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_spans_dots() {
        let p = GlobPattern::new("outbound.discord.*");
        assert!(p.matches("outbound.discord.g1.c1"));
        assert!(p.matches("outbound.discord."));
        assert!(!p.matches("outbound.slack.g1.c1"));
    }

    #[test]
    fn test_question_mark_and_class() {
        let p = GlobPattern::new("h?llo");
        assert!(p.matches("hello"));
        assert!(!p.matches("hllo"));

        let p = GlobPattern::new("h[ae]llo");
        assert!(p.matches("hallo"));
        assert!(!p.matches("hillo"));

        let p = GlobPattern::new("h[^e]llo");
        assert!(p.matches("hallo"));
        assert!(!p.matches("hello"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let p = GlobPattern::new("gw1+test.(x)");
        assert!(p.matches("gw1+test.(x)"));
        assert!(!p.matches("gw11test.(x)"));

        let p = GlobPattern::new(r"a\*b");
        assert!(p.matches("a*b"));
        assert!(!p.matches("axb"));
    }
}
