//! Pure pattern matching functions for cache keys.
//!
//! Patterns follow the glob dialect of Redis `KEYS`/`SCAN MATCH`, so both
//! cache tiers agree on which keys a pattern covers:
//!
//! - `*` matches any sequence of characters (including none)
//! - `?` matches exactly one character
//! - `[abc]` matches one of the listed characters, `[a-z]` one in the range
//!   (bounds in either order), `[^...]` one character not in the class
//! - `\` escapes the next character so it matches literally, also inside a
//!   class

use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Literal(char),
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

impl Token {
    /// Whether this token accepts `c` as its next character.
    fn accepts(&self, c: char) -> bool {
        match self {
            Token::Any | Token::One => true,
            Token::Literal(literal) => *literal == c,
            Token::Class { negated, items } => {
                let listed = items.iter().any(|item| match *item {
                    ClassItem::Char(x) => x == c,
                    ClassItem::Range(lo, hi) => lo <= c && c <= hi,
                });
                listed != *negated
            }
        }
    }
}

/// Parses a class body; the opening `[` is already consumed. An
/// unterminated class runs to the end of the pattern, like Redis.
fn class(chars: &mut Peekable<Chars<'_>>) -> Token {
    let negated = chars.next_if_eq(&'^').is_some();
    let mut items = Vec::new();

    while let Some(c) = chars.next() {
        match c {
            ']' => break,
            '\\' => items.push(ClassItem::Char(chars.next().unwrap_or('\\'))),
            start => {
                let mut ahead = chars.clone();
                match (ahead.next(), ahead.next()) {
                    (Some('-'), Some(end)) => {
                        chars.next();
                        chars.next();
                        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                        items.push(ClassItem::Range(lo, hi));
                    }
                    _ => items.push(ClassItem::Char(start)),
                }
            }
        }
    }

    Token::Class { negated, items }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        let token = match c {
            '*' => Token::Any,
            '?' => Token::One,
            '[' => class(&mut chars),
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            other => Token::Literal(other),
        };
        // Adjacent wildcards behave like a single one
        if token == Token::Any && tokens.last() == Some(&Token::Any) {
            continue;
        }
        tokens.push(token);
    }

    tokens
}

/// Checks if a cache key matches a glob pattern.
///
/// # Examples
///
/// ```
/// use techstore_core::cache::pattern_matches;
///
/// assert!(pattern_matches("user:*", "user:42"));
/// assert!(pattern_matches("product:?", "product:7"));
/// assert!(!pattern_matches("product:?", "product:42"));
/// assert!(pattern_matches("user:[12]", "user:2"));
/// assert!(pattern_matches(r"rate\*limit", "rate*limit"));
/// ```
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    let tokens = tokenize(pattern);
    let key: Vec<char> = key.chars().collect();

    let mut p = 0;
    let mut k = 0;
    // Position of the last `*` seen and the key index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if let Some(token) = tokens.get(p) {
            if *token == Token::Any {
                backtrack = Some((p, k));
                p += 1;
                continue;
            }
            if token.accepts(key[k]) {
                p += 1;
                k += 1;
                continue;
            }
        }

        match backtrack {
            Some((star, absorbed)) => {
                // Let the last `*` swallow one more character and retry
                p = star + 1;
                k = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }

    tokens[p..].iter().all(|t| *t == Token::Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(pattern_matches("user:123", "user:123"));
        assert!(!pattern_matches("user:123", "user:456"));
        assert!(!pattern_matches("user:123", "user:1234"));
    }

    #[test]
    fn test_wildcard_at_end() {
        assert!(pattern_matches("user:*", "user:anything-goes-here"));
        assert!(pattern_matches("user:*", "user:"));
        assert!(!pattern_matches("user:*", "product:1"));
    }

    #[test]
    fn test_wildcard_at_start() {
        assert!(pattern_matches("*:profile", "user:1:profile"));
        assert!(!pattern_matches("*:profile", "user:1:settings"));
    }

    #[test]
    fn test_wildcard_in_middle() {
        assert!(pattern_matches("order:*:items", "order:99:items"));
        assert!(pattern_matches("order:*:items", "order:a:b:c:items"));
        assert!(!pattern_matches("order:*:items", "order:99:total"));
    }

    #[test]
    fn test_multiple_wildcards() {
        assert!(pattern_matches("*:*:*", "a:b:c"));
        assert!(pattern_matches("*:middle:*", "start:middle:end"));
        assert!(!pattern_matches("*:middle:*", "start:other:end"));
    }

    #[test]
    fn test_backtracking() {
        // First candidate for "ab" is not the one that lets the rest match
        assert!(pattern_matches("*ab*cd", "xxabyyabzzcd"));
        assert!(pattern_matches("a*b*c", "abbbbc"));
        assert!(!pattern_matches("a*b*c", "abbbb"));
    }

    #[test]
    fn test_single_character_wildcard() {
        assert!(pattern_matches("product:?", "product:7"));
        assert!(!pattern_matches("product:?", "product:"));
        assert!(!pattern_matches("product:?", "product:42"));
        assert!(pattern_matches("ip:?.?.?.?", "ip:1.2.3.4"));
    }

    #[test]
    fn test_escaped_characters() {
        assert!(pattern_matches(r"rate\*limit", "rate*limit"));
        assert!(!pattern_matches(r"rate\*limit", "rate-limit"));
        assert!(pattern_matches(r"what\?", "what?"));
        assert!(!pattern_matches(r"what\?", "whatx"));
    }

    #[test]
    fn test_character_class() {
        assert!(pattern_matches("user:[12]", "user:1"));
        assert!(pattern_matches("user:[12]", "user:2"));
        assert!(!pattern_matches("user:[12]", "user:3"));
        assert!(!pattern_matches("user:[12]", "user:12"));
        assert!(pattern_matches("user:[12]*", "user:12"));
    }

    #[test]
    fn test_character_class_ranges() {
        assert!(pattern_matches("order:[a-c]", "order:b"));
        assert!(!pattern_matches("order:[a-c]", "order:d"));
        // Reversed bounds are accepted
        assert!(pattern_matches("order:[c-a]", "order:a"));
        assert!(pattern_matches("v[0-9][0-9]", "v42"));
        assert!(!pattern_matches("v[0-9][0-9]", "v4x"));
    }

    #[test]
    fn test_negated_character_class() {
        assert!(pattern_matches("user:[^1]", "user:2"));
        assert!(!pattern_matches("user:[^1]", "user:1"));
        assert!(!pattern_matches("user:[^0-9]", "user:7"));
        assert!(pattern_matches("user:[^0-9]", "user:x"));
    }

    #[test]
    fn test_escapes_inside_class() {
        assert!(pattern_matches(r"key:[\]]", "key:]"));
        assert!(pattern_matches(r"key:[\-x]", "key:-"));
        assert!(!pattern_matches(r"key:[\-x]", "key:a"));
        // A class with a literal bracket and star
        assert!(pattern_matches("key:[*]", "key:*"));
        assert!(!pattern_matches("key:[*]", "key:a"));
    }

    #[test]
    fn test_unterminated_class() {
        assert!(pattern_matches("user:[12", "user:1"));
        assert!(!pattern_matches("user:[12", "user:3"));
    }

    #[test]
    fn test_wildcard_only() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("*", ""));
        assert!(pattern_matches("**", "anything"));
    }

    #[test]
    fn test_empty_pattern_and_key() {
        assert!(pattern_matches("", ""));
        assert!(!pattern_matches("", "non-empty"));
        assert!(!pattern_matches("non-empty", ""));
        assert!(!pattern_matches("prefix:*", ""));
    }

    #[test]
    fn test_multibyte_keys() {
        assert!(pattern_matches("café:?", "café:é"));
        assert!(pattern_matches("*:ü", "straße:ü"));
    }
}
