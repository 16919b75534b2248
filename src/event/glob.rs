// =============================================================================
// Minimal glob matcher — `*` matches any run of characters, including dots
// =============================================================================
//
// The bus's subscription patterns only ever need `*` (no `?`, no character
// classes), so a small hand-rolled matcher is clearer than pulling in a glob
// crate for one operator.

/// Match `subject` against `pattern`, where `*` in `pattern` matches any run
/// of characters (including the empty run and dots).
pub fn glob_match(pattern: &str, subject: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let sub: Vec<char> = subject.chars().collect();
    match_from(&pat, &sub)
}

fn match_from(pat: &[char], sub: &[char]) -> bool {
    match pat.first() {
        None => sub.is_empty(),
        Some('*') => {
            // `*` matches zero or more characters: try every split point.
            let rest = &pat[1..];
            if match_from(rest, sub) {
                return true;
            }
            for i in 0..sub.len() {
                if match_from(rest, &sub[i + 1..]) {
                    return true;
                }
            }
            false
        }
        Some(c) => match sub.first() {
            Some(s) if s == c => match_from(&pat[1..], &sub[1..]),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(glob_match("order.created", "order.created"));
        assert!(!glob_match("order.created", "order.updated"));
    }

    #[test]
    fn star_matches_single_segment() {
        assert!(glob_match("order.*", "order.created"));
        assert!(glob_match("order.*", "order.filled"));
    }

    #[test]
    fn star_matches_multi_segment_with_dots() {
        assert!(glob_match("order.*", "order.created.success"));
    }

    #[test]
    fn bare_star_matches_everything() {
        assert!(glob_match("*", "order.created"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn no_match_on_prefix_mismatch() {
        assert!(!glob_match("order.*", "trading.order.create"));
    }
}
