//! Glob matching for `delete_pattern`.
//!
//! Only `*` is special. Backends use [`literal_prefix`] to narrow the key range
//! they have to walk before testing each key with [`glob_match`].

/// Check whether `key` matches `pattern`, where `*` matches any run of characters.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern = pattern.as_bytes();
    let key = key.as_bytes();
    let (mut p_idx, mut k_idx) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);

    while k_idx < key.len() {
        if p_idx < pattern.len() && pattern[p_idx] == b'*' {
            star_idx = Some(p_idx);
            match_idx = k_idx;
            p_idx += 1;
            continue;
        }

        if p_idx < pattern.len() && pattern[p_idx] == key[k_idx] {
            p_idx += 1;
            k_idx += 1;
            continue;
        }

        // Backtrack: let the last star swallow one more character.
        if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            k_idx = match_idx;
            continue;
        }

        return false;
    }

    while p_idx < pattern.len() && pattern[p_idx] == b'*' {
        p_idx += 1;
    }

    p_idx == pattern.len()
}

/// The part of `pattern` before its first `*`.
///
/// Every key matching the pattern starts with this prefix.
pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find('*') {
        Some(pos) => &pattern[..pos],
        None => pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(glob_match("USER_PERM_TREE_a_b_None", "USER_PERM_TREE_a_b_None"));
        assert!(!glob_match("USER_PERM_TREE_a_b_None", "USER_PERM_TREE_a_b_Nonf"));
    }

    #[test]
    fn trailing_star() {
        assert!(glob_match("USER_PERM_TREE_org1_*", "USER_PERM_TREE_org1_u1_None"));
        assert!(!glob_match("USER_PERM_TREE_org1_*", "USER_PERM_TREE_org2_u1_None"));
        assert!(glob_match("USER_PERM_TREE_*", "USER_PERM_TREE_"));
    }

    #[test]
    fn inner_star_backtracks() {
        assert!(glob_match("a*c*e", "abcdcde"));
        assert!(glob_match("*_None", "USER_PERM_TREE_x_y_None"));
        assert!(!glob_match("a*c*e", "abcd"));
    }

    #[test]
    fn lone_star_matches_everything() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn prefix_extraction() {
        assert_eq!(literal_prefix("USER_PERM_TREE_org1_*"), "USER_PERM_TREE_org1_");
        assert_eq!(literal_prefix("no-star"), "no-star");
        assert_eq!(literal_prefix("*tail"), "");
    }
}
