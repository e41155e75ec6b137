//! Domain pattern matching for external-payment allow-lists.

/// Match a domain pattern against a target domain.
///
/// - `api.example.com` matches only itself.
/// - `*.example.com` matches `sub.example.com` and `a.b.example.com`, but
///   not `example.com`: the wildcard requires at least one label before the
///   dot boundary.
/// - Comparison is case-insensitive.
#[must_use]
pub fn match_domain(pattern: &str, target: &str) -> bool {
    let p = pattern.to_ascii_lowercase();
    let t = target.to_ascii_lowercase();

    if p == t {
        return true;
    }

    // Wildcard: "*.example.com" -> suffix ".example.com"
    if let Some(rest) = p.strip_prefix('*') {
        if rest.starts_with('.') {
            return t.ends_with(rest) && t.len() > rest.len();
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(match_domain("api.example.com", "api.example.com"));
        assert!(!match_domain("api.example.com", "www.example.com"));
        assert!(!match_domain("api.example.com", "example.com"));
    }

    #[test]
    fn wildcard_matches_subdomains() {
        assert!(match_domain("*.example.com", "sub.example.com"));
        assert!(match_domain("*.example.com", "a.b.example.com"));
    }

    #[test]
    fn wildcard_excludes_root_domain() {
        assert!(!match_domain("*.example.com", "example.com"));
    }

    #[test]
    fn wildcard_requires_dot_boundary() {
        // "evilexample.com" ends with "example.com" but not ".example.com".
        assert!(!match_domain("*.example.com", "evilexample.com"));
    }

    #[test]
    fn case_insensitive() {
        assert!(match_domain("API.Example.COM", "api.example.com"));
        assert!(match_domain("*.example.com", "Sub.EXAMPLE.com"));
    }

    #[test]
    fn bare_star_is_not_a_wildcard() {
        assert!(!match_domain("*", "example.com"));
        assert!(!match_domain("*example.com", "sub.example.com"));
    }
}
