use crate::received::parse_ip_literal;

/// Minimal host name comparison utilities
pub struct DomainUtils;

impl DomainUtils {
    /// Extract domain from email address
    pub fn extract_domain(email: &str) -> Option<String> {
        email
            .trim_matches(|c: char| c == '<' || c == '>')
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_lowercase())
            .filter(|domain| !domain.is_empty())
    }

    /// Canonicalize host (lowercase, strip brackets and the root dot)
    pub fn canonicalize_host(host: &str) -> String {
        host.trim()
            .trim_matches(|c: char| c == '[' || c == ']')
            .trim_end_matches('.')
            .to_lowercase()
    }

    /// Check if `domain` is `parent` or lies underneath it
    /// Examples:
    /// - is_subdomain_of("mx1.example.com", "example.com") -> true
    /// - is_subdomain_of("notexample.com", "example.com") -> false
    pub fn is_subdomain_of(domain: &str, parent: &str) -> bool {
        let domain = Self::canonicalize_host(domain);
        let parent = Self::canonicalize_host(parent);
        if parent.is_empty() {
            return false;
        }
        if domain == parent {
            return true;
        }

        domain.len() > parent.len()
            && domain.ends_with(&parent)
            && domain[..domain.len() - parent.len()].ends_with('.')
    }

    /// Whether two stated host names plausibly name the same system.
    ///
    /// Comparison is case-insensitive and tolerates one side being a
    /// truncated form of the other (`mx1` vs `mx1.example.com`). IP literals
    /// match when they parse to the same address.
    pub fn hosts_match(a: &str, b: &str) -> bool {
        if let (Some(ip_a), Some(ip_b)) = (parse_ip_literal(a), parse_ip_literal(b)) {
            return ip_a == ip_b;
        }

        let a = Self::canonicalize_host(a);
        let b = Self::canonicalize_host(b);
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }

        let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
        long.starts_with(short.as_str()) && long[short.len()..].starts_with('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            DomainUtils::extract_domain("<user@Example.com>"),
            Some("example.com".to_string())
        );
        assert_eq!(DomainUtils::extract_domain("invalid"), None);
    }

    #[test]
    fn test_hosts_match() {
        assert!(DomainUtils::hosts_match("mx.example.com", "MX.Example.COM."));
        assert!(DomainUtils::hosts_match("mx1", "mx1.example.com"));
        assert!(DomainUtils::hosts_match("[192.0.2.1]", "192.0.2.1"));
        assert!(!DomainUtils::hosts_match("a.example.com", "b.example.com"));
        assert!(!DomainUtils::hosts_match("mx", "mx1.example.com"));
        assert!(!DomainUtils::hosts_match("", "mx.example.com"));
    }

    #[test]
    fn test_is_subdomain_of() {
        assert!(DomainUtils::is_subdomain_of("mx1.example.com", "example.com"));
        assert!(DomainUtils::is_subdomain_of("example.com", "Example.com"));
        assert!(!DomainUtils::is_subdomain_of("example.com", "mx1.example.com"));
        assert!(!DomainUtils::is_subdomain_of("notexample.com", "example.com"));
    }

    #[test]
    fn test_canonicalize_host() {
        assert_eq!(
            DomainUtils::canonicalize_host("Mail.Example.com."),
            "mail.example.com"
        );
        assert_eq!(DomainUtils::canonicalize_host("[10.0.0.1]"), "10.0.0.1");
    }
}
