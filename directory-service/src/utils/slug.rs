use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

/// Lowercase `name` and join its alphanumeric runs with `separator`.
///
/// `slugify("Sales Team (EU)", "-")` gives `sales-team-eu`.
pub fn slugify(name: &str, separator: &str) -> String {
    let lowered = name.to_lowercase();
    NON_ALPHANUMERIC
        .split(&lowered)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Four lowercase hex characters.
pub fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..4].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Sales Team (EU)", "-"), "sales-team-eu");
        assert_eq!(slugify("  Project   X  ", ""), "projectx");
        assert_eq!(slugify("Ünïcode & more", "-"), "n-code-more");
        assert_eq!(slugify("---", "-"), "");
    }

    #[test]
    fn test_random_suffix_is_short_hex() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
