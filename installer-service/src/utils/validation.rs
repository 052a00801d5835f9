// Input format checks used by the step validator and the database collaborators.

use regex::Regex;
use std::sync::OnceLock;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Pattern is a literal; compilation cannot fail at runtime.
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
            .unwrap_or_else(|_| unreachable!("email pattern is valid"))
    })
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .unwrap_or_else(|_| unreachable!("identifier pattern is valid"))
    })
}

/// Address-format check (local@domain with at least one dot in the domain).
pub fn is_valid_email(value: &str) -> bool {
    let v = value.trim();
    v.len() <= 254 && email_re().is_match(v)
}

/// TCP port in 1..=65535.
pub fn parse_port(value: &str) -> Option<u16> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(p) => Some(p),
    }
}

/// Absolute http(s) URL with a host.
pub fn is_http_url(value: &str) -> bool {
    match url::Url::parse(value.trim()) {
        Ok(u) => (u.scheme() == "http" || u.scheme() == "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

/// Validate a MySQL database name (letters, digits, underscore; 1-64 chars).
pub fn validate_database_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("database name is required".to_string());
    }
    if name.len() > 64 {
        return Err("database name must be 64 characters or fewer".to_string());
    }
    if !identifier_re().is_match(name) {
        return Err(
            "database name must start with a letter or underscore and contain only letters, numbers and underscores"
                .to_string(),
        );
    }
    let reserved = ["mysql", "information_schema", "performance_schema", "sys"];
    if reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(format!("'{}' is a reserved database name", name));
    }
    Ok(())
}

/// Backtick-quote a MySQL identifier.
pub fn quote_mysql_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_accepts_common_addresses() {
        assert!(is_valid_email("bob@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(is_valid_email("  padded@example.com "));
    }

    #[test]
    fn email_rejects_malformed_addresses() {
        assert!(!is_valid_email("bob"));
        assert!(!is_valid_email("bob@"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("bob@localhost"));
        assert!(!is_valid_email("bob@@example.com"));
        assert!(!is_valid_email("bob smith@example.com"));
    }

    #[test]
    fn port_bounds() {
        assert_eq!(parse_port("3306"), Some(3306));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_port("33o6"), None);
    }

    #[test]
    fn http_url_requires_scheme_and_host() {
        assert!(is_http_url("https://church.example.org"));
        assert!(is_http_url("http://10.0.0.5:8080/app"));
        assert!(!is_http_url("ftp://example.org"));
        assert!(!is_http_url("example.org"));
        assert!(!is_http_url(""));
    }

    #[test]
    fn database_name_rules() {
        assert!(validate_database_name("app_db").is_ok());
        assert!(validate_database_name("_private").is_ok());
        assert!(validate_database_name("").is_err());
        assert!(validate_database_name("1db").is_err());
        assert!(validate_database_name("my-db").is_err());
        assert!(validate_database_name("mysql").is_err());
        assert!(validate_database_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn backtick_quoting_escapes_backticks() {
        assert_eq!(quote_mysql_identifier("app"), "`app`");
        assert_eq!(quote_mysql_identifier("a`b"), "`a``b`");
    }
}
