//! Configuration validation.
//!
//! Serde handles the syntax; this checks the few semantic rules the router
//! depends on. All violations are reported, not just the first.

use crate::config::schema::Configuration;

/// Path prefixes owned by the built-in endpoints.
const RESERVED_PREFIXES: &[&str] = &["/api", "/debug", "/health"];

/// Validate a freshly parsed configuration.
pub fn validate_config(config: &Configuration) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let path = config.server.path.as_str();
    if !path.starts_with('/') {
        errors.push(format!("server.path '{}' must start with '/'", path));
    } else if path == "/" || path.contains('{') || path.contains('*') {
        errors.push(format!("server.path '{}' must be a plain sub-path", path));
    } else if RESERVED_PREFIXES
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{}/", prefix)))
    {
        errors.push(format!("server.path '{}' collides with a built-in endpoint", path));
    }

    if config.server.port == 0 {
        errors.push("server.port must be non-zero".to_string());
    }

    for (user, record) in &config.users {
        if user.is_empty() {
            errors.push("users contains an empty user identifier".to_string());
        }
        if record.token.is_empty() {
            errors.push(format!("users.{}.token must not be empty", user));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
