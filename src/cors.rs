//! CORS headers for browser uploads.

use crate::config::Config;

/// Headers for a normal response to `origin`. Empty for unknown origins.
pub fn response_headers(config: &Config, origin: Option<&str>) -> Vec<(&'static str, String)> {
    let origin = match origin {
        Some(o) if config.is_origin_allowed(o) => o,
        _ => return Vec::new(),
    };

    let mut headers = vec![
        ("Access-Control-Allow-Origin", origin.to_string()),
        ("Vary", "Origin".to_string()),
    ];
    if config.cors.allow_credentials {
        headers.push(("Access-Control-Allow-Credentials", "true".to_string()));
    }
    headers
}

/// Headers for a preflight (`OPTIONS`) response.
pub fn preflight_headers(config: &Config, origin: Option<&str>) -> Vec<(&'static str, String)> {
    let mut headers = response_headers(config, origin);
    if headers.is_empty() {
        return headers;
    }

    headers.push((
        "Access-Control-Allow-Methods",
        config.cors.allowed_methods.join(", "),
    ));
    headers.push((
        "Access-Control-Allow-Headers",
        config.cors.allowed_headers.join(", "),
    ));
    headers
}
