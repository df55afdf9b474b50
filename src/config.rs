//! Configuration types for the PDF upload gateway.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upload intake limits.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Cross-origin policy.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Downstream CMS the accepted files are relayed to.
    #[serde(default)]
    pub downstream: DownstreamConfig,

    /// Logging switches.
    #[serde(default)]
    pub settings: Settings,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:3005`.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3005".to_string()
}

/// Upload intake limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Multipart field carrying the file. Also used when forwarding.
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Maximum file size (bytes).
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Accepted declared content types of the file part.
    #[serde(default = "default_content_types")]
    pub content_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field_name: default_field_name(),
            max_size: default_max_size(),
            content_types: default_content_types(),
        }
    }
}

fn default_field_name() -> String {
    "files".to_string()
}

fn default_max_size() -> usize {
    5_242_880 // 5MB
}

fn default_content_types() -> Vec<String> {
    vec!["application/pdf".to_string()]
}

/// Cross-origin policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Origins allowed to call the gateway. `*` allows any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    #[serde(default)]
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            allow_credentials: false,
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_allowed_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

fn default_allowed_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Authorization".to_string()]
}

/// Downstream CMS settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Base URL of the CMS, e.g. `https://cms.example.com`.
    #[serde(default)]
    pub url: String,

    /// Upload endpoint path on the CMS. The gateway serves the same path.
    #[serde(default = "default_upload_path")]
    pub upload_path: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            upload_path: default_upload_path(),
            timeout_ms: default_timeout(),
        }
    }
}

impl DownstreamConfig {
    /// Full URL of the downstream upload endpoint.
    pub fn upload_url(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.upload_path)
    }
}

fn default_upload_path() -> String {
    "/api/upload".to_string()
}

fn default_timeout() -> u64 {
    30000 // 30 seconds
}

/// Logging switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Log rejected uploads with their markers.
    #[serde(default = "default_true")]
    pub log_rejections: bool,

    /// Log accepted uploads.
    #[serde(default)]
    pub log_accepted: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_rejections: true,
            log_accepted: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` first.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;

        if self.upload.max_size == 0 {
            anyhow::bail!("upload.max_size must be greater than 0");
        }

        if self.upload.field_name.is_empty() {
            anyhow::bail!("upload.field_name must not be empty");
        }

        if self.downstream.timeout_ms == 0 {
            anyhow::bail!("downstream.timeout_ms must be greater than 0");
        }

        let url = self.downstream.url.trim();
        if url.is_empty() {
            anyhow::bail!("downstream.url must be set");
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("downstream.url must start with http:// or https://");
        }

        if !self.downstream.upload_path.starts_with('/') {
            anyhow::bail!("downstream.upload_path must start with '/'");
        }

        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .map_err(|e| anyhow::anyhow!("server.listen '{}' is invalid: {}", self.server.listen, e))
    }

    /// Check if a declared file content type is accepted.
    pub fn accepts_content_type(&self, content_type: Option<&str>) -> bool {
        let content_type = match content_type {
            Some(ct) => ct,
            None => return false,
        };

        self.upload
            .content_types
            .iter()
            .any(|pattern| matches_content_type(pattern, content_type))
    }

    /// Check if an origin may call the gateway.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.cors
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# PDF Upload Gateway Configuration

server:
  listen: "0.0.0.0:3005"

# Upload intake
upload:
  field_name: "files"          # multipart field holding the file
  max_size: 5242880            # 5MB max file size
  content_types:               # declared types accepted before scanning
    - "application/pdf"

# Browser origins allowed to upload
cors:
  allowed_origins:
    - "http://localhost:3000"
  allowed_methods:
    - "POST"
  allowed_headers:
    - "Content-Type"
    - "Authorization"
  allow_credentials: false

# CMS that receives files passing the scan
downstream:
  url: "${CMS_URL}"
  upload_path: "/api/upload"
  timeout_ms: 30000            # 30 second forward timeout

settings:
  log_rejections: true
  log_accepted: false
"#
        .to_string()
    }
}

/// Check if a content type matches a pattern.
///
/// Supports:
/// - Exact match: "application/pdf"
/// - Wildcard subtype: "application/*"
/// - Glob suffix: "application/vnd.*"
pub fn matches_content_type(pattern: &str, content_type: &str) -> bool {
    // Drop parameters such as charset
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();

    if let Some(prefix) = pattern.strip_suffix('*') {
        // "application/*" keeps its slash, so "applicationx/foo" does not match
        starts_with_ignore_case(media_type, prefix)
    } else {
        media_type.eq_ignore_ascii_case(pattern)
    }
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    static ENV_VAR: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = ENV_VAR.get_or_init(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
    });

    re.replace_all(content, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            downstream: DownstreamConfig {
                url: "http://cms.local:1337".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_upload_config() {
        let upload = UploadConfig::default();
        assert_eq!(upload.field_name, "files");
        assert_eq!(upload.max_size, 5_242_880);
        assert_eq!(upload.content_types, vec!["application/pdf".to_string()]);
    }

    #[test]
    fn test_default_cors_config() {
        let cors = CorsConfig::default();
        assert_eq!(cors.allowed_origins, vec!["http://localhost:3000".to_string()]);
        assert_eq!(cors.allowed_methods, vec!["POST".to_string()]);
        assert_eq!(cors.allowed_headers.len(), 2);
        assert!(!cors.allow_credentials);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.log_rejections);
        assert!(!settings.log_accepted);
    }

    #[test]
    fn test_upload_url() {
        let mut downstream = DownstreamConfig {
            url: "https://cms.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(downstream.upload_url(), "https://cms.example.com/api/upload");
        downstream.url = "https://cms.example.com".to_string();
        assert_eq!(downstream.upload_url(), "https://cms.example.com/api/upload");
    }

    #[test]
    fn test_matches_content_type() {
        assert!(matches_content_type("application/pdf", "application/pdf"));
        assert!(matches_content_type("application/pdf", "application/PDF; name=a.pdf"));
        assert!(!matches_content_type("application/pdf", "application/octet-stream"));
        assert!(matches_content_type("application/*", "application/pdf"));
        assert!(matches_content_type("application/vnd.*", "application/vnd.ms-excel"));
        assert!(!matches_content_type("application/*", "text/plain"));
        assert!(!matches_content_type("application/*", "applicationx/foo"));
        assert!(!matches_content_type("application/*", "application"));
        assert!(matches_content_type("application/*", "Application/PDF"));
        assert!(matches_content_type("application/vnd.*", "APPLICATION/VND.ms-excel"));
    }

    #[test]
    fn test_accepts_content_type() {
        let config = test_config();
        assert!(config.accepts_content_type(Some("application/pdf")));
        assert!(!config.accepts_content_type(Some("image/png")));
        assert!(!config.accepts_content_type(None));
    }

    #[test]
    fn test_is_origin_allowed() {
        let mut config = test_config();
        assert!(config.is_origin_allowed("http://localhost:3000"));
        assert!(!config.is_origin_allowed("http://evil.example"));

        config.cors.allowed_origins = vec!["*".to_string()];
        assert!(config.is_origin_allowed("http://evil.example"));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("PDF_GATEWAY_TEST_CMS", "http://cms.test");
        let input = "url: \"${PDF_GATEWAY_TEST_CMS}\"";
        assert_eq!(expand_env_vars(input), "url: \"http://cms.test\"");
        std::env::remove_var("PDF_GATEWAY_TEST_CMS");

        assert_eq!(
            expand_env_vars("url: \"${PDF_GATEWAY_TEST_UNSET_VAR}\""),
            "url: \"\""
        );
    }

    #[test]
    fn test_parse_config_yaml() {
        let yaml = r#"
server:
  listen: "127.0.0.1:8080"

upload:
  max_size: 1048576

downstream:
  url: "http://cms.local:1337"
  timeout_ms: 5000
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.upload.max_size, 1_048_576);
        assert_eq!(config.upload.field_name, "files");
        assert_eq!(config.downstream.timeout_ms, 5000);
        assert_eq!(config.downstream.upload_path, "/api/upload");
        assert_eq!(config.cors.allowed_origins.len(), 1);
    }

    #[test]
    fn test_example_config_parses() {
        std::env::set_var("CMS_URL", "http://cms.example:1337");
        let config = Config::from_yaml(&Config::example()).unwrap();
        std::env::remove_var("CMS_URL");
        assert_eq!(config.downstream.url, "http://cms.example:1337");
        assert_eq!(config.listen_addr().unwrap().port(), 3005);
    }

    #[test]
    fn test_validate_missing_url() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_url_scheme() {
        let mut config = test_config();
        config.downstream.url = "ftp://cms.local".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_max_size() {
        let mut config = test_config();
        config.upload.max_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = test_config();
        config.downstream.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_listen() {
        let mut config = test_config();
        config.server.listen = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ok() {
        assert!(test_config().validate().is_ok());
    }
}
