/// Favicon subsystem configuration
use serde::{Deserialize, Serialize};

pub const DEFAULT_ICON_SERVICE_URL: &str = "https://www.google.com/s2/favicons?sz=32&domain_url=";
pub const DEFAULT_LOAD_TIMEOUT_MS: u32 = 5000;

/// Settings for resolution, worker creation and storage.
/// Every field has a default, so JS may pass a partial object (or nothing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FaviconConfig {
    pub icon_service_url: String,
    pub load_timeout_ms: u32,
    pub extension_base_url: String,
    pub default_icon_path: String,
    pub placeholder_icon_paths: Vec<String>,
    pub suspended_page_path: String,
    pub offscreen_document_path: String,
    pub default_icon_retries: u32,
    pub retry_delay_ms: u32,
    pub storage_key_prefix: String,
}

impl Default for FaviconConfig {
    fn default() -> Self {
        FaviconConfig {
            icon_service_url: DEFAULT_ICON_SERVICE_URL.to_string(),
            load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
            extension_base_url: String::new(),
            default_icon_path: "img/chromeDefaultFavicon.png".to_string(),
            placeholder_icon_paths: vec!["img/ic_suspendy_16x16.png".to_string()],
            suspended_page_path: "suspended.html".to_string(),
            offscreen_document_path: "offscreen.html".to_string(),
            default_icon_retries: 2,
            retry_delay_ms: 100,
            storage_key_prefix: "favicon:".to_string(),
        }
    }
}

impl FaviconConfig {
    pub fn with_extension_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.extension_base_url = base_url.into();
        self
    }

    /// Absolute URL of a bundled extension asset
    pub fn extension_url(&self, path: &str) -> String {
        if self.extension_base_url.is_empty() {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.extension_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn default_icon_url(&self) -> String {
        self.extension_url(&self.default_icon_path)
    }

    pub fn placeholder_icon_urls(&self) -> Vec<String> {
        self.placeholder_icon_paths
            .iter()
            .map(|path| self.extension_url(path))
            .collect()
    }

    pub fn suspended_page_url(&self) -> String {
        self.extension_url(&self.suspended_page_path)
    }

    /// External lookup URL for a site
    pub fn icon_service_lookup_url(&self, site_url: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(site_url.as_bytes()).collect();
        format!("{}{}", self.icon_service_url, encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FaviconConfig::default();
        assert_eq!(config.load_timeout_ms, 5000);
        assert_eq!(config.default_icon_retries, 2);
        assert_eq!(config.placeholder_icon_paths.len(), 1);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"loadTimeoutMs": 2500, "extensionBaseUrl": "chrome-extension://abc/"}"#;
        let config: FaviconConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.load_timeout_ms, 2500);
        assert_eq!(config.icon_service_url, DEFAULT_ICON_SERVICE_URL);
        assert_eq!(
            config.default_icon_url(),
            "chrome-extension://abc/img/chromeDefaultFavicon.png"
        );
    }

    #[test]
    fn test_extension_url_without_base() {
        let config = FaviconConfig::default();
        assert_eq!(config.suspended_page_url(), "suspended.html");
    }

    #[test]
    fn test_icon_service_lookup_url() {
        let config = FaviconConfig::default();
        assert_eq!(
            config.icon_service_lookup_url("https://github.com/rust-lang?tab=1"),
            "https://www.google.com/s2/favicons?sz=32&domain_url=https%3A%2F%2Fgithub.com%2Frust-lang%3Ftab%3D1"
        );
    }
}
