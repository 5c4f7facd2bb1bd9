/// Data structures for favicon resolution
use serde::{Deserialize, Serialize};

use crate::url_keys;

/// Payload used in place of an image that could not be produced
pub const EMPTY_IMAGE_SENTINEL: &str = "data:,";

/// A resolved favicon record.
///
/// Field names on the wire match what the placeholder page reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaviconMeta {
    #[serde(rename = "favIconUrl")]
    pub source_url: String,
    #[serde(rename = "isDark")]
    pub is_dark: bool,
    /// PNG data URL with alpha stretched so the most opaque pixel is fully opaque
    #[serde(rename = "normalisedDataUrl", default)]
    pub normalized_image: String,
    /// `normalized_image` with every alpha value halved
    #[serde(rename = "transparentDataUrl", default)]
    pub semi_transparent_image: String,
}

impl FaviconMeta {
    /// Both payloads present and not the empty sentinel
    pub fn has_images(&self) -> bool {
        is_image_payload(&self.normalized_image) && is_image_payload(&self.semi_transparent_image)
    }
}

fn is_image_payload(payload: &str) -> bool {
    !payload.is_empty() && payload != EMPTY_IMAGE_SENTINEL
}

/// 16x16 black/white PNG data URL, compared byte for byte
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What the resolver needs to know about a tab
pub trait TabDescriptor {
    fn url(&self) -> Option<&str>;
    fn icon_url(&self) -> Option<&str>;
    fn is_file_tab(&self) -> bool;
    fn is_placeholder(&self) -> bool;
    /// Original URL embedded in a placeholder page URL
    fn original_url(&self) -> Option<String>;
}

/// A tab as reported by chrome.tabs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChromeTab {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
}

/// A chrome tab paired with the extension's placeholder page URL, so
/// placeholder tabs can be recognised.
#[derive(Debug, Clone, Copy)]
pub struct TabView<'a> {
    pub tab: &'a ChromeTab,
    pub suspended_page_url: &'a str,
}

impl<'a> TabView<'a> {
    pub fn new(tab: &'a ChromeTab, suspended_page_url: &'a str) -> TabView<'a> {
        TabView {
            tab,
            suspended_page_url,
        }
    }
}

impl TabDescriptor for TabView<'_> {
    fn url(&self) -> Option<&str> {
        self.tab.url.as_deref().filter(|url| !url.is_empty())
    }

    fn icon_url(&self) -> Option<&str> {
        self.tab.fav_icon_url.as_deref().filter(|url| !url.is_empty())
    }

    fn is_file_tab(&self) -> bool {
        self.url().is_some_and(url_keys::is_file_url)
    }

    fn is_placeholder(&self) -> bool {
        self.url()
            .is_some_and(|url| url_keys::is_placeholder_url(url, self.suspended_page_url))
    }

    fn original_url(&self) -> Option<String> {
        self.url().and_then(url_keys::original_url_from_placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUSPENDED_PAGE: &str = "chrome-extension://abc/suspended.html";

    fn create_test_meta(source_url: &str) -> FaviconMeta {
        FaviconMeta {
            source_url: source_url.to_string(),
            is_dark: false,
            normalized_image: "data:image/png;base64,AAAA".to_string(),
            semi_transparent_image: "data:image/png;base64,BBBB".to_string(),
        }
    }

    #[test]
    fn test_has_images() {
        let mut meta = create_test_meta("https://github.com/favicon.ico");
        assert!(meta.has_images());

        meta.semi_transparent_image = EMPTY_IMAGE_SENTINEL.to_string();
        assert!(!meta.has_images());

        meta.semi_transparent_image = String::new();
        assert!(!meta.has_images());
    }

    #[test]
    fn test_serialization_field_names() {
        let meta = create_test_meta("https://github.com/favicon.ico");

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["favIconUrl"], "https://github.com/favicon.ico");
        assert_eq!(json["isDark"], false);
        assert_eq!(json["normalisedDataUrl"], "data:image/png;base64,AAAA");
        assert_eq!(json["transparentDataUrl"], "data:image/png;base64,BBBB");

        let deserialized: FaviconMeta = serde_json::from_value(json).unwrap();
        assert_eq!(deserialized, meta);
    }

    #[test]
    fn test_tab_deserialization() {
        let json = r#"{"id": 7, "url": "https://github.com", "favIconUrl": "https://github.com/favicon.ico", "pinned": true}"#;
        let tab: ChromeTab = serde_json::from_str(json).unwrap();

        assert_eq!(tab.id, Some(7));
        assert_eq!(tab.fav_icon_url.as_deref(), Some("https://github.com/favicon.ico"));
    }

    #[test]
    fn test_tab_view_predicates() {
        let tab = ChromeTab {
            id: Some(1),
            url: Some(format!("{}#ttl=Rust&pos=0&uri=https://www.rust-lang.org/learn", SUSPENDED_PAGE)),
            fav_icon_url: None,
        };
        let view = TabView::new(&tab, SUSPENDED_PAGE);

        assert!(view.is_placeholder());
        assert!(!view.is_file_tab());
        assert_eq!(view.original_url().as_deref(), Some("https://www.rust-lang.org/learn"));
        assert_eq!(view.icon_url(), None);
    }

    #[test]
    fn test_tab_view_file_tab() {
        let tab = ChromeTab {
            id: Some(2),
            url: Some("file:///home/user/notes.txt".to_string()),
            fav_icon_url: Some(String::new()),
        };
        let view = TabView::new(&tab, SUSPENDED_PAGE);

        assert!(view.is_file_tab());
        assert!(!view.is_placeholder());
        assert_eq!(view.icon_url(), None);
    }
}
