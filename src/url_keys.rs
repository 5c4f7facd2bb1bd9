/// Cache key derivation and URL classification
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static QUERY_OR_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/?[?#]").expect("valid regex"));
static PLACEHOLDER_URI_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|&)uri=(.*)$").expect("valid regex"));

const INTERNAL_SCHEMES: [&str; 6] = [
    "chrome:",
    "chrome-search:",
    "chrome-untrusted:",
    "edge:",
    "brave:",
    "about:",
];

/// Full cache key: scheme, host and path, without query, fragment or
/// trailing slash.
///
/// Examples:
/// - https://GitHub.com/rust-lang/rust/?tab=readme → https://github.com/rust-lang/rust
/// - http://localhost:3000/app#top → http://localhost:3000/app
pub fn full_key(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) if parsed.has_host() => {
            format!("{}{}", origin_prefix(&parsed), parsed.path().trim_end_matches('/'))
        }
        _ => fallback_key(url, true),
    }
}

/// Root cache key: scheme and host only.
///
/// Examples:
/// - https://github.com/rust-lang/rust → https://github.com
/// - https://news.bbc.co.uk:8443/news → https://news.bbc.co.uk:8443
pub fn root_key(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) if parsed.has_host() => origin_prefix(&parsed),
        _ => fallback_key(url, false),
    }
}

fn origin_prefix(parsed: &Url) -> String {
    let host = parsed.host_str().unwrap_or_default();
    match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    }
}

/// Plain string stripping for inputs the URL parser rejects
fn fallback_key(url: &str, include_path: bool) -> String {
    let url = url.trim();
    let (scheme, rest) = match url.find("://") {
        Some(idx) if idx > 0 => (&url[..idx + 3], &url[idx + 3..]),
        _ => ("", url),
    };

    let rest = match QUERY_OR_FRAGMENT.find(rest) {
        Some(m) => &rest[..m.start()],
        None => rest,
    };

    let rest = if include_path {
        rest.trim_end_matches('/')
    } else {
        rest.split('/').next().unwrap_or_default()
    };

    format!("{}{}", scheme, rest)
}

pub fn is_file_url(url: &str) -> bool {
    url.trim_start().to_ascii_lowercase().starts_with("file:")
}

/// Browser-internal pages and icons that cannot be fetched
pub fn is_internal_url(url: &str) -> bool {
    let lowered = url.trim_start().to_ascii_lowercase();
    INTERNAL_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme))
}

pub fn is_placeholder_url(url: &str, suspended_page_url: &str) -> bool {
    !suspended_page_url.is_empty() && url.starts_with(suspended_page_url)
}

/// Extract the original page URL from a placeholder page URL.
///
/// The placeholder carries it in the fragment, either as a trailing raw
/// `uri=` parameter or as an encoded `url=` parameter.
pub fn original_url_from_placeholder(url: &str) -> Option<String> {
    let (_, fragment) = url.split_once('#')?;

    if let Some(captures) = PLACEHOLDER_URI_PARAM.captures(fragment) {
        let uri = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !uri.is_empty() {
            return Some(uri.to_string());
        }
    }

    url::form_urlencoded::parse(fragment.as_bytes())
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_basic() {
        assert_eq!(full_key("https://github.com/rust-lang/rust"), "https://github.com/rust-lang/rust");
        assert_eq!(full_key("https://GitHub.com/rust-lang/rust/"), "https://github.com/rust-lang/rust");
        assert_eq!(full_key("https://www.google.com/"), "https://www.google.com");
    }

    #[test]
    fn test_full_key_strips_query_and_fragment() {
        assert_eq!(full_key("https://www.google.com/search?q=rust"), "https://www.google.com/search");
        assert_eq!(full_key("http://localhost:3000/app#top"), "http://localhost:3000/app");
        assert_eq!(full_key("https://github.com/?tab=repositories"), "https://github.com");
    }

    #[test]
    fn test_root_key() {
        assert_eq!(root_key("https://github.com/rust-lang/rust"), "https://github.com");
        assert_eq!(root_key("https://news.bbc.co.uk:8443/news"), "https://news.bbc.co.uk:8443");
        assert_eq!(root_key("https://github.com:443/rust"), "https://github.com");
        assert_eq!(root_key("http://127.0.0.1:8080/?a=b"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_keys_fallback_for_unparseable() {
        assert_eq!(full_key("not-a-url/path/?q=1"), "not-a-url/path");
        assert_eq!(root_key("not-a-url/path/?q=1"), "not-a-url");
        assert_eq!(full_key(""), "");
    }

    #[test]
    fn test_url_classification() {
        assert!(is_file_url("file:///tmp/index.html"));
        assert!(!is_file_url("https://files.example.com"));

        assert!(is_internal_url("chrome://favicon/size/16@2x/https://github.com"));
        assert!(is_internal_url("about:blank"));
        assert!(!is_internal_url("https://github.com/favicon.ico"));
        assert!(!is_internal_url("chrome-extension://abc/img/icon.png"));
    }

    #[test]
    fn test_is_placeholder_url() {
        let page = "chrome-extension://abc/suspended.html";
        assert!(is_placeholder_url("chrome-extension://abc/suspended.html#uri=https://github.com", page));
        assert!(!is_placeholder_url("https://github.com", page));
        assert!(!is_placeholder_url("https://github.com", ""));
    }

    #[test]
    fn test_original_url_from_placeholder() {
        assert_eq!(
            original_url_from_placeholder(
                "chrome-extension://abc/suspended.html#ttl=Search&pos=120&uri=https://www.google.com/search?q=a&b=c#frag"
            ),
            Some("https://www.google.com/search?q=a&b=c#frag".to_string())
        );
        assert_eq!(
            original_url_from_placeholder("chrome-extension://abc/suspended.html#url=https%3A%2F%2Fgithub.com%2F"),
            Some("https://github.com/".to_string())
        );
        assert_eq!(original_url_from_placeholder("chrome-extension://abc/suspended.html#ttl=x"), None);
        assert_eq!(original_url_from_placeholder("chrome-extension://abc/suspended.html"), None);
    }
}
