/// Hostname extraction, media URL normalization and host permission
/// match patterns for Trex
use regex::Regex;
use url::Url;

/// Extract the lowercase hostname from a URL string.
///
/// Falls back to a manual parse for strings the `url` crate rejects
/// (bare hosts like `example.com/path` show up in user-entered custom sites).
///
/// Examples:
/// - https://www.youtube.com/watch?v=abc → www.youtube.com
/// - http://localhost:3000 → localhost
/// - mangadex.org/title/1 → mangadex.org
pub fn extract_hostname(url: &str) -> Option<String> {
    if let Some(host) = Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .filter(|h| !h.is_empty())
    {
        return Some(host);
    }

    // Remove protocol if present
    let url_clean = url
        .trim()
        .replace("https://", "")
        .replace("http://", "");

    let hostname_with_port = url_clean.split('/').next()?.to_string();

    // Remove port if present (e.g., "localhost:3000" -> "localhost")
    let hostname = hostname_with_port.split(':').next()?.to_lowercase();

    if hostname.is_empty() {
        None
    } else {
        Some(hostname)
    }
}

/// Drop a leading `www.` label.
pub fn strip_www(hostname: &str) -> &str {
    hostname.strip_prefix("www.").unwrap_or(hostname)
}

/// Hostname without `www.` followed by the path, used to match registry
/// patterns that carry a path segment (`hulu.com/watch`).
pub fn host_and_path(url: &str) -> Option<String> {
    match Url::parse(url.trim()) {
        Ok(parsed) => {
            let host = parsed.host_str()?.to_lowercase();
            Some(format!("{}{}", strip_www(&host), parsed.path().to_lowercase()))
        }
        Err(_) => {
            let host = extract_hostname(url)?;
            Some(strip_www(&host).to_string())
        }
    }
}

/// Normalize a media URL into the key the dedup view groups by:
/// scheme + host + path, lowercased, trailing slash stripped.
/// Query string and fragment do not take part.
pub fn normalize_media_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let path = parsed.path().trim_end_matches('/');
            format!("{}://{}{}", parsed.scheme(), host, path).to_lowercase()
        }
        Err(_) => {
            let raw = url.trim();
            let without_query = raw.split(['?', '#']).next().unwrap_or(raw);
            without_query.trim_end_matches('/').to_lowercase()
        }
    }
}

/// Turn a granted origin into a content-script match pattern by adding a
/// `/*` path when none is present.
///
/// Examples:
/// - https://mangadex.org → https://mangadex.org/*
/// - https://*.example.com/* → unchanged
pub fn origin_match_pattern(origin: &str) -> String {
    let origin = origin.trim();
    let has_path = origin
        .split_once("://")
        .is_some_and(|(_, rest)| rest.contains('/'));
    if has_path {
        origin.to_string()
    } else {
        format!("{}/*", origin)
    }
}

/// Whether `url` falls under a host permission pattern such as
/// `https://*.example.com/*`. A `*.` host wildcard also covers the bare
/// domain.
pub fn origin_pattern_matches(pattern: &str, url: &str) -> bool {
    let pattern = origin_match_pattern(pattern);
    let escaped = regex::escape(&pattern)
        .replace(r"://\*\.", r"://(?:[^/]*\.)?")
        .replace(r"\*", ".*");
    match Regex::new(&format!("^{}$", escaped)) {
        Ok(re) => re.is_match(url),
        Err(_) => {
            let host = pattern
                .split_once("://")
                .map_or(pattern.as_str(), |(_, rest)| rest)
                .trim_start_matches("*.")
                .trim_end_matches("/*");
            url.contains(host)
        }
    }
}

/// Whether an open tab should get the tracker injected for these origins.
/// Browser-internal pages never do.
pub fn matches_any_origin(origins: &[String], url: &str) -> bool {
    if url.is_empty() || url.starts_with("chrome://") {
        return false;
    }
    origins
        .iter()
        .any(|origin| origin_pattern_matches(origin, url))
}
