//! Upstream URL construction

use reqwest::Url;

use crate::error::{Error, Result};

/// Join a cluster base URL with the request sub-path and query.
///
/// A path prefix on the base URL is preserved and a trailing `/` on it is
/// dropped, so the sub-path is appended exactly once.
///
/// # Examples
///
/// ```
/// use cluster_proxy::routing::build_target_url;
///
/// let url = build_target_url("https://k8s.example.com/subpath/", "/api/v1/pods", Some("limit=5")).unwrap();
/// assert_eq!(url.as_str(), "https://k8s.example.com/subpath/api/v1/pods?limit=5");
/// ```
pub fn build_target_url(base: &str, path: &str, query: Option<&str>) -> Result<Url> {
    let base = base.trim_end_matches('/');
    let mut target = String::with_capacity(base.len() + path.len() + 1);
    target.push_str(base);
    if !path.is_empty() && !path.starts_with('/') {
        target.push('/');
    }
    target.push_str(path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    Url::parse(&target)
        .map_err(|e| Error::Config(format!("invalid cluster URL '{}': {}", base, e)))
}

/// Whether the query asks for a long-lived stream (`watch=true` / `follow=true`)
///
/// Such requests must not be cut off by the request timeout.
pub fn is_watch_query(query: Option<&str>) -> bool {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| {
            matches!(key, "watch" | "follow") && (value == "true" || value == "1")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://host", "/api/v1/pods", None, "http://host/api/v1/pods")]
    #[case("http://host/", "/api", None, "http://host/api")]
    #[case("https://host/subpath", "/api/v1/namespaces", None, "https://host/subpath/api/v1/namespaces")]
    #[case("https://host/subpath/", "/version", Some("a=b"), "https://host/subpath/version?a=b")]
    #[case("http://host:8001", "api", Some(""), "http://host:8001/api")]
    #[case("http://host", "", None, "http://host/")]
    fn test_build_target_url(
        #[case] base: &str,
        #[case] path: &str,
        #[case] query: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(build_target_url(base, path, query).unwrap().as_str(), expected);
    }

    #[test]
    fn test_build_target_url_keeps_encoding() {
        let url = build_target_url(
            "http://host",
            "/api/v1/namespaces/a%2Fb",
            Some("labelSelector=app%3Dweb"),
        )
        .unwrap();
        assert_eq!(url.path(), "/api/v1/namespaces/a%2Fb");
        assert_eq!(url.query(), Some("labelSelector=app%3Dweb"));
    }

    #[test]
    fn test_build_target_url_rejects_garbage() {
        assert!(matches!(
            build_target_url("not a url", "/api", None),
            Err(Error::Config(_))
        ));
    }

    #[rstest]
    #[case(Some("watch=true"), true)]
    #[case(Some("labelSelector=x&watch=1"), true)]
    #[case(Some("follow=true&container=app"), true)]
    #[case(Some("watch=false"), false)]
    #[case(Some("limit=500"), false)]
    #[case(None, false)]
    fn test_is_watch_query(#[case] query: Option<&str>, #[case] expected: bool) {
        assert_eq!(is_watch_query(query), expected);
    }
}
