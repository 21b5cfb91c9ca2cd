//! Task identity: URL normalization and stable task ids

use crate::task::{FetchParams, TaskError};
use sha2::{Digest, Sha256};
use url::Url;

/// Normalizes a URL before it takes part in a task id
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Only `http` and `https` are accepted and a host is required
/// 3. Scheme and host are lowercased (done by the parser)
/// 4. Fragment is dropped
/// 5. Query parameters are sorted; an empty query is removed
///
/// # Examples
///
/// ```
/// use sumi_dispatch::task::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM/a?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, TaskError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| TaskError::InvalidUrl {
        url: url_str.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(TaskError::InvalidUrl {
            url: url_str.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(TaskError::InvalidUrl {
            url: url_str.to_string(),
            reason: "missing host".to_string(),
        });
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    Ok(url)
}

/// Computes the stable id of a task
///
/// The id is the hex SHA-256 of the project, the method, the (normalized)
/// URL and the canonical JSON form of the fetch parameters, so two
/// submissions that would issue the same request share an id.
pub fn compute_task_id(project: &str, method: &str, url: &str, params: &FetchParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update(b"\n");
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(params.canonical_json().as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprints fetched content; used as the itag of a processed page
pub fn content_fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
