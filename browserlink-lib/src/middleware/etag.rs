//! Entity-tag rewriting that keeps browser caches from mixing responses
//! filtered by different host instances.
//!
//! Filtered responses carry the host's port inside their ETag
//! (`"tag"` becomes `"tag:port"`). When a conditional request comes back, the
//! port is stripped again if it still names the current host. Otherwise the
//! conditional headers are dropped so the application renders a fresh page.

use http::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue};
use url::Url;

/// Entity tags listed in `If-None-Match`, across all header lines.
pub fn if_none_match_tags(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Port embedded in an entity tag of the form `"tag:port"`.
fn tag_port(tag: &str) -> Option<u16> {
    let mut parts = tag.split(':');
    parts.next()?;
    let port = parts.next()?;
    port.strip_suffix('"')?.parse().ok()
}

/// Ports carried by the request's `If-None-Match` tags, in order.
pub fn request_ports(headers: &HeaderMap) -> Vec<u16> {
    if_none_match_tags(headers).iter().filter_map(|tag| tag_port(tag)).collect()
}

/// Port of a host connection string. An explicit port must be numeric; without
/// one the scheme default applies. `None` for an empty or malformed string.
pub fn current_port(connection_string: &str) -> Option<u16> {
    let parts: Vec<&str> = connection_string.split(':').collect();
    if parts.len() >= 3 {
        return parts[2].split('/').next()?.parse().ok();
    }
    Url::parse(connection_string).ok()?.port_or_known_default()
}

/// Drop the conditional headers so the application sends a full response.
pub fn remove_etag_and_timestamp(headers: &mut HeaderMap) {
    headers.remove(IF_NONE_MATCH);
    headers.remove(IF_MODIFIED_SINCE);
}

/// Strip the port from every `If-None-Match` tag that carries one.
pub fn delete_port_from_etag(headers: &mut HeaderMap) {
    let tags = if_none_match_tags(headers);
    if !tags.iter().any(|tag| tag.contains(':')) {
        return;
    }

    let rewritten: Vec<String> = tags
        .into_iter()
        .map(|tag| match tag.split_once(':') {
            Some((head, _)) => format!("{}\"", head),
            None => tag,
        })
        .collect();

    if let Ok(value) = HeaderValue::from_str(&rewritten.join(", ")) {
        headers.insert(IF_NONE_MATCH, value);
    }
}

/// Append `:port` inside the response's quoted ETag. Unquoted ETags are not
/// valid entity tags and are left alone.
pub fn add_to_etag(headers: &mut HeaderMap, port: u16) {
    let Some(etag) = headers.get(ETAG).and_then(|v| v.to_str().ok()) else {
        return;
    };

    let opaque = etag.strip_prefix("W/").unwrap_or(etag);
    if opaque.len() < 2 || !opaque.starts_with('"') || !opaque.ends_with('"') {
        return;
    }

    let tagged = format!("{}:{}\"", &etag[..etag.len() - 1], port);
    if let Ok(value) = HeaderValue::from_str(&tagged) {
        headers.insert(ETAG, value);
    }
}

/// Reconcile a conditional request with the current host and return the
/// host's port.
pub fn filter_request_header(headers: &mut HeaderMap, connection_string: &str) -> Option<u16> {
    let current = current_port(connection_string);

    match current {
        Some(port) if request_ports(headers).contains(&port) => delete_port_from_etag(headers),
        _ => remove_etag_and_timestamp(headers),
    }

    current
}
