use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use super::types::HrefRelation;

/// Everything but RFC 3986 unreserved characters is percent-encoded
/// in a normalized path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Resolve an href found in a response against the request URL.
///
/// A relative href with a colon before its first slash would be read as
/// a scheme (`relative:colon.vcf`), so it is made explicitly relative.
pub fn resolve(base: &Url, href: &str) -> Result<Url, url::ParseError> {
    let href = href.trim();
    let first_slash = href.find('/').unwrap_or(href.len());
    let looks_like_scheme = href[..first_slash].contains(':') && !href.contains("://");

    if !href.starts_with('/') && looks_like_scheme {
        base.join(&format!("./{}", href))
    } else {
        base.join(href)
    }
}

/// Re-encode every path segment in a single canonical way
fn normalized_path(url: &Url) -> String {
    url.path()
        .split('/')
        .map(|segment| {
            let raw: Vec<u8> = percent_decode_str(segment).collect();
            percent_encode(&raw, SEGMENT).to_string()
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical form of a URL for identity comparisons.
///
/// Scheme and host are already lowercased by the `url` crate. The port is
/// made explicit, fragments and user information are dropped. The
/// trailing slash is kept: `/a` and `/a/` are different resources.
pub fn normalize(url: &Url) -> String {
    let mut acc = format!(
        "{}://{}:{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default(),
        normalized_path(url),
    );
    if let Some(query) = url.query() {
        acc.push('?');
        acc.push_str(query);
    }
    acc
}

pub fn is_same(a: &Url, b: &Url) -> bool {
    normalize(a) == normalize(b)
}

/// Relation of a response href to the URL of the request
pub fn relation(request: &Url, href: &Url) -> HrefRelation {
    if is_same(request, href) {
        HrefRelation::SelfRef
    } else {
        HrefRelation::Member
    }
}

/// `url` with a trailing slash on its path
pub fn with_trailing_slash(url: &Url) -> Url {
    let mut acc = url.clone();
    if !url.path().ends_with('/') {
        acc.set_path(&format!("{}/", url.path()));
    }
    acc
}
