use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use http::header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_TYPE, ETAG};

use super::types::ETag;

pub const SCHEDULE_TAG: &str = "schedule-tag";
pub const DAV: &str = "dav";

/// Encode a string as an HTTP quoted-string, RFC 7230 section 3.2.6
pub fn quote(src: &str) -> String {
    let mut acc = String::with_capacity(src.len() + 2);
    acc.push('"');
    for c in src.chars() {
        if c == '"' || c == '\\' {
            acc.push('\\');
        }
        acc.push(c);
    }
    acc.push('"');
    acc
}

/// Decode an HTTP quoted-string. Anything that is not enclosed in
/// double quotes is returned as is.
pub fn unquote(src: &str) -> String {
    if src.len() < 2 || !src.starts_with('"') || !src.ends_with('"') {
        return src.to_string();
    }

    let mut acc = String::with_capacity(src.len());
    let mut chars = src[1..src.len() - 1].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => acc.push(chars.next().unwrap_or('\\')),
            c => acc.push(c),
        }
    }
    acc
}

impl ETag {
    /// Parse an entity tag (`W/"xyz"`, `"xyz"` or a bare token)
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (weak, tag) = match raw.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        Self {
            tag: unquote(tag),
            weak,
        }
    }
}

fn header_etag(headers: &HeaderMap, name: &HeaderName) -> Option<ETag> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ETag::parse)
}

/// `ETag` response header
pub fn etag(headers: &HeaderMap) -> Option<ETag> {
    header_etag(headers, &ETAG)
}

/// `Schedule-Tag` response header, RFC 6638
pub fn schedule_tag(headers: &HeaderMap) -> Option<ETag> {
    header_etag(headers, &HeaderName::from_static(SCHEDULE_TAG))
}

/// Tokens of every `DAV` response header, RFC 4918 section 10.1
pub fn dav_capabilities(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(HeaderName::from_static(DAV))
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// Parse an HTTP-date in any of the three formats of RFC 7231 section 7.1.1.1
pub fn parse_http_date(src: &str) -> Option<DateTime<Utc>> {
    let src = src.split_whitespace().collect::<Vec<_>>().join(" ");

    // IMF-fixdate: Sun, 06 Nov 1994 08:49:37 GMT
    if let Ok(date) = DateTime::parse_from_rfc2822(&src) {
        return Some(date.with_timezone(&Utc));
    }
    // obsolete RFC 850 format: Sunday, 06-Nov-94 08:49:37 GMT
    if let Ok(date) = NaiveDateTime::parse_from_str(&src, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(date.and_utc());
    }
    // ANSI C's asctime() format: Sun Nov  6 08:49:37 1994
    if let Ok(date) = NaiveDateTime::parse_from_str(&src, "%a %b %d %H:%M:%S %Y") {
        return Some(date.and_utc());
    }

    tracing::debug!(date = %src, "unparsable HTTP date");
    None
}

/// Decode `Retry-After`: an HTTP-date or a number of seconds from `now`
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = headers
        .get(http::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())?
        .trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        // oversized deltas saturate, callers clamp the instant anyway
        let seconds = raw.parse::<u64>().unwrap_or(u64::MAX).min(u64::from(u32::MAX));
        return now.checked_add_signed(Duration::seconds(seconds as i64));
    }
    parse_http_date(raw)
}

/// A media type reduced to its lowercase type and subtype
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    pub main: String,
    pub sub: String,
}
impl MediaType {
    pub fn parse(src: &str) -> Option<Self> {
        let essence = src.split(';').next()?.trim().to_ascii_lowercase();
        let (main, sub) = essence.split_once('/')?;
        if main.is_empty() || sub.is_empty() {
            return None;
        }
        Some(Self {
            main: main.to_string(),
            sub: sub.to_string(),
        })
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }

    /// `text/xml`, `application/xml` or any other `*/xml`
    pub fn is_xml(&self) -> bool {
        self.sub == "xml"
    }

    /// Whether a body of this type can be shown in an excerpt
    pub fn is_text(&self) -> bool {
        self.main == "text" || (self.main == "application" && (self.sub == "xml" || self.sub == "html"))
    }
}

/// Body part of an excerpt: the text cut at `max` bytes for textual
/// bodies, a placeholder with the size for anything else.
pub fn body_excerpt(media_type: Option<&MediaType>, body: &[u8], total_len: Option<u64>, max: usize) -> String {
    match media_type {
        Some(mt) if mt.is_text() => {
            let cut = body.len().min(max);
            String::from_utf8_lossy(&body[..cut]).into_owned()
        }
        _ => match total_len {
            Some(len) => format!("<{} bytes binary body>", len),
            None => "<binary body>".to_string(),
        },
    }
}

pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
