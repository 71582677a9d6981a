use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
    IF_MATCH, IF_NONE_MATCH, LOCATION, RANGE,
};
use http::response::Parts;
use http::{Method, Request, StatusCode};
use hyper::body::Bytes;
use percent_encoding::percent_decode_str;
use url::Url;

use super::config::ClientConfig;
use super::encoder;
use super::error::{Error, Excerpt, HttpError, HttpErrorKind};
use super::href;
use super::httputils::{self, MediaType};
use super::multistatus::{check_content_type, BoxRead, MultiStatusParser};
use super::registry::PropertyRegistry;
use super::transport::{body_reader, read_prefix, Body, Transport};
use super::types::*;
use super::xml::{Name, QWrite, Reader};

pub const DEPTH: HeaderName = HeaderName::from_static("depth");
pub const DESTINATION: HeaderName = HeaderName::from_static("destination");
pub const OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
pub const IF_SCHEDULE_TAG_MATCH: HeaderName = HeaderName::from_static("if-schedule-tag-match");

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

fn dav_method(name: &str) -> Result<Method, Error> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| Error::protocol(format!("invalid method {}: {}", name, e)))
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::protocol(format!("invalid header value {:?}: {}", value, e)))
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 300 | 301 | 302 | 303 | 307 | 308)
}

fn depth_value(depth: i32) -> HeaderValue {
    if depth < 0 {
        HeaderValue::from_static("infinity")
    } else {
        HeaderValue::from(depth)
    }
}

/// URL a final response was received from, kept in its extensions
#[derive(Clone)]
struct RequestUrl(Url);

/// A request as it is resent along a redirect chain
struct Exchange {
    method: Method,
    headers: HeaderMap,
    body: Bytes,
}
impl Exchange {
    fn new(method: Method, headers: HeaderMap) -> Self {
        Self {
            method,
            headers,
            body: Bytes::new(),
        }
    }

    fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn body(mut self, content_type: &str, body: impl Into<Bytes>) -> Result<Self, Error> {
        self.headers.insert(CONTENT_TYPE, header_value(content_type)?);
        self.body = body.into();
        Ok(self)
    }

    async fn xml_body(self, body: &impl QWrite) -> Result<Self, Error> {
        let bytes = encoder::to_bytes(body)
            .await
            .map_err(|e| Error::protocol(format!("can't serialize request body: {}", e)))?;
        self.body(XML_CONTENT_TYPE, bytes)
    }

    fn build(&self, url: &Url, common: &HeaderMap) -> Result<Request<Bytes>, Error> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(url.as_str())
            .body(self.body.clone())
            .map_err(|e| Error::protocol(format!("invalid request to {}: {}", url, e)))?;
        let headers = request.headers_mut();
        for (name, value) in common.iter() {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        Ok(request)
    }
}

/// A remote WebDAV resource addressed by `location`.
///
/// Every verb follows redirects (up to [`ClientConfig::max_redirects`])
/// and updates `location` once the final response is known. A failed or
/// dropped operation leaves `location` untouched. Operations on one
/// resource are meant to be run one after the other.
pub struct DavResource<T: Transport> {
    transport: Arc<T>,
    location: Url,
    registry: Arc<PropertyRegistry>,
    config: ClientConfig,
    headers: HeaderMap,
}

impl<T: Transport> DavResource<T> {
    pub fn new(transport: Arc<T>, location: Url) -> Self {
        Self {
            transport,
            location,
            registry: PropertyRegistry::global(),
            config: ClientConfig::default(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<PropertyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Headers added to every request of this resource
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Last path segment, percent-decoded. Empty for the root.
    pub fn file_name(&self) -> String {
        self.location
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .unwrap_or_default()
    }

    // ---- VERBS ----

    /// OPTIONS, returns the `DAV` capabilities
    pub async fn options(&mut self, follow_redirects: bool) -> Result<(HashSet<String>, Parts), Error> {
        let exchange = Exchange::new(Method::OPTIONS, HeaderMap::new())
            .header(CONTENT_LENGTH, HeaderValue::from_static("0"))
            .header(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        let response = self
            .send(&exchange, self.location.clone(), follow_redirects)
            .await?;
        let response = self.check_status(&exchange, response).await?;
        let (parts, _) = response.into_parts();
        Ok((httputils::dav_capabilities(&parts.headers), parts))
    }

    /// PROPFIND with `Depth: depth`, a negative depth meaning infinity.
    /// Responses are handed to `callback` as they are parsed.
    pub async fn propfind<F>(&mut self, depth: i32, props: &[Name], callback: F) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let exchange = Exchange::new(dav_method("PROPFIND")?, HeaderMap::new())
            .header(DEPTH, depth_value(depth))
            .xml_body(&PropFind(props.to_vec()))
            .await?;
        self.multistatus(&exchange, callback).await
    }

    /// PROPPATCH. Any 2xx is a success, only a 207 body is parsed.
    pub async fn proppatch<F>(
        &mut self,
        set: Vec<(Name, String)>,
        remove: Vec<Name>,
        callback: F,
    ) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let exchange = Exchange::new(dav_method("PROPPATCH")?, HeaderMap::new())
            .xml_body(&PropertyUpdate { set, remove })
            .await?;
        let response = self.send(&exchange, self.location.clone(), true).await?;
        let response = self.check_status(&exchange, response).await?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Ok(vec![]);
        }
        self.parse_multistatus(response, callback).await
    }

    /// REPORT with an XML body
    pub async fn report<B, F>(&mut self, depth: i32, body: &B, callback: F) -> Result<Vec<Property>, Error>
    where
        B: QWrite,
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let exchange = Exchange::new(dav_method("REPORT")?, HeaderMap::new())
            .header(DEPTH, depth_value(depth))
            .xml_body(body)
            .await?;
        self.multistatus(&exchange, callback).await
    }

    /// SEARCH (RFC 5323) with a caller-built XML body
    pub async fn search<F>(&mut self, body: impl Into<Bytes>, callback: F) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let exchange =
            Exchange::new(dav_method("SEARCH")?, HeaderMap::new()).body(XML_CONTENT_TYPE, body)?;
        self.multistatus(&exchange, callback).await
    }

    /// MKCOL, or another creation method like MKCALENDAR.
    /// The request goes to the location with a trailing slash.
    pub async fn mkcol(
        &mut self,
        body: Option<Bytes>,
        method: Option<Method>,
        headers: HeaderMap,
    ) -> Result<Parts, Error> {
        let method = match method {
            Some(m) => m,
            None => dav_method("MKCOL")?,
        };
        let mut exchange = Exchange::new(method, headers);
        if let Some(body) = body {
            exchange = exchange.body(XML_CONTENT_TYPE, body)?;
        }
        let url = href::with_trailing_slash(&self.location);
        let response = self.send(&exchange, url, true).await?;
        let response = self.check_status(&exchange, response).await?;
        Ok(response.into_parts().0)
    }

    pub async fn head(&mut self, headers: HeaderMap) -> Result<Parts, Error> {
        let exchange = Exchange::new(Method::HEAD, headers);
        let response = self.send(&exchange, self.location.clone(), true).await?;
        let response = self.check_status(&exchange, response).await?;
        Ok(response.into_parts().0)
    }

    /// GET, the body is left to the caller
    pub async fn get(&mut self, accept: &str, headers: HeaderMap) -> Result<http::Response<Body>, Error> {
        let exchange = Exchange::new(Method::GET, headers).header(ACCEPT, header_value(accept)?);
        let response = self.send(&exchange, self.location.clone(), true).await?;
        self.check_status(&exchange, response).await
    }

    /// GET of `size` bytes starting at `offset`. Servers ignoring
    /// `Range` answer with the full body and a 200.
    pub async fn get_range(
        &mut self,
        accept: &str,
        offset: u64,
        size: u64,
        headers: HeaderMap,
    ) -> Result<http::Response<Body>, Error> {
        let last = offset + size.saturating_sub(1);
        let exchange = Exchange::new(Method::GET, headers)
            .header(ACCEPT, header_value(accept)?)
            .header(RANGE, header_value(&format!("bytes={}-{}", offset, last))?);
        let response = self.send(&exchange, self.location.clone(), true).await?;
        self.check_status(&exchange, response).await
    }

    pub async fn post(
        &mut self,
        body: impl Into<Bytes>,
        content_type: &str,
        if_none_match: bool,
        headers: HeaderMap,
    ) -> Result<http::Response<Body>, Error> {
        let mut exchange = Exchange::new(Method::POST, headers).body(content_type, body)?;
        if if_none_match {
            exchange = exchange.header(IF_NONE_MATCH, HeaderValue::from_static("*"));
        }
        let response = self.send(&exchange, self.location.clone(), true).await?;
        self.check_status(&exchange, response).await
    }

    /// PUT, optionally conditional on the current ETag or Schedule-Tag,
    /// or on the resource not existing yet.
    pub async fn put(
        &mut self,
        body: impl Into<Bytes>,
        content_type: &str,
        if_etag: Option<&str>,
        if_schedule_tag: Option<&str>,
        if_none_match: bool,
        headers: HeaderMap,
    ) -> Result<Parts, Error> {
        let mut exchange = Exchange::new(Method::PUT, headers).body(content_type, body)?;
        if let Some(etag) = if_etag {
            exchange = exchange.header(IF_MATCH, header_value(&httputils::quote(etag))?);
        }
        if let Some(tag) = if_schedule_tag {
            exchange = exchange.header(IF_SCHEDULE_TAG_MATCH, header_value(&httputils::quote(tag))?);
        }
        if if_none_match {
            exchange = exchange.header(IF_NONE_MATCH, HeaderValue::from_static("*"));
        }
        let response = self.send(&exchange, self.location.clone(), true).await?;
        let response = self.check_status(&exchange, response).await?;
        Ok(response.into_parts().0)
    }

    /// DELETE. A 207 means some members could not be deleted.
    pub async fn delete(
        &mut self,
        if_etag: Option<&str>,
        if_schedule_tag: Option<&str>,
        headers: HeaderMap,
    ) -> Result<Parts, Error> {
        let mut exchange = Exchange::new(Method::DELETE, headers);
        if let Some(etag) = if_etag {
            exchange = exchange.header(IF_MATCH, header_value(&httputils::quote(etag))?);
        }
        if let Some(tag) = if_schedule_tag {
            exchange = exchange.header(IF_SCHEDULE_TAG_MATCH, header_value(&httputils::quote(tag))?);
        }
        let response = self.send(&exchange, self.location.clone(), true).await?;
        let response = self.check_status(&exchange, response).await?;
        let response = self.reject_multistatus(&exchange, response).await?;
        Ok(response.into_parts().0)
    }

    /// MOVE to `destination`. On success the resource points to its new
    /// location, as told by the server or else `destination`.
    pub async fn move_to(&mut self, destination: &Url, overwrite: bool, headers: HeaderMap) -> Result<Parts, Error> {
        let parts = self
            .transfer(dav_method("MOVE")?, destination, overwrite, headers)
            .await?;
        let moved = parts
            .headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| self.location.join(v).ok());
        self.location = moved.unwrap_or_else(|| destination.clone());
        Ok(parts)
    }

    pub async fn copy(&mut self, destination: &Url, overwrite: bool, headers: HeaderMap) -> Result<Parts, Error> {
        self.transfer(dav_method("COPY")?, destination, overwrite, headers)
            .await
    }

    async fn transfer(
        &mut self,
        method: Method,
        destination: &Url,
        overwrite: bool,
        headers: HeaderMap,
    ) -> Result<Parts, Error> {
        let mut exchange = Exchange::new(method, headers)
            .header(DESTINATION, header_value(destination.as_str())?);
        if !overwrite {
            exchange = exchange.header(OVERWRITE, HeaderValue::from_static("F"));
        }
        let response = self.send(&exchange, self.location.clone(), true).await?;
        let response = self.check_status(&exchange, response).await?;
        let response = self.reject_multistatus(&exchange, response).await?;
        Ok(response.into_parts().0)
    }

    // ---- EXCHANGE ----

    /// Issue `exchange` against `url`, resending it on redirects.
    ///
    /// When the redirect budget is exhausted the last redirect response is
    /// returned and status checking reports it. `location` only changes
    /// once the final response arrived and if a redirect was followed.
    async fn send(
        &mut self,
        exchange: &Exchange,
        start: Url,
        follow_redirects: bool,
    ) -> Result<http::Response<Body>, Error> {
        let mut url = start;
        let mut hops = 0;
        loop {
            tracing::debug!(method=%exchange.method, url=%url, "sending request");
            let response = self
                .transport
                .issue(exchange.build(&url, &self.headers)?)
                .await?;

            let status = response.status();
            if !follow_redirects || !is_redirect(status) || hops >= self.config.max_redirects {
                let mut response = response;
                response.extensions_mut().insert(RequestUrl(url.clone()));
                if hops > 0 {
                    self.location = url;
                }
                return Ok(response);
            }

            let target = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::protocol("Redirected without new Location"))?;
            let target = url
                .join(target.trim())
                .map_err(|e| Error::protocol(format!("Invalid redirect Location: {}", e)))?;
            if url.scheme() == "https" && target.scheme() == "http" {
                return Err(Error::protocol("Received redirect from HTTPS to HTTP"));
            }

            tracing::debug!(status=%status, from=%url, to=%target, "following redirect");
            url = target;
            hops += 1;
        }
    }

    /// Let 2xx responses through, turn anything else into an [`HttpError`]
    async fn check_status(
        &self,
        exchange: &Exchange,
        response: http::Response<Body>,
    ) -> Result<http::Response<Body>, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.http_error(exchange, response).await.into())
    }

    /// A 207 reports partial failures of a DELETE, MOVE or COPY
    async fn reject_multistatus(
        &self,
        exchange: &Exchange,
        response: http::Response<Body>,
    ) -> Result<http::Response<Body>, Error> {
        if response.status() != StatusCode::MULTI_STATUS {
            return Ok(response);
        }
        Err(self.http_error(exchange, response).await.into())
    }

    async fn multistatus<F>(&mut self, exchange: &Exchange, callback: F) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let response = self.send(exchange, self.location.clone(), true).await?;
        let response = self.check_status(exchange, response).await?;
        if response.status() != StatusCode::MULTI_STATUS {
            let status = response.status();
            let (excerpt, _) = self.excerpt(exchange, response).await;
            return Err(Error::protocol_with(
                format!("Expected 207 Multi-Status, got {}", status),
                excerpt,
            ));
        }
        self.parse_multistatus(response, callback).await
    }

    async fn parse_multistatus<F>(&self, response: http::Response<Body>, callback: F) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let (parts, body) = response.into_parts();
        let body: BoxRead = Box::pin(body_reader(body));
        let body = check_content_type(&parts.headers, body).await?;
        let mut xml = Reader::new(body);
        MultiStatusParser::new(&self.location, &self.registry)
            .parse(&mut xml, callback)
            .await
    }

    // ---- ERRORS ----

    async fn http_error(&self, exchange: &Exchange, response: http::Response<Body>) -> HttpError {
        let status = response.status();
        let retry_after = match status {
            StatusCode::SERVICE_UNAVAILABLE => httputils::retry_after(response.headers(), Utc::now()),
            _ => None,
        };
        let (excerpt, errors) = self.excerpt(exchange, response).await;
        HttpError {
            kind: HttpErrorKind::from_status(status, retry_after),
            status,
            excerpt,
            errors,
        }
    }

    /// Bounded description of the exchange, along with the `<DAV:error>`
    /// children of an XML response body.
    async fn excerpt(&self, exchange: &Exchange, response: http::Response<Body>) -> (Excerpt, Vec<Violation>) {
        let max = self.config.max_excerpt_size;
        let (parts, body) = response.into_parts();

        let url = parts
            .extensions
            .get::<RequestUrl>()
            .map(|sent| &sent.0)
            .unwrap_or(&self.location);
        let mut request = format!("{} {}", exchange.method, url);
        if !exchange.body.is_empty() {
            let media_type = MediaType::from_headers(&exchange.headers);
            request.push_str("\n\n");
            request.push_str(&httputils::body_excerpt(
                media_type.as_ref(),
                &exchange.body,
                Some(exchange.body.len() as u64),
                max,
            ));
        }

        let media_type = MediaType::from_headers(&parts.headers);
        let is_text = media_type.as_ref().map(|mt| mt.is_text()).unwrap_or(false);
        let prefix = if is_text {
            read_prefix(body, max).await.unwrap_or_else(|e| {
                tracing::debug!(err=%e, "can't read error response body");
                vec![]
            })
        } else {
            vec![]
        };

        let total = httputils::content_length(&parts.headers);
        let mut response = parts.status.to_string();
        if !prefix.is_empty() || (!is_text && total.unwrap_or(0) > 0) {
            response.push_str("\n\n");
            response.push_str(&httputils::body_excerpt(media_type.as_ref(), &prefix, total, max));
        }

        let errors = match media_type {
            Some(mt) if mt.is_xml() && !prefix.is_empty() => parse_error_body(prefix).await,
            _ => vec![],
        };

        (
            Excerpt {
                request,
                response: Some(response),
            },
            errors,
        )
    }
}

/// Children of the first top-level `<DAV:error>`, anything unparsable
/// yields nothing
async fn parse_error_body(body: Vec<u8>) -> Vec<Violation> {
    let mut xml = Reader::new(Cursor::new(body));
    loop {
        match xml.next_child(0).await {
            Ok(Some(name)) if name == ERROR => {
                return Violation::parse_all(&mut xml).await.unwrap_or_default()
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::mock::MockTransport;

    const XML: (&str, &str) = ("content-type", "application/xml; charset=utf-8");

    fn resource(url: &str) -> (Arc<MockTransport>, DavResource<MockTransport>) {
        let mock = Arc::new(MockTransport::new());
        let res = DavResource::new(mock.clone(), Url::parse(url).unwrap())
            .with_registry(Arc::new(PropertyRegistry::with_defaults()));
        (mock, res)
    }

    fn single_response(href: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:"><d:response><d:href>{}</d:href>
            <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
            <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response></d:multistatus>"#,
            href
        )
    }

    #[tokio::test]
    async fn propfind_request_and_relations() {
        let (mock, mut res) = resource("https://example.com/dav/");
        let body = r#"<?xml version="1.0"?>
            <multistatus xmlns="DAV:">
                <response><href>/dav/</href>
                    <propstat><prop><resourcetype><collection/></resourcetype></prop>
                    <status>HTTP/1.1 200 OK</status></propstat></response>
                <response><href>/dav/subcollection</href>
                    <propstat><prop><resourcetype><collection/></resourcetype></prop>
                    <status>HTTP/1.1 200 OK</status></propstat></response>
                <response><href>/dav/file.txt</href>
                    <propstat><prop><getetag>W/"abc"</getetag></prop></propstat></response>
            </multistatus>"#;
        mock.enqueue(207, &[XML], body);

        let mut seen = vec![];
        res.propfind(1, &[RESOURCETYPE, GETETAG], |response, relation| {
            seen.push((response.href.to_string(), relation, response.etag().cloned()));
            Ok(())
        })
        .await
        .unwrap();

        let request = mock.last();
        assert_eq!(request.method.as_str(), "PROPFIND");
        assert_eq!(request.headers.get("depth").unwrap(), "1");
        assert!(request
            .body
            .contains("<d:prop><d:resourcetype/><d:getetag/></d:prop>"));

        assert_eq!(
            seen,
            vec![
                ("https://example.com/dav/".to_string(), HrefRelation::SelfRef, None),
                (
                    "https://example.com/dav/subcollection/".to_string(),
                    HrefRelation::Member,
                    None
                ),
                (
                    "https://example.com/dav/file.txt".to_string(),
                    HrefRelation::Member,
                    Some(ETag {
                        tag: "abc".into(),
                        weak: true
                    })
                ),
            ]
        );
    }

    #[tokio::test]
    async fn propfind_depth_infinity_and_non_207() {
        let (mock, mut res) = resource("https://example.com/dav/");
        mock.enqueue(200, &[XML], "<ok/>");
        let err = res.propfind(-1, &[GETETAG], |_, _| Ok(())).await.unwrap_err();
        assert_eq!(mock.last().headers.get("depth").unwrap(), "infinity");
        match err {
            Error::Protocol { message, excerpt } => {
                assert!(message.contains("207"));
                assert!(excerpt.unwrap().response.unwrap().contains("<ok/>"));
            }
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[tokio::test]
    async fn non_xml_multistatus() {
        let (mock, mut res) = resource("https://example.com/dav/");
        mock.enqueue(207, &[("content-type", "text/plain")], "Not XML at all");
        let err = res.propfind(0, &[GETETAG], |_, _| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));

        mock.enqueue(207, &[("content-type", "text/plain")], &single_response("/dav/"));
        let mut calls = 0;
        res.propfind(0, &[GETETAG], |_, _| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn redirects_update_location() {
        let (mock, mut res) = resource("https://example.com/dav/");
        mock.enqueue(301, &[("location", "/moved/")], "");
        mock.enqueue(207, &[XML], &single_response("/moved/"));

        let mut relations = vec![];
        res.propfind(0, &[RESOURCETYPE], |_, relation| {
            relations.push(relation);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(relations, vec![HrefRelation::SelfRef]);
        assert_eq!(res.location().as_str(), "https://example.com/moved/");
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, "https://example.com/moved/");
        assert_eq!(requests[0].body, requests[1].body);
    }

    #[tokio::test]
    async fn redirect_budget() {
        let (mock, mut res) = resource("https://example.com/dav/");
        for i in 0..10 {
            let target = format!("/hop{}/", i);
            mock.enqueue(302, &[("location", target.as_str())], "");
        }
        let err = res.head(HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.http().map(|e| e.status), Some(StatusCode::FOUND));
        assert_eq!(mock.requests().len(), 6);
        assert_eq!(res.location().as_str(), "https://example.com/hop4/");
    }

    #[tokio::test]
    async fn redirect_failures_keep_location() {
        let (mock, mut res) = resource("https://example.com/dav/");
        mock.enqueue(302, &[("location", "/first/")], "");
        mock.enqueue(307, &[("location", "http://example.com/plain/")], "");
        let err = res.head(HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(mock.requests().len(), 2);
        assert_eq!(res.location().as_str(), "https://example.com/dav/");

        mock.enqueue(302, &[], "");
        let err = res.head(HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));

        // nothing queued: the exchange is cancelled
        mock.enqueue(302, &[("location", "/next/")], "");
        let err = res.head(HeaderMap::new()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(res.location().as_str(), "https://example.com/dav/");
    }

    #[tokio::test]
    async fn options_without_redirects() {
        let (mock, mut res) = resource("https://example.com/dav/");
        mock.enqueue(
            200,
            &[("dav", "1, 2, access-control"), ("dav", "calendar-access")],
            "",
        );
        let (capabilities, parts) = res.options(false).await.unwrap();
        assert_eq!(parts.status, StatusCode::OK);
        assert!(capabilities.contains("access-control"));
        assert!(capabilities.contains("calendar-access"));
        assert_eq!(mock.last().headers.get("content-length").unwrap(), "0");

        mock.enqueue(301, &[("location", "/elsewhere/")], "");
        let err = res.options(false).await.unwrap_err();
        assert_eq!(err.http().map(|e| e.status), Some(StatusCode::MOVED_PERMANENTLY));
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn put_conditional_headers() {
        let (mock, mut res) = resource("https://example.com/cal/event.ics");

        mock.enqueue(201, &[("etag", "\"new\"")], "");
        let parts = res
            .put("BEGIN:VCALENDAR", "text/calendar", None, None, true, HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(
            httputils::etag(&parts.headers).map(|e| e.tag),
            Some("new".to_string())
        );
        let request = mock.last();
        assert_eq!(request.headers.get("if-none-match").unwrap(), "*");
        assert!(request.headers.get("if-match").is_none());
        assert_eq!(request.headers.get("content-type").unwrap(), "text/calendar");

        mock.enqueue(204, &[], "");
        res.put("BEGIN:VCALENDAR", "text/calendar", Some("X"), Some("S"), false, HeaderMap::new())
            .await
            .unwrap();
        let request = mock.last();
        assert_eq!(request.headers.get("if-match").unwrap(), "\"X\"");
        assert_eq!(request.headers.get("if-schedule-tag-match").unwrap(), "\"S\"");
        assert!(request.headers.get("if-none-match").is_none());

        mock.enqueue(412, &[], "");
        let err = res
            .put("x", "text/calendar", Some("X"), None, false, HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.http().map(|e| &e.kind), Some(&HttpErrorKind::PreconditionFailed));
    }

    #[tokio::test]
    async fn multistatus_is_an_error_for_move_copy_delete() {
        let failure = r#"<d:multistatus xmlns:d="DAV:"><d:response>
            <d:href>/dav/locked</d:href><d:status>HTTP/1.1 423 Locked</d:status>
        </d:response></d:multistatus>"#;
        let (mock, mut res) = resource("https://example.com/dav/");
        let dest = Url::parse("https://example.com/other/").unwrap();

        mock.enqueue(207, &[XML], failure);
        let err = res.move_to(&dest, false, HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.http().map(|e| e.status), Some(StatusCode::MULTI_STATUS));
        assert_eq!(res.location().as_str(), "https://example.com/dav/");
        let request = mock.last();
        assert_eq!(request.headers.get("destination").unwrap(), "https://example.com/other/");
        assert_eq!(request.headers.get("overwrite").unwrap(), "F");

        mock.enqueue(207, &[XML], failure);
        let err = res.copy(&dest, true, HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.http().map(|e| e.status), Some(StatusCode::MULTI_STATUS));
        assert!(mock.last().headers.get("overwrite").is_none());

        mock.enqueue(207, &[XML], failure);
        let err = res.delete(None, None, HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.http().map(|e| &e.kind), Some(&HttpErrorKind::Other));
    }

    #[tokio::test]
    async fn move_follows_server_location() {
        let (mock, mut res) = resource("https://example.com/dav/a.vcf");
        let dest = Url::parse("https://example.com/dav/b.vcf").unwrap();

        mock.enqueue(201, &[], "");
        res.move_to(&dest, true, HeaderMap::new()).await.unwrap();
        assert_eq!(res.location(), &dest);
        assert_eq!(res.file_name(), "b.vcf");

        mock.enqueue(201, &[("location", "/dav/c.vcf")], "");
        res.move_to(&dest, true, HeaderMap::new()).await.unwrap();
        assert_eq!(res.location().as_str(), "https://example.com/dav/c.vcf");
    }

    #[tokio::test]
    async fn move_resolves_relative_location_against_source() {
        let (mock, mut res) = resource("https://example.com/dav/a.vcf");
        let dest = Url::parse("https://example.com/archive/2023/b.vcf").unwrap();

        mock.enqueue(201, &[("location", "c.vcf")], "");
        res.move_to(&dest, true, HeaderMap::new()).await.unwrap();
        assert_eq!(res.location().as_str(), "https://example.com/dav/c.vcf");
    }

    #[tokio::test]
    async fn http_errors() {
        let (mock, mut res) = resource("https://example.com/dav/");

        mock.enqueue(404, &[("content-type", "text/html")], "<h1>Not here</h1>");
        let err = res.get("text/calendar", HeaderMap::new()).await.unwrap_err();
        let http = err.http().unwrap();
        assert_eq!(http.kind, HttpErrorKind::NotFound);
        assert_eq!(http.excerpt.request, "GET https://example.com/dav/");
        assert!(http.excerpt.response.as_ref().unwrap().contains("<h1>Not here</h1>"));

        mock.enqueue(
            503,
            &[("retry-after", "120"), ("content-type", "application/octet-stream"), ("content-length", "4")],
            "\x00\x01\x02\x03",
        );
        let err = res.head(HeaderMap::new()).await.unwrap_err();
        let http = err.http().unwrap();
        assert!(matches!(
            http.kind,
            HttpErrorKind::ServiceUnavailable { retry_after: Some(_) }
        ));
        assert!(http
            .excerpt
            .response
            .as_ref()
            .unwrap()
            .contains("<4 bytes binary body>"));

        mock.enqueue(410, &[], "");
        let err = res.head(HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.http().map(|e| &e.kind), Some(&HttpErrorKind::Gone));
    }

    #[tokio::test]
    async fn error_body_violations() {
        let (mock, mut res) = resource("https://example.com/cal/");
        mock.enqueue(
            403,
            &[XML],
            r#"<?xml version="1.0"?><D:error xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
                <C:no-uid-conflict><D:href>/cal/other.ics</D:href></C:no-uid-conflict>
            </D:error>"#,
        );
        let err = res
            .put("BEGIN:VCALENDAR", "text/calendar", None, None, true, HeaderMap::new())
            .await
            .unwrap_err();
        let http = err.http().unwrap();
        assert_eq!(http.kind, HttpErrorKind::Forbidden);
        assert_eq!(
            http.errors,
            vec![Violation {
                name: Name::new(crate::xml::CAL_URN, "no-uid-conflict"),
                hrefs: vec!["/cal/other.ics".into()],
            }]
        );
        assert!(http.excerpt.request.contains("BEGIN:VCALENDAR"));

        mock.enqueue(400, &[XML], "<broken");
        let err = res.head(HeaderMap::new()).await.unwrap_err();
        assert!(err.http().unwrap().errors.is_empty());
    }

    #[tokio::test]
    async fn proppatch_accepts_any_success() {
        let (mock, mut res) = resource("https://example.com/dav/");
        mock.enqueue(200, &[], "");
        let mut calls = 0;
        res.proppatch(vec![(DISPLAYNAME, "New".into())], vec![], |_, _| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(mock.last().method.as_str(), "PROPPATCH");

        mock.enqueue(207, &[XML], &single_response("/dav/"));
        res.proppatch(vec![], vec![CALENDAR_COLOR], |_, _| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(calls, 1);
        assert!(mock.last().body.contains("<d:remove>"));
    }

    #[tokio::test]
    async fn mkcol_uses_trailing_slash() {
        let (mock, mut res) = resource("https://example.com/cal/new");
        mock.enqueue(201, &[], "");
        let mkcalendar = Method::from_bytes(b"MKCALENDAR").unwrap();
        res.mkcol(None, Some(mkcalendar), HeaderMap::new()).await.unwrap();
        let request = mock.last();
        assert_eq!(request.method.as_str(), "MKCALENDAR");
        assert_eq!(request.url, "https://example.com/cal/new/");
        assert_eq!(res.location().as_str(), "https://example.com/cal/new");
    }

    #[tokio::test]
    async fn excerpt_names_the_requested_url() {
        let (mock, mut res) = resource("https://example.com/cal/new");
        mock.enqueue(405, &[("content-type", "text/plain")], "collection exists");
        let err = res.mkcol(None, None, HeaderMap::new()).await.unwrap_err();
        let http = err.http().unwrap();
        assert_eq!(http.excerpt.request, "MKCOL https://example.com/cal/new/");
        assert_eq!(res.location().as_str(), "https://example.com/cal/new");
    }

    #[tokio::test]
    async fn ranges_and_common_headers() {
        let (mock, res) = resource("https://example.com/file.bin");
        let mut common = HeaderMap::new();
        common.insert("x-client", HeaderValue::from_static("probe"));
        let mut res = res.with_headers(common);

        mock.enqueue(206, &[], "abcd");
        res.get_range("*/*", 10, 4, HeaderMap::new()).await.unwrap();
        let request = mock.last();
        assert_eq!(request.headers.get("range").unwrap(), "bytes=10-13");
        assert_eq!(request.headers.get("x-client").unwrap(), "probe");
    }

    #[tokio::test]
    async fn callback_and_transport_errors() {
        let (mock, mut res) = resource("https://example.com/dav/");
        mock.enqueue(207, &[XML], &single_response("/dav/"));
        let err = res
            .propfind(0, &[], |_, _| anyhow::bail!("stop"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Callback(_)));

        let err = res.propfind(0, &[], |_, _| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Cancelled)));
    }
}
