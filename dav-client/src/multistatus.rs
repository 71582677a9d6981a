use std::io::Cursor;
use std::pin::Pin;

use http::header::{HeaderMap, CONTENT_TYPE};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use url::Url;

use super::error::{Error, ParsingError, TransportError};
use super::href;
use super::httputils::MediaType;
use super::registry::PropertyRegistry;
use super::types::*;
use super::xml::Reader;

pub type BoxRead = Pin<Box<dyn AsyncBufRead + Send>>;

const XML_SIGNATURE: &[u8] = b"<?xml";

/// Make sure a 207 body can be parsed as XML.
///
/// A missing Content-Type is accepted. A non-XML one is accepted only if
/// the body starts with an XML declaration; the sniffed bytes are put
/// back in front of the returned reader.
pub async fn check_content_type(headers: &HeaderMap, mut body: BoxRead) -> Result<BoxRead, Error> {
    let content_type = match headers.get(CONTENT_TYPE) {
        None => {
            tracing::warn!("Received Multi-Status without Content-Type, assuming XML");
            return Ok(body);
        }
        Some(ct) => String::from_utf8_lossy(ct.as_bytes()).into_owned(),
    };
    if MediaType::parse(&content_type).map(|mt| mt.is_xml()).unwrap_or(false) {
        return Ok(body);
    }

    let mut prefix = Vec::with_capacity(XML_SIGNATURE.len());
    while prefix.len() < XML_SIGNATURE.len() {
        let buf = body.fill_buf().await.map_err(TransportError::Io)?;
        if buf.is_empty() {
            break;
        }
        let take = buf.len().min(XML_SIGNATURE.len() - prefix.len());
        prefix.extend_from_slice(&buf[..take]);
        body.as_mut().consume(take);
    }

    if prefix != XML_SIGNATURE {
        return Err(Error::protocol("Received non-XML 207 Multi-Status"));
    }
    tracing::warn!(
        content_type,
        "Received 207 Multi-Status that seems to be XML but has a non-XML Content-Type"
    );
    Ok(Box::pin(Cursor::new(prefix).chain(body)))
}

impl Response {
    /// Parse the `<response>` element the reader is on and hand it to
    /// `callback` together with its relation to `location`.
    pub async fn parse<F>(
        xml: &mut Reader,
        location: &Url,
        registry: &PropertyRegistry,
        callback: &mut F,
    ) -> Result<(), Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let depth = xml.depth();
        let mut href: Option<Url> = None;
        let mut status = None;
        let mut propstat = vec![];
        let mut errors = vec![];
        let mut new_location = None;

        while let Some(child) = xml.next_child(depth).await? {
            if child == HREF {
                let txt = xml.read_text().await?.unwrap_or_default();
                let txt = txt.trim();
                if txt.is_empty() {
                    continue;
                }
                if href.is_some() {
                    tracing::debug!(href = txt, "ignoring additional href in response");
                    continue;
                }
                match href::resolve(location, txt) {
                    Ok(url) => href = Some(url),
                    Err(e) => tracing::warn!(err=%e, href = txt, "ignoring invalid href"),
                }
            } else if child == STATUS {
                let line = xml.read_text().await?.unwrap_or_default();
                status = Some(Status::parse(&line).unwrap_or_else(|| {
                    tracing::warn!(status = line.trim(), "invalid status line in response");
                    Status::invalid()
                }));
            } else if child == PROPSTAT {
                propstat.push(PropStat::parse(xml, registry).await?);
            } else if child == ERROR {
                errors.extend(Violation::parse_all(xml).await?);
            } else if child == LOCATION {
                let inner = xml.depth();
                if xml.next_tag(inner, &HREF).await? {
                    if let Some(txt) = xml.read_text().await? {
                        new_location = href::resolve(location, txt.trim()).ok();
                    }
                    xml.skip_to_end(inner).await?;
                }
            }
        }

        let href = match href {
            Some(url) => url,
            None => {
                tracing::warn!("ignoring response without valid href");
                return Ok(());
            }
        };

        let mut response = Response {
            href,
            propstat,
            status,
            errors,
            location: new_location,
        };
        // compared as received, the server may echo the request URL without its slash
        let mut relation = href::relation(location, &response.href);
        if response.is_collection() {
            response.href = href::with_trailing_slash(&response.href);
            if href::is_same(location, &response.href) {
                relation = HrefRelation::SelfRef;
            }
        }

        callback(response, relation).map_err(Error::Callback)
    }
}

/// Walks a Multi-Status document, delivering each `<response>` to a
/// callback as soon as it is parsed.
pub struct MultiStatusParser<'a> {
    /// URL the request was finally sent to, after redirects
    pub location: &'a Url,
    pub registry: &'a PropertyRegistry,
}
impl<'a> MultiStatusParser<'a> {
    pub fn new(location: &'a Url, registry: &'a PropertyRegistry) -> Self {
        Self { location, registry }
    }

    /// Returns the properties found outside of `<response>`, like the
    /// sync-token of a sync-collection report.
    pub async fn parse<F>(&self, xml: &mut Reader, mut callback: F) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        while let Some(root) = xml.next_child(0).await? {
            if root == MULTISTATUS {
                return self.parse_multistatus(xml, &mut callback).await;
            }
        }
        Err(ParsingError::MissingMultistatus.into())
    }

    async fn parse_multistatus<F>(&self, xml: &mut Reader, callback: &mut F) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let depth = xml.depth();
        let mut extra = vec![];
        while let Some(child) = xml.next_child(depth).await? {
            if child == RESPONSE {
                Response::parse(xml, self.location, self.registry, callback).await?;
            } else if child == SYNC_TOKEN {
                if let Some(token) = xml.read_text().await? {
                    extra.push(Property::SyncToken(token.trim().to_string()));
                }
            }
        }
        Ok(extra)
    }
}
