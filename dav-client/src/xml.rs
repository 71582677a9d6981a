use std::borrow::Cow;
use std::pin::Pin;

use futures::Future;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::name::{QName, ResolveResult};
use quick_xml::reader::NsReader;
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::error::ParsingError;

// Constants
pub const DAV_URN: &str = "DAV:";
pub const CAL_URN: &str = "urn:ietf:params:xml:ns:caldav";
pub const CARD_URN: &str = "urn:ietf:params:xml:ns:carddav";
pub const CALSERVER_URN: &str = "http://calendarserver.org/ns/";
pub const ICAL_URN: &str = "http://apple.com/ns/ical/";

const PREFIXES: [(&str, &str); 5] = [
    (DAV_URN, "d"),
    (CAL_URN, "c"),
    (CARD_URN, "card"),
    (CALSERVER_URN, "cs"),
    (ICAL_URN, "ical"),
];

// Async traits
pub trait IWrite: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> IWrite for T {}
pub trait IRead: AsyncBufRead + Send {}
impl<T: AsyncBufRead + Send> IRead for T {}

// Serialization trait
pub trait QWrite {
    fn qwrite(
        &self,
        xml: &mut Writer<impl IWrite>,
    ) -> impl Future<Output = Result<(), quick_xml::Error>> + Send;
}

/// An XML element name: namespace URI and local part.
/// Equality is structural, prefixes never matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    pub namespace: Cow<'static, str>,
    pub local: Cow<'static, str>,
}
impl Name {
    pub const fn new_static(namespace: &'static str, local: &'static str) -> Self {
        Self {
            namespace: Cow::Borrowed(namespace),
            local: Cow::Borrowed(local),
        }
    }

    pub const fn dav(local: &'static str) -> Self {
        Self::new_static(DAV_URN, local)
    }

    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: Cow::Owned(namespace.into()),
            local: Cow::Owned(local.into()),
        }
    }
}
impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local)
    }
}

// ---------------

/// Transform a Rust object into an XML stream of characters
pub struct Writer<T: IWrite> {
    pub q: quick_xml::writer::Writer<T>,
    pub ns_to_apply: Vec<(String, String)>,
}
impl<T: IWrite> Writer<T> {
    /// The first element created declares every well-known namespace
    pub fn new(inner: T) -> Self {
        let ns_to_apply = PREFIXES
            .iter()
            .map(|(ns, prefix)| (format!("xmlns:{}", prefix), ns.to_string()))
            .collect();
        Self {
            q: quick_xml::writer::Writer::new(inner),
            ns_to_apply,
        }
    }

    pub fn create_dav_element(&mut self, name: &str) -> BytesStart<'static> {
        self.create_ns_element("d", name)
    }
    pub fn create_cal_element(&mut self, name: &str) -> BytesStart<'static> {
        self.create_ns_element("c", name)
    }
    pub fn create_card_element(&mut self, name: &str) -> BytesStart<'static> {
        self.create_ns_element("card", name)
    }

    /// Elements outside of the well-known namespaces carry their own
    /// default namespace declaration.
    pub fn create_element(&mut self, name: &Name) -> BytesStart<'static> {
        let prefix = PREFIXES
            .iter()
            .find(|(ns, _)| *ns == name.namespace)
            .map(|(_, prefix)| *prefix);
        match prefix {
            Some(prefix) => self.create_ns_element(prefix, &name.local),
            None => {
                let mut start = self.apply_ns(BytesStart::new(name.local.to_string()));
                if !name.namespace.is_empty() {
                    start.push_attribute(("xmlns", name.namespace.as_ref()));
                }
                start
            }
        }
    }

    fn create_ns_element(&mut self, ns: &str, name: &str) -> BytesStart<'static> {
        self.apply_ns(BytesStart::new(format!("{}:{}", ns, name)))
    }

    fn apply_ns(&mut self, mut start: BytesStart<'static>) -> BytesStart<'static> {
        if !self.ns_to_apply.is_empty() {
            start.extend_attributes(
                self.ns_to_apply
                    .iter()
                    .map(|(k, n)| (k.as_str(), n.as_str())),
            );
            self.ns_to_apply.clear()
        }
        start
    }

    /// `<name>text</name>`
    pub async fn text_element(
        &mut self,
        start: BytesStart<'static>,
        text: &str,
    ) -> Result<(), quick_xml::Error> {
        let end = start.to_end().into_owned();
        self.q.write_event_async(Event::Start(start)).await?;
        self.q
            .write_event_async(Event::Text(BytesText::new(text)))
            .await?;
        self.q.write_event_async(Event::End(end)).await
    }
}

/// What the reader currently points at
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartDocument,
    Start(Name),
    End(Name),
    Text(String),
    EndDocument,
}

/// Depth-aware pull reader over an XML stream.
///
/// Empty elements are reported as a START immediately followed by its END,
/// comments, processing instructions and declarations are never surfaced.
/// The depth of a START or END token is the depth of its element, the
/// document element being at depth 1.
pub struct Reader {
    rdr: NsReader<Pin<Box<dyn AsyncBufRead + Send>>>,
    buf: Vec<u8>,
    cur: Token,
    start: Option<BytesStart<'static>>,
    pending_end: Option<Name>,
    depth: usize,
    pop: bool,
}
impl Reader {
    pub fn new(src: impl IRead + 'static) -> Self {
        let src: Pin<Box<dyn AsyncBufRead + Send>> = Box::pin(src);
        Self {
            rdr: NsReader::from_reader(src),
            buf: vec![],
            cur: Token::StartDocument,
            start: None,
            pending_end: None,
            depth: 0,
            pop: false,
        }
    }

    pub fn peek(&self) -> &Token {
        &self.cur
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Name of the element the reader is on, if it is a START or END token
    pub fn name(&self) -> Option<&Name> {
        match &self.cur {
            Token::Start(n) | Token::End(n) => Some(n),
            _ => None,
        }
    }

    fn resolve(&self, qname: QName) -> Name {
        let (ns, local) = self.rdr.resolve_element(qname);
        let namespace = match ns {
            ResolveResult::Bound(v) => String::from_utf8_lossy(v.into_inner()).into_owned(),
            _ => String::new(),
        };
        Name::new(
            namespace,
            String::from_utf8_lossy(local.into_inner()).into_owned(),
        )
    }

    /// read one more token
    pub async fn next(&mut self) -> Result<(), ParsingError> {
        if self.pop {
            self.depth -= 1;
            self.pop = false;
        }
        self.start = None;

        if let Some(name) = self.pending_end.take() {
            self.pop = true;
            self.cur = Token::End(name);
            return Ok(());
        }

        loop {
            let evt = self
                .rdr
                .read_event_into_async(&mut self.buf)
                .await?
                .into_owned();
            self.buf.clear();

            self.cur = match evt {
                Event::Start(bs) => {
                    let name = self.resolve(bs.name());
                    self.depth += 1;
                    self.start = Some(bs);
                    Token::Start(name)
                }
                Event::Empty(bs) => {
                    let name = self.resolve(bs.name());
                    self.depth += 1;
                    self.start = Some(bs);
                    self.pending_end = Some(name.clone());
                    Token::Start(name)
                }
                Event::End(be) => {
                    if self.depth == 0 {
                        return Err(ParsingError::WrongToken);
                    }
                    let name = self.resolve(be.name());
                    self.pop = true;
                    Token::End(name)
                }
                Event::Text(escaped) => Token::Text(escaped.unescape()?.into_owned()),
                Event::CData(unescaped) => {
                    Token::Text(std::str::from_utf8(unescaped.as_ref())?.to_string())
                }
                Event::Eof if self.depth > 0 => return Err(ParsingError::Eof),
                Event::Eof => Token::EndDocument,
                _ => continue,
            };
            return Ok(());
        }
    }

    /// Advance to the next child element of the element at `depth`.
    /// Returns `None` once that element's END (or the end of the document)
    /// is reached. Whatever a previous child left unconsumed is skipped.
    pub async fn next_child(&mut self, depth: usize) -> Result<Option<Name>, ParsingError> {
        loop {
            self.next().await?;
            match &self.cur {
                Token::Start(name) if self.depth == depth + 1 => return Ok(Some(name.clone())),
                Token::End(_) if self.depth == depth => return Ok(None),
                Token::EndDocument => return Ok(None),
                _ => (),
            }
        }
    }

    /// Advance to the next child of the element at `depth` named `name`
    pub async fn next_tag(&mut self, depth: usize, name: &Name) -> Result<bool, ParsingError> {
        while let Some(child) = self.next_child(depth).await? {
            if &child == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Consume the current element and return its direct character data,
    /// or `None` when it had no text at all.
    pub async fn read_text(&mut self) -> Result<Option<String>, ParsingError> {
        let depth = match &self.cur {
            Token::Start(_) => self.depth,
            _ => return Err(ParsingError::WrongToken),
        };

        let mut acc: Option<String> = None;
        loop {
            self.next().await?;
            match &self.cur {
                Token::Text(txt) if self.depth == depth => {
                    acc.get_or_insert_with(String::new).push_str(txt)
                }
                Token::End(_) if self.depth == depth => return Ok(acc),
                Token::EndDocument => return Err(ParsingError::Eof),
                _ => (),
            }
        }
    }

    /// Collect the trimmed text of every `name` child of the current
    /// element. A matching child without text is an error.
    pub async fn read_text_list(
        &mut self,
        name: &Name,
        out: &mut Vec<String>,
    ) -> Result<(), ParsingError> {
        let depth = match &self.cur {
            Token::Start(_) => self.depth,
            _ => return Err(ParsingError::WrongToken),
        };
        while self.next_tag(depth, name).await? {
            match self.read_text().await? {
                Some(txt) => out.push(txt.trim().to_string()),
                None => return Err(ParsingError::MissingText),
            }
        }
        Ok(())
    }

    /// Consume the current element up to its END
    pub async fn skip(&mut self) -> Result<(), ParsingError> {
        match &self.cur {
            Token::Start(_) => {
                let depth = self.depth;
                self.skip_to_end(depth).await
            }
            _ => Ok(()),
        }
    }

    /// Move forward until the END of the element at `depth`.
    /// Does nothing if the reader already left that element.
    pub async fn skip_to_end(&mut self, depth: usize) -> Result<(), ParsingError> {
        loop {
            if self.depth < depth {
                return Ok(());
            }
            match &self.cur {
                Token::End(_) if self.depth == depth => return Ok(()),
                Token::EndDocument => return Ok(()),
                _ => self.next().await?,
            }
        }
    }

    /// Unprefixed attribute of the current START element
    pub fn attr(&self, attr: &str) -> Option<String> {
        match &self.start {
            Some(bs) => match bs.try_get_attribute(attr) {
                Ok(Some(attr)) => attr
                    .decode_and_unescape_value(&self.rdr)
                    .ok()
                    .map(|v| v.into_owned()),
                _ => None,
            },
            None => None,
        }
    }
}
