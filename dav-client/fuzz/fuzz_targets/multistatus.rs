#![no_main]

use libfuzzer_sys::arbitrary;
use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use dav_client::href;
use dav_client::multistatus::MultiStatusParser;
use dav_client::registry::PropertyRegistry;
use dav_client::types::HrefRelation;
use dav_client::xml::Reader;
use tokio::runtime::Builder;
use url::Url;

const TOKENS: [&str; 48] = [
    "0",
    "1",
    "/",
    "/dav/",
    "/dav/a.ics",
    "relative:colon.vcf",
    "http://example.com/dav/",
    "HTTP/1.1 200 OK",
    "HTTP/1.1 404 Not Found",
    "HTTP/1.1 507 Insufficient Storage",
    "ICY 200 OK",
    "HTTP/1.1 2000",
    "1997-12-01T18:27:21-08:00",
    "Mon, 12 Jan 1998 09:25:56 GMT",
    "\"abcdef\"",
    "W/\"abcdef\"",
    "collection",
    "creationdate",
    "displayname",
    "error",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "href",
    "location",
    "multistatus",
    "number-of-matches-within-limits",
    "owner",
    "prop",
    "propstat",
    "resourcetype",
    "response",
    "responsedescription",
    "status",
    "sync-token",
    "current-user-principal",
    "current-user-privilege-set",
    "privilege",
    "read",
    "write",
    "all",
    "supported-report-set",
    "supported-report",
    "report",
    "quota-used-bytes",
    "group-membership",
    "text/html",
];

#[derive(Arbitrary)]
struct Token(usize);
impl Token {
    fn serialize(&self) -> &'static str {
        TOKENS[self.0 % TOKENS.len()]
    }
}

#[derive(Arbitrary)]
struct Tag {
    name: Token,
    attr: Option<(Token, Token)>,
}
impl Tag {
    fn start(&self) -> String {
        let mut acc = format!("D:{}", self.name.serialize());
        if let Some((k, v)) = &self.attr {
            acc.push_str(&format!(" {}=\"{}\"", k.serialize(), v.serialize()));
        }
        acc
    }
    fn end(&self) -> String {
        format!("D:{}", self.name.serialize())
    }
}

#[derive(Arbitrary)]
enum XmlNode {
    Node(Tag, Vec<Self>),
    Number(u64),
    Text(Token),
}
impl std::fmt::Debug for XmlNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}
impl XmlNode {
    fn serialize(&self) -> String {
        match self {
            Self::Node(tag, children) => match children.is_empty() {
                true => format!("<{}/>", tag.start()),
                false => format!(
                    "<{}>{}</{}>",
                    tag.start(),
                    children.iter().map(|v| v.serialize()).collect::<String>(),
                    tag.end()
                ),
            },
            Self::Number(v) => format!("{}", v),
            Self::Text(v) => v.serialize().to_string(),
        }
    }
}

fuzz_target!(|nodes: Vec<XmlNode>| {
    let gen = format!(
        "<?xml version=\"1.0\"?><D:multistatus xmlns:D=\"DAV:\">{}</D:multistatus>",
        nodes.iter().map(|n| n.serialize()).collect::<String>()
    );
    let location = Url::parse("http://example.com/dav/").expect("valid url");
    let registry = PropertyRegistry::with_defaults();

    let rt = Builder::new_current_thread()
        .build()
        .expect("tokio runtime initialization");

    rt.block_on(async {
        let mut rdr = Reader::new(std::io::Cursor::new(gen.into_bytes()));
        let _ = MultiStatusParser::new(&location, &registry)
            .parse(&mut rdr, |response, relation| {
                // the delivered href may only differ from a SELF match by its trailing slash
                if href::is_same(&location, &response.href) {
                    assert_eq!(relation, HrefRelation::SelfRef);
                }
                if relation == HrefRelation::SelfRef {
                    let slashed = href::with_trailing_slash(&response.href);
                    assert!(href::is_same(&href::with_trailing_slash(&location), &slashed));
                }
                Ok(())
            })
            .await;
    })
});
