use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use http::{StatusCode, Version};

use super::error::ParsingError;
use super::httputils;
use super::registry::{PropertyFactory, PropertyRegistry};
use super::types::*;
use super::xml::{Name, Reader, Token};

// ---- STATUS LINE ----

impl Status {
    /// Tolerant status line parser: `HTTP/x.y`, `ICY` or `SOURCETABLE`,
    /// a 3 digit code and an optional reason phrase.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();

        let (version, rest) = if let Some(rest) = line.strip_prefix("HTTP/") {
            let mut chars = rest.chars();
            let major = chars.next()?.to_digit(10)?;
            if chars.next()? != '.' {
                return None;
            }
            let minor = chars.next()?.to_digit(10)?;
            let version = match (major, minor) {
                (0, 9) => Version::HTTP_09,
                (1, 0) => Version::HTTP_10,
                (2, _) => Version::HTTP_2,
                (3, _) => Version::HTTP_3,
                _ => Version::HTTP_11,
            };
            (version, &rest[3..])
        } else if let Some(rest) = line.strip_prefix("ICY") {
            (Version::HTTP_10, rest)
        } else if let Some(rest) = line.strip_prefix("SOURCETABLE") {
            (Version::HTTP_11, rest)
        } else {
            return None;
        };

        let rest = rest.strip_prefix(' ')?;
        let code = rest.get(..3)?;
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let reason = match &rest[3..] {
            "" => "",
            more => more.strip_prefix(' ')?,
        };

        Some(Self {
            version,
            code: StatusCode::from_u16(code.parse().ok()?).ok()?,
            reason: reason.to_string(),
        })
    }
}

// ---- ERROR ----

impl Violation {
    /// Parse the precondition element the reader is on, collecting every
    /// `<href>` found below it.
    pub async fn parse(xml: &mut Reader) -> Result<Self, ParsingError> {
        let name = xml.name().cloned().ok_or(ParsingError::WrongToken)?;
        let depth = xml.depth();
        let mut hrefs = vec![];

        loop {
            xml.next().await?;
            let is_href = match xml.peek() {
                Token::End(_) if xml.depth() == depth => break,
                Token::EndDocument => return Err(ParsingError::Eof),
                Token::Start(n) => *n == HREF,
                _ => false,
            };
            if is_href {
                if let Some(href) = xml.read_text().await? {
                    hrefs.push(href.trim().to_string());
                }
            }
        }

        Ok(Self { name, hrefs })
    }

    /// Parse every child of the `<error>` element the reader is on
    pub async fn parse_all(xml: &mut Reader) -> Result<Vec<Self>, ParsingError> {
        let depth = xml.depth();
        let mut acc = vec![];
        while xml.next_child(depth).await?.is_some() {
            acc.push(Self::parse(xml).await?);
        }
        Ok(acc)
    }
}

// ---- PROPSTAT ----

impl PropStat {
    pub async fn parse(
        xml: &mut Reader,
        registry: &PropertyRegistry,
    ) -> Result<Self, ParsingError> {
        let depth = xml.depth();
        let (mut properties, mut status, mut errors) = (vec![], None, vec![]);

        while let Some(child) = xml.next_child(depth).await? {
            if child == PROP {
                properties.extend(registry.parse_prop(xml).await?);
            } else if child == STATUS {
                let line = xml.read_text().await?.unwrap_or_default();
                status = Some(Status::parse(&line).unwrap_or_else(|| {
                    tracing::warn!(status = line.trim(), "invalid status line in propstat");
                    Status::invalid()
                }));
            } else if child == ERROR {
                errors.extend(Violation::parse_all(xml).await?);
            }
        }

        Ok(Self {
            properties,
            status: status.unwrap_or_else(Status::assuming_ok),
            errors,
        })
    }
}

// ---- PROPERTY FACTORIES ----

/// A property read from the element text
pub struct ValueFactory {
    name: Name,
    parse: fn(&str) -> Option<Property>,
}
impl ValueFactory {
    pub fn new(name: Name, parse: fn(&str) -> Option<Property>) -> Arc<dyn PropertyFactory> {
        Arc::new(Self { name, parse })
    }
}
#[async_trait]
impl PropertyFactory for ValueFactory {
    fn name(&self) -> Name {
        self.name.clone()
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let txt = xml.read_text().await?.unwrap_or_default();
        let prop = (self.parse)(&txt);
        if prop.is_none() {
            tracing::warn!(property=%self.name, value=txt.trim(), "ignoring invalid property value");
        }
        Ok(prop)
    }
}

/// A property holding at most one `<href>`
pub struct HrefFactory {
    name: Name,
    build: fn(Option<String>) -> Property,
}
impl HrefFactory {
    pub fn new(name: Name, build: fn(Option<String>) -> Property) -> Arc<dyn PropertyFactory> {
        Arc::new(Self { name, build })
    }
}
#[async_trait]
impl PropertyFactory for HrefFactory {
    fn name(&self) -> Name {
        self.name.clone()
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let depth = xml.depth();
        let mut href = None;
        while xml.next_tag(depth, &HREF).await? {
            let txt = xml.read_text().await?;
            if href.is_none() {
                href = txt.map(|t| t.trim().to_string());
            }
        }
        Ok(Some((self.build)(href)))
    }
}

/// A property holding a list of `<href>`
pub struct HrefListFactory {
    name: Name,
    build: fn(Vec<String>) -> Property,
}
impl HrefListFactory {
    pub fn new(name: Name, build: fn(Vec<String>) -> Property) -> Arc<dyn PropertyFactory> {
        Arc::new(Self { name, build })
    }
}
#[async_trait]
impl PropertyFactory for HrefListFactory {
    fn name(&self) -> Name {
        self.name.clone()
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let mut hrefs = vec![];
        xml.read_text_list(&HREF, &mut hrefs).await?;
        Ok(Some((self.build)(hrefs)))
    }
}

/// DAV:resourcetype, the names of its children
struct ResourceTypeFactory;
#[async_trait]
impl PropertyFactory for ResourceTypeFactory {
    fn name(&self) -> Name {
        RESOURCETYPE
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let depth = xml.depth();
        let mut types = vec![];
        while let Some(child) = xml.next_child(depth).await? {
            types.push(child);
        }
        Ok(Some(Property::ResourceType(types)))
    }
}

/// DAV:current-user-privilege-set
struct PrivilegeSetFactory;
#[async_trait]
impl PropertyFactory for PrivilegeSetFactory {
    fn name(&self) -> Name {
        CURRENT_USER_PRIVILEGE_SET
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let depth = xml.depth();
        let mut set = PrivilegeSet::default();
        while xml.next_tag(depth, &PRIVILEGE).await? {
            let inner = xml.depth();
            while let Some(privilege) = xml.next_child(inner).await? {
                if privilege.namespace != crate::xml::DAV_URN {
                    continue;
                }
                match &*privilege.local {
                    "all" => {
                        set.may_read = true;
                        set.may_write_properties = true;
                        set.may_write_content = true;
                        set.may_bind = true;
                        set.may_unbind = true;
                    }
                    "read" => set.may_read = true,
                    "write" => {
                        set.may_write_properties = true;
                        set.may_write_content = true;
                        set.may_bind = true;
                        set.may_unbind = true;
                    }
                    "write-properties" => set.may_write_properties = true,
                    "write-content" => set.may_write_content = true,
                    "bind" => set.may_bind = true,
                    "unbind" => set.may_unbind = true,
                    _ => (),
                }
            }
        }
        Ok(Some(Property::CurrentUserPrivilegeSet(set)))
    }
}

/// DAV:supported-report-set, RFC 3253 section 3.1.5
struct ReportSetFactory;
#[async_trait]
impl PropertyFactory for ReportSetFactory {
    fn name(&self) -> Name {
        SUPPORTED_REPORT_SET
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let depth = xml.depth();
        let mut reports = vec![];
        while xml.next_tag(depth, &SUPPORTED_REPORT).await? {
            let supported = xml.depth();
            while xml.next_tag(supported, &REPORT).await? {
                let report = xml.depth();
                if let Some(name) = xml.next_child(report).await? {
                    reports.push(name);
                    xml.skip_to_end(report).await?;
                }
            }
        }
        Ok(Some(Property::SupportedReportSet(reports)))
    }
}

/// CALDAV:supported-calendar-component-set
struct ComponentSetFactory;
#[async_trait]
impl PropertyFactory for ComponentSetFactory {
    fn name(&self) -> Name {
        SUPPORTED_CALENDAR_COMPONENT_SET
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let depth = xml.depth();
        let mut components = vec![];
        while xml.next_tag(depth, &COMP).await? {
            if let Some(name) = xml.attr("name") {
                components.push(name.to_uppercase());
            }
        }
        Ok(Some(Property::SupportedCalendarComponentSet(components)))
    }
}

/// supported-calendar-data and supported-address-data: a list of
/// elements carrying `content-type` and `version` attributes
pub struct DataTypeFactory {
    name: Name,
    child: Name,
    default_type: &'static str,
    build: fn(Vec<DataType>) -> Property,
}
#[async_trait]
impl PropertyFactory for DataTypeFactory {
    fn name(&self) -> Name {
        self.name.clone()
    }

    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
        let depth = xml.depth();
        let mut types = vec![];
        while xml.next_tag(depth, &self.child).await? {
            types.push(DataType {
                content_type: xml
                    .attr("content-type")
                    .unwrap_or_else(|| self.default_type.to_string()),
                version: xml.attr("version"),
            });
        }
        Ok(Some((self.build)(types)))
    }
}

fn text(txt: &str) -> String {
    txt.trim().to_string()
}

/// Every factory known to this crate
pub fn default_factories() -> Vec<Arc<dyn PropertyFactory>> {
    vec![
        // RFC 4918
        ValueFactory::new(CREATIONDATE, |txt| {
            DateTime::parse_from_rfc3339(txt.trim())
                .ok()
                .map(Property::CreationDate)
        }),
        ValueFactory::new(DISPLAYNAME, |txt| Some(Property::DisplayName(txt.to_string()))),
        ValueFactory::new(GETCONTENTLENGTH, |txt| {
            txt.trim().parse().ok().map(Property::GetContentLength)
        }),
        ValueFactory::new(GETCONTENTTYPE, |txt| Some(Property::GetContentType(text(txt)))),
        ValueFactory::new(GETETAG, |txt| match txt.trim() {
            "" => None,
            tag => Some(Property::GetEtag(ETag::parse(tag))),
        }),
        ValueFactory::new(GETLASTMODIFIED, |txt| {
            httputils::parse_http_date(txt).map(Property::GetLastModified)
        }),
        Arc::new(ResourceTypeFactory),
        // RFC 6578
        ValueFactory::new(SYNC_TOKEN, |txt| Some(Property::SyncToken(text(txt)))),
        // RFC 3744, RFC 5397
        HrefFactory::new(CURRENT_USER_PRINCIPAL, Property::CurrentUserPrincipal),
        Arc::new(PrivilegeSetFactory),
        HrefFactory::new(OWNER, Property::Owner),
        HrefListFactory::new(GROUP_MEMBERSHIP, Property::GroupMembership),
        Arc::new(ReportSetFactory),
        // RFC 4331
        ValueFactory::new(QUOTA_AVAILABLE_BYTES, |txt| {
            txt.trim().parse().ok().map(Property::QuotaAvailableBytes)
        }),
        ValueFactory::new(QUOTA_USED_BYTES, |txt| {
            txt.trim().parse().ok().map(Property::QuotaUsedBytes)
        }),
        // RFC 5995
        HrefFactory::new(ADD_MEMBER, Property::AddMember),
        // RFC 4791
        HrefListFactory::new(CALENDAR_HOME_SET, Property::CalendarHomeSet),
        ValueFactory::new(CALENDAR_DESCRIPTION, |txt| {
            Some(Property::CalendarDescription(txt.to_string()))
        }),
        ValueFactory::new(CALENDAR_TIMEZONE, |txt| {
            Some(Property::CalendarTimezone(txt.to_string()))
        }),
        ValueFactory::new(CALENDAR_DATA, |txt| Some(Property::CalendarData(txt.to_string()))),
        ValueFactory::new(SCHEDULE_TAG, |txt| match txt.trim() {
            "" => None,
            tag => Some(Property::ScheduleTag(ETag::parse(tag))),
        }),
        Arc::new(ComponentSetFactory),
        Arc::new(DataTypeFactory {
            name: SUPPORTED_CALENDAR_DATA,
            child: CALENDAR_DATA,
            default_type: "text/calendar",
            build: Property::SupportedCalendarData,
        }),
        HrefListFactory::new(CALENDAR_USER_ADDRESS_SET, Property::CalendarUserAddressSet),
        ValueFactory::new(MAX_RESOURCE_SIZE, |txt| {
            txt.trim().parse().ok().map(Property::MaxResourceSize)
        }),
        // RFC 6352
        HrefListFactory::new(ADDRESSBOOK_HOME_SET, Property::AddressbookHomeSet),
        ValueFactory::new(ADDRESSBOOK_DESCRIPTION, |txt| {
            Some(Property::AddressbookDescription(txt.to_string()))
        }),
        ValueFactory::new(ADDRESS_DATA, |txt| Some(Property::AddressData(txt.to_string()))),
        Arc::new(DataTypeFactory {
            name: SUPPORTED_ADDRESS_DATA,
            child: ADDRESS_DATA_TYPE,
            default_type: "text/vcard",
            build: Property::SupportedAddressData,
        }),
        // CalendarServer, Apple iCal
        ValueFactory::new(GETCTAG, |txt| Some(Property::GetCTag(text(txt)))),
        HrefListFactory::new(CALENDAR_PROXY_READ_FOR, Property::CalendarProxyReadFor),
        HrefListFactory::new(CALENDAR_PROXY_WRITE_FOR, Property::CalendarProxyWriteFor),
        HrefFactory::new(SOURCE, Property::Source),
        ValueFactory::new(CALENDAR_COLOR, |txt| Some(Property::CalendarColor(text(txt)))),
    ]
}
