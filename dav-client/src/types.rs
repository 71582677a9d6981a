use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use http::{StatusCode, Version};
use url::Url;

use super::xml::{Name, CALSERVER_URN, CAL_URN, CARD_URN, ICAL_URN};

// ---- ELEMENT NAMES ----

// RFC 4918
pub const MULTISTATUS: Name = Name::dav("multistatus");
pub const RESPONSE: Name = Name::dav("response");
pub const HREF: Name = Name::dav("href");
pub const PROPSTAT: Name = Name::dav("propstat");
pub const PROP: Name = Name::dav("prop");
pub const STATUS: Name = Name::dav("status");
pub const ERROR: Name = Name::dav("error");
pub const LOCATION: Name = Name::dav("location");
pub const COLLECTION: Name = Name::dav("collection");
pub const CREATIONDATE: Name = Name::dav("creationdate");
pub const DISPLAYNAME: Name = Name::dav("displayname");
pub const GETCONTENTLENGTH: Name = Name::dav("getcontentlength");
pub const GETCONTENTTYPE: Name = Name::dav("getcontenttype");
pub const GETETAG: Name = Name::dav("getetag");
pub const GETLASTMODIFIED: Name = Name::dav("getlastmodified");
pub const RESOURCETYPE: Name = Name::dav("resourcetype");
// RFC 6578
pub const SYNC_TOKEN: Name = Name::dav("sync-token");
pub const NUMBER_OF_MATCHES_WITHIN_LIMITS: Name = Name::dav("number-of-matches-within-limits");
// RFC 3744, RFC 5397
pub const CURRENT_USER_PRINCIPAL: Name = Name::dav("current-user-principal");
pub const CURRENT_USER_PRIVILEGE_SET: Name = Name::dav("current-user-privilege-set");
pub const PRIVILEGE: Name = Name::dav("privilege");
pub const OWNER: Name = Name::dav("owner");
pub const GROUP_MEMBERSHIP: Name = Name::dav("group-membership");
pub const SUPPORTED_REPORT_SET: Name = Name::dav("supported-report-set");
pub const SUPPORTED_REPORT: Name = Name::dav("supported-report");
pub const REPORT: Name = Name::dav("report");
// RFC 4331
pub const QUOTA_AVAILABLE_BYTES: Name = Name::dav("quota-available-bytes");
pub const QUOTA_USED_BYTES: Name = Name::dav("quota-used-bytes");
// RFC 5995
pub const ADD_MEMBER: Name = Name::dav("add-member");
// RFC 4791
pub const CALENDAR_HOME_SET: Name = Name::new_static(CAL_URN, "calendar-home-set");
pub const CALENDAR_DESCRIPTION: Name = Name::new_static(CAL_URN, "calendar-description");
pub const CALENDAR_TIMEZONE: Name = Name::new_static(CAL_URN, "calendar-timezone");
pub const CALENDAR_DATA: Name = Name::new_static(CAL_URN, "calendar-data");
pub const SCHEDULE_TAG: Name = Name::new_static(CAL_URN, "schedule-tag");
pub const SUPPORTED_CALENDAR_COMPONENT_SET: Name =
    Name::new_static(CAL_URN, "supported-calendar-component-set");
pub const SUPPORTED_CALENDAR_DATA: Name = Name::new_static(CAL_URN, "supported-calendar-data");
pub const CALENDAR_USER_ADDRESS_SET: Name =
    Name::new_static(CAL_URN, "calendar-user-address-set");
pub const MAX_RESOURCE_SIZE: Name = Name::new_static(CAL_URN, "max-resource-size");
pub const COMP: Name = Name::new_static(CAL_URN, "comp");
// RFC 6352
pub const ADDRESSBOOK_HOME_SET: Name = Name::new_static(CARD_URN, "addressbook-home-set");
pub const ADDRESSBOOK_DESCRIPTION: Name = Name::new_static(CARD_URN, "addressbook-description");
pub const ADDRESS_DATA: Name = Name::new_static(CARD_URN, "address-data");
pub const SUPPORTED_ADDRESS_DATA: Name = Name::new_static(CARD_URN, "supported-address-data");
pub const ADDRESS_DATA_TYPE: Name = Name::new_static(CARD_URN, "address-data-type");
// vendor extensions
pub const GETCTAG: Name = Name::new_static(CALSERVER_URN, "getctag");
pub const CALENDAR_PROXY_READ_FOR: Name = Name::new_static(CALSERVER_URN, "calendar-proxy-read-for");
pub const CALENDAR_PROXY_WRITE_FOR: Name =
    Name::new_static(CALSERVER_URN, "calendar-proxy-write-for");
pub const SOURCE: Name = Name::new_static(CALSERVER_URN, "source");
pub const CALENDAR_COLOR: Name = Name::new_static(ICAL_URN, "calendar-color");

// ---- PROPERTIES ----

/// A property type defined outside of this crate.
/// Registered through a `PropertyFactory` and recovered with
/// [`Property::extension`].
pub trait ExtensionProperty: Any + std::fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle on an extension value, compared by identity
#[derive(Debug, Clone)]
pub struct ExtensionValue(pub Arc<dyn ExtensionProperty>);
impl PartialEq for ExtensionValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An entity tag, either from a `getetag`/`schedule-tag` property
/// or from the `ETag`/`Schedule-Tag` header.
#[derive(Debug, Clone, PartialEq)]
pub struct ETag {
    pub tag: String,
    pub weak: bool,
}

/// Result of DAV:current-user-privilege-set, RFC 3744 section 5.4
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrivilegeSet {
    pub may_read: bool,
    pub may_write_properties: bool,
    pub may_write_content: bool,
    pub may_bind: bool,
    pub may_unbind: bool,
}

/// A (media type, version) pair as in supported-calendar-data
/// and supported-address-data
#[derive(Debug, Clone, PartialEq)]
pub struct DataType {
    pub content_type: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    // RFC 4918
    CreationDate(DateTime<FixedOffset>),
    DisplayName(String),
    GetContentLength(u64),
    GetContentType(String),
    GetEtag(ETag),
    GetLastModified(DateTime<Utc>),
    ResourceType(Vec<Name>),

    // RFC 6578
    SyncToken(String),

    // RFC 3744, RFC 5397
    CurrentUserPrincipal(Option<String>),
    CurrentUserPrivilegeSet(PrivilegeSet),
    Owner(Option<String>),
    GroupMembership(Vec<String>),
    SupportedReportSet(Vec<Name>),

    // RFC 4331
    QuotaAvailableBytes(i64),
    QuotaUsedBytes(i64),

    // RFC 5995
    AddMember(Option<String>),

    // RFC 4791
    CalendarHomeSet(Vec<String>),
    CalendarDescription(String),
    CalendarTimezone(String),
    CalendarData(String),
    ScheduleTag(ETag),
    SupportedCalendarComponentSet(Vec<String>),
    SupportedCalendarData(Vec<DataType>),
    CalendarUserAddressSet(Vec<String>),
    MaxResourceSize(u64),

    // RFC 6352
    AddressbookHomeSet(Vec<String>),
    AddressbookDescription(String),
    AddressData(String),
    SupportedAddressData(Vec<DataType>),

    // CalendarServer, Apple iCal
    GetCTag(String),
    CalendarProxyReadFor(Vec<String>),
    CalendarProxyWriteFor(Vec<String>),
    Source(Option<String>),
    CalendarColor(String),

    Extension(Name, ExtensionValue),
}
impl Property {
    pub fn name(&self) -> Name {
        match self {
            Self::CreationDate(_) => CREATIONDATE,
            Self::DisplayName(_) => DISPLAYNAME,
            Self::GetContentLength(_) => GETCONTENTLENGTH,
            Self::GetContentType(_) => GETCONTENTTYPE,
            Self::GetEtag(_) => GETETAG,
            Self::GetLastModified(_) => GETLASTMODIFIED,
            Self::ResourceType(_) => RESOURCETYPE,
            Self::SyncToken(_) => SYNC_TOKEN,
            Self::CurrentUserPrincipal(_) => CURRENT_USER_PRINCIPAL,
            Self::CurrentUserPrivilegeSet(_) => CURRENT_USER_PRIVILEGE_SET,
            Self::Owner(_) => OWNER,
            Self::GroupMembership(_) => GROUP_MEMBERSHIP,
            Self::SupportedReportSet(_) => SUPPORTED_REPORT_SET,
            Self::QuotaAvailableBytes(_) => QUOTA_AVAILABLE_BYTES,
            Self::QuotaUsedBytes(_) => QUOTA_USED_BYTES,
            Self::AddMember(_) => ADD_MEMBER,
            Self::CalendarHomeSet(_) => CALENDAR_HOME_SET,
            Self::CalendarDescription(_) => CALENDAR_DESCRIPTION,
            Self::CalendarTimezone(_) => CALENDAR_TIMEZONE,
            Self::CalendarData(_) => CALENDAR_DATA,
            Self::ScheduleTag(_) => SCHEDULE_TAG,
            Self::SupportedCalendarComponentSet(_) => SUPPORTED_CALENDAR_COMPONENT_SET,
            Self::SupportedCalendarData(_) => SUPPORTED_CALENDAR_DATA,
            Self::CalendarUserAddressSet(_) => CALENDAR_USER_ADDRESS_SET,
            Self::MaxResourceSize(_) => MAX_RESOURCE_SIZE,
            Self::AddressbookHomeSet(_) => ADDRESSBOOK_HOME_SET,
            Self::AddressbookDescription(_) => ADDRESSBOOK_DESCRIPTION,
            Self::AddressData(_) => ADDRESS_DATA,
            Self::SupportedAddressData(_) => SUPPORTED_ADDRESS_DATA,
            Self::GetCTag(_) => GETCTAG,
            Self::CalendarProxyReadFor(_) => CALENDAR_PROXY_READ_FOR,
            Self::CalendarProxyWriteFor(_) => CALENDAR_PROXY_WRITE_FOR,
            Self::Source(_) => SOURCE,
            Self::CalendarColor(_) => CALENDAR_COLOR,
            Self::Extension(name, _) => name.clone(),
        }
    }

    /// Downcast an extension property to its concrete type
    pub fn extension<T: ExtensionProperty>(&self) -> Option<&T> {
        match self {
            Self::Extension(_, value) => value.0.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

// ---- MULTISTATUS ----

/// A precondition or postcondition element found in `<DAV:error>`,
/// RFC 4918 section 16
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub name: Name,
    pub hrefs: Vec<String>,
}

/// A parsed HTTP status line
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub version: Version,
    pub code: StatusCode,
    pub reason: String,
}
impl Status {
    pub fn new(code: StatusCode, reason: &str) -> Self {
        Self {
            version: Version::HTTP_11,
            code,
            reason: reason.to_string(),
        }
    }

    /// Used when a propstat carries no status at all
    pub fn assuming_ok() -> Self {
        Self::new(StatusCode::OK, "Assuming OK")
    }

    /// Used when the status line can't be parsed
    pub fn invalid() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Invalid status line")
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// 14.22 propstat XML Element
///
/// <!ELEMENT propstat (prop, status, error?, responsedescription?) >
#[derive(Debug, Clone, PartialEq)]
pub struct PropStat {
    pub properties: Vec<Property>,
    pub status: Status,
    pub errors: Vec<Violation>,
}

/// 14.24 response XML Element
///
/// <!ELEMENT response (href, ((href*, status)|(propstat+)),
///                     error?, responsedescription? , location?) >
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Absolute URL of the described resource
    pub href: Url,
    pub propstat: Vec<PropStat>,
    /// Only meaningful when there is no propstat
    pub status: Option<Status>,
    pub errors: Vec<Violation>,
    pub location: Option<Url>,
}
impl Response {
    pub fn is_success(&self) -> bool {
        self.status.as_ref().map(|s| s.is_success()).unwrap_or(true)
    }

    /// Properties of every propstat with a 2xx status
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.propstat
            .iter()
            .filter(|ps| ps.status.is_success())
            .flat_map(|ps| ps.properties.iter())
    }

    pub fn property(&self, name: &Name) -> Option<&Property> {
        self.properties().find(|p| &p.name() == name)
    }

    pub fn etag(&self) -> Option<&ETag> {
        self.properties().find_map(|p| match p {
            Property::GetEtag(etag) => Some(etag),
            _ => None,
        })
    }

    pub fn is_collection(&self) -> bool {
        self.properties().any(|p| match p {
            Property::ResourceType(types) => types.contains(&COLLECTION),
            _ => false,
        })
    }

    /// Last path segment of the href, a trailing slash is ignored
    pub fn href_name(&self) -> String {
        self.href
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }
}

/// How a `<response>` relates to the URL the request was issued against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrefRelation {
    /// the requested resource itself
    SelfRef,
    /// anything else, usually a collection member
    Member,
}

// ---- REQUESTS ----

/// 14.20 propfind XML Element, restricted to `<prop>`
#[derive(Debug, Clone, PartialEq)]
pub struct PropFind(pub Vec<Name>);

/// 14.19 propertyupdate XML Element
///
/// Values are sent as the text content of each property element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyUpdate {
    pub set: Vec<(Name, String)>,
    pub remove: Vec<Name>,
}

/// RFC 6578, sync-level
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncLevel {
    One,
    Infinite,
}

/// RFC 6578, sync-collection REPORT
///
/// <!ELEMENT sync-collection (sync-token, sync-level, limit?, prop)>
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCollection {
    /// `None` for an initial synchronization
    pub sync_token: Option<String>,
    pub sync_level: SyncLevel,
    pub limit: Option<u32>,
    pub prop: Vec<Name>,
}

/// RFC 4791, calendar-query REPORT on one component type,
/// optionally restricted to a time range
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarQuery {
    pub component: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// RFC 4791 calendar-multiget or RFC 6352 addressbook-multiget REPORT
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Multiget {
    /// Absolute paths of the requested members
    pub hrefs: Vec<String>,
    pub content_type: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarMultiget(pub Multiget);

#[derive(Debug, Clone, PartialEq)]
pub struct AddressbookMultiget(pub Multiget);

/// RFC 6352, addressbook-query REPORT without filter
#[derive(Debug, Clone, PartialEq)]
pub struct AddressbookQuery;
