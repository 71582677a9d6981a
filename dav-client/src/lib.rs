// utils
pub mod config;
pub mod error;
pub mod httputils;
pub mod xml;

// data model
pub mod types;
pub mod registry;
pub mod decoder;
pub mod encoder;

// multistatus
pub mod href;
pub mod multistatus;

// operations
pub mod transport;
pub mod resource;
pub mod collection;
pub mod calendar;
pub mod addressbook;

pub use addressbook::DavAddressBook;
pub use calendar::DavCalendar;
pub use collection::DavCollection;
pub use config::ClientConfig;
pub use error::{Error, HttpError, HttpErrorKind, ParsingError, TransportError};
pub use registry::{PropertyFactory, PropertyRegistry};
pub use resource::DavResource;
pub use transport::{HyperTransport, Transport};
pub use types::{HrefRelation, Property, Response};
pub use xml::Name;
