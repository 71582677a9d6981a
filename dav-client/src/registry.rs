use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use lazy_static::lazy_static;

use super::decoder;
use super::error::ParsingError;
use super::types::Property;
use super::xml::{Name, Reader};

/// Builds one kind of property from its XML element.
///
/// `create` is called with the reader on the property START element and
/// must leave it on the matching END. `Ok(None)` means the element was
/// recognized but its content is unusable.
#[async_trait]
pub trait PropertyFactory: Send + Sync {
    fn name(&self) -> Name;
    async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError>;
}

lazy_static! {
    static ref GLOBAL: Arc<PropertyRegistry> = Arc::new(PropertyRegistry::with_defaults());
}

/// Name to factory map used to parse `<prop>` contents
pub struct PropertyRegistry {
    factories: RwLock<HashMap<Name, Arc<dyn PropertyFactory>>>,
}
impl Default for PropertyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
impl PropertyRegistry {
    /// An empty registry, mostly useful in tests
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry knowing every property type of this crate
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for factory in decoder::default_factories() {
            registry.register(factory);
        }
        registry
    }

    /// The process-wide registry
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Add a factory, replacing any previous one for the same name
    pub fn register(&self, factory: Arc<dyn PropertyFactory>) {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        factories.insert(factory.name(), factory);
    }

    pub fn factory(&self, name: &Name) -> Option<Arc<dyn PropertyFactory>> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Parse the property the reader is on.
    ///
    /// Unknown properties are left untouched. A factory failing on
    /// malformed content is logged and its element skipped; only I/O and
    /// unrecoverable XML errors are returned.
    pub async fn create(
        &self,
        name: &Name,
        xml: &mut Reader,
    ) -> Result<Option<Property>, ParsingError> {
        let factory = match self.factory(name) {
            Some(f) => f,
            None => {
                tracing::trace!(property=%name, "unknown property");
                return Ok(None);
            }
        };

        let depth = xml.depth();
        match factory.create(xml).await {
            Ok(prop) => Ok(prop),
            Err(e) if e.io_error().is_some() => Err(e),
            Err(e) => {
                tracing::warn!(err=%e, property=%name, "couldn't parse property");
                xml.skip_to_end(depth).await?;
                Ok(None)
            }
        }
    }

    /// Parse every child of the `<prop>` element the reader is on
    pub async fn parse_prop(&self, xml: &mut Reader) -> Result<Vec<Property>, ParsingError> {
        let depth = xml.depth();
        let mut properties = Vec::new();

        while let Some(name) = xml.next_child(depth).await? {
            let before = xml.depth();
            let prop = self.create(&name, xml).await?;
            if xml.depth() != before {
                return Err(ParsingError::DepthMismatch {
                    expected: before,
                    found: xml.depth(),
                });
            }
            properties.extend(prop);
        }

        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use crate::xml::Token;

    async fn prop(registry: &PropertyRegistry, src: &'static str) -> Vec<Property> {
        let mut rdr = Reader::new(src.as_bytes());
        rdr.next_child(0).await.unwrap();
        let props = registry.parse_prop(&mut rdr).await.unwrap();
        assert!(matches!(rdr.peek(), Token::End(_)));
        props
    }

    #[tokio::test]
    async fn unknown_and_invalid_properties() {
        let registry = PropertyRegistry::with_defaults();
        let got = prop(
            &registry,
            r#"<d:prop xmlns:d="DAV:" xmlns:x="urn:unknown">
                <x:shiny><x:deep>1</x:deep></x:shiny>
                <d:getcontentlength>not a number</d:getcontentlength>
                <d:current-user-privilege-set><d:privilege><d:read/></d:privilege></d:current-user-privilege-set>
                <d:displayname>My Calendar</d:displayname>
            </d:prop>"#,
        )
        .await;

        assert_eq!(
            got,
            vec![
                Property::CurrentUserPrivilegeSet(PrivilegeSet {
                    may_read: true,
                    ..PrivilegeSet::default()
                }),
                Property::DisplayName("My Calendar".into()),
            ]
        );
    }

    #[tokio::test]
    async fn empty_registry_knows_nothing() {
        let registry = PropertyRegistry::new();
        let got = prop(
            &registry,
            r#"<d:prop xmlns:d="DAV:"><d:displayname>x</d:displayname></d:prop>"#,
        )
        .await;
        assert!(got.is_empty());
    }

    struct Greedy;
    #[async_trait]
    impl PropertyFactory for Greedy {
        fn name(&self) -> Name {
            Name::new("urn:test", "greedy")
        }
        async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
            // walks past its own END
            xml.skip().await?;
            xml.next().await?;
            xml.next().await?;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn misbehaving_factory_is_fatal() {
        let registry = PropertyRegistry::new();
        registry.register(Arc::new(Greedy));

        let src = r#"<d:prop xmlns:d="DAV:" xmlns:t="urn:test"><t:greedy/></d:prop>"#;
        let mut rdr = Reader::new(src.as_bytes());
        rdr.next_child(0).await.unwrap();
        let res = registry.parse_prop(&mut rdr).await;
        assert!(matches!(res, Err(ParsingError::DepthMismatch { .. })));
    }

    struct Failing;
    #[async_trait]
    impl PropertyFactory for Failing {
        fn name(&self) -> Name {
            Name::new("urn:test", "failing")
        }
        async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
            xml.next().await?;
            Err(ParsingError::WrongToken)
        }
    }

    #[tokio::test]
    async fn failing_factory_is_skipped() {
        let registry = PropertyRegistry::with_defaults();
        registry.register(Arc::new(Failing));

        let got = prop(
            &registry,
            r#"<d:prop xmlns:d="DAV:" xmlns:t="urn:test">
                <t:failing><t:a>1</t:a><t:b/></t:failing>
                <d:getetag>"42"</d:getetag>
            </d:prop>"#,
        )
        .await;
        assert_eq!(
            got,
            vec![Property::GetEtag(ETag {
                tag: "42".into(),
                weak: false
            })]
        );
    }

    #[derive(Debug)]
    struct Color(String);
    impl ExtensionProperty for Color {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct ColorFactory;
    #[async_trait]
    impl PropertyFactory for ColorFactory {
        fn name(&self) -> Name {
            Name::new("urn:test", "color")
        }
        async fn create(&self, xml: &mut Reader) -> Result<Option<Property>, ParsingError> {
            let txt = xml.read_text().await?.unwrap_or_default();
            Ok(Some(Property::Extension(
                self.name(),
                ExtensionValue(Arc::new(Color(txt))),
            )))
        }
    }

    #[tokio::test]
    async fn extension_property() {
        let registry = PropertyRegistry::new();
        registry.register(Arc::new(ColorFactory));

        let got = prop(
            &registry,
            r#"<d:prop xmlns:d="DAV:" xmlns:t="urn:test"><t:color>#ff0000</t:color></d:prop>"#,
        )
        .await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name(), Name::new("urn:test", "color"));
        assert_eq!(got[0].extension::<Color>().map(|c| c.0.as_str()), Some("#ff0000"));
    }
}
