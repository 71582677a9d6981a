use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use url::Url;

use super::error::Error;
use super::resource::DavResource;
use super::transport::Transport;
use super::types::*;

/// A CardDAV address book collection, RFC 6352
pub struct DavAddressBook<T: Transport>(pub DavResource<T>);

impl<T: Transport> DavAddressBook<T> {
    pub fn new(transport: Arc<T>, location: Url) -> Self {
        Self(DavResource::new(transport, location))
    }

    /// addressbook-query REPORT listing the ETags of every member
    pub async fn addressbook_query<F>(&mut self, callback: F) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        self.0.report(1, &AddressbookQuery, callback).await
    }

    /// addressbook-multiget REPORT fetching the vCards of the given members
    pub async fn addressbook_multiget<F>(
        &mut self,
        members: &[Url],
        content_type: Option<&str>,
        version: Option<&str>,
        callback: F,
    ) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let body = AddressbookMultiget(Multiget {
            hrefs: members.iter().map(|url| url.path().to_string()).collect(),
            content_type: content_type.map(str::to_string),
            version: version.map(str::to_string),
        });
        self.0.report(0, &body, callback).await
    }
}

impl<T: Transport> Deref for DavAddressBook<T> {
    type Target = DavResource<T>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<T: Transport> DerefMut for DavAddressBook<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PropertyRegistry;
    use crate::transport::mock::MockTransport;

    #[tokio::test]
    async fn multiget_vcards() {
        let mock = Arc::new(MockTransport::new());
        let url = Url::parse("https://dav.example.com/contacts/").unwrap();
        let mut book = DavAddressBook(
            DavResource::new(mock.clone(), url.clone())
                .with_registry(Arc::new(PropertyRegistry::with_defaults())),
        );

        mock.enqueue(
            207,
            &[("content-type", "text/xml; charset=utf-8")],
            r#"<multistatus xmlns="DAV:" xmlns:CARD="urn:ietf:params:xml:ns:carddav">
                <response><href>/contacts/</href>
                    <propstat><prop><resourcetype><collection/><CARD:addressbook/></resourcetype></prop>
                    <status>HTTP/1.1 200 OK</status></propstat></response>
                <response><href>/contacts/alice.vcf</href>
                    <propstat><prop><getetag>"a1"</getetag></prop>
                    <status>HTTP/1.1 200 OK</status></propstat></response>
            </multistatus>"#,
        );
        let mut members = vec![];
        book.addressbook_query(|response, relation| {
            if relation == HrefRelation::Member {
                members.push(response.href);
            }
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(mock.last().headers.get("depth").unwrap(), "1");
        assert_eq!(members, vec![url.join("alice.vcf").unwrap()]);

        mock.enqueue(
            207,
            &[("content-type", "text/xml; charset=utf-8")],
            r#"<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
                <d:response><d:href>/contacts/alice.vcf</d:href>
                    <d:propstat><d:prop>
                        <d:getetag>"a1"</d:getetag>
                        <card:address-data><![CDATA[BEGIN:VCARD
FN:Alice
END:VCARD]]></card:address-data>
                    </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
            </d:multistatus>"#,
        );
        let mut cards = vec![];
        book.addressbook_multiget(&members, Some("text/vcard"), Some("4.0"), |response, _| {
            for property in response.properties() {
                if let Property::AddressData(vcf) = property {
                    cards.push(vcf.clone());
                }
            }
            Ok(())
        })
        .await
        .unwrap();

        let request = mock.last();
        assert!(request
            .body
            .contains(r#"<card:address-data content-type="text/vcard" version="4.0"/>"#));
        assert_eq!(cards, vec!["BEGIN:VCARD\nFN:Alice\nEND:VCARD".to_string()]);
    }
}
