use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use url::Url;

use super::error::Error;
use super::resource::DavResource;
use super::transport::Transport;
use super::types::*;
use super::xml::Name;

/// A WebDAV collection, synchronized with sync-collection REPORTs
pub struct DavCollection<T: Transport>(pub DavResource<T>);

impl<T: Transport> DavCollection<T> {
    pub fn new(transport: Arc<T>, location: Url) -> Self {
        Self(DavResource::new(transport, location))
    }

    /// sync-collection REPORT, RFC 6578.
    ///
    /// Without `sync_token` this is an initial synchronization. Each
    /// changed or removed member is handed to `callback`, removed ones
    /// with a 404 status. Returns the new sync-token.
    ///
    /// A server truncating the result answers 507 with a
    /// `number-of-matches-within-limits` violation, which comes back as
    /// an [`Error::Http`].
    pub async fn report_changes<F>(
        &mut self,
        sync_token: Option<&str>,
        infinite: bool,
        limit: Option<u32>,
        props: &[Name],
        callback: F,
    ) -> Result<Option<String>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let body = SyncCollection {
            sync_token: sync_token.map(str::to_string),
            sync_level: if infinite {
                SyncLevel::Infinite
            } else {
                SyncLevel::One
            },
            limit,
            prop: props.to_vec(),
        };
        let extra = self.0.report(0, &body, callback).await?;
        Ok(extra.into_iter().find_map(|p| match p {
            Property::SyncToken(token) => Some(token),
            _ => None,
        }))
    }
}

impl<T: Transport> Deref for DavCollection<T> {
    type Target = DavResource<T>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<T: Transport> DerefMut for DavCollection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PropertyRegistry;
    use crate::transport::mock::MockTransport;
    use http::StatusCode;

    const RFC6578_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
   <D:multistatus xmlns:D="DAV:">
     <D:response>
       <D:href
   >http://webdav.example.com/home/cyrusdaboo/test.ics</D:href>
       <D:propstat>
         <D:prop>
           <D:getetag>"00001-abcd1"</D:getetag>
         </D:prop>
         <D:status>HTTP/1.1 200 OK</D:status>
       </D:propstat>
     </D:response>
     <D:response>
       <D:href
   >http://webdav.example.com/home/cyrusdaboo/vcard.vcf</D:href>
       <D:propstat>
         <D:prop>
           <D:getetag>"00002-abcd1"</D:getetag>
         </D:prop>
         <D:status>HTTP/1.1 200 OK</D:status>
       </D:propstat>
     </D:response>
     <D:response>
       <D:href
   >http://webdav.example.com/home/cyrusdaboo/calendar.ics</D:href>
       <D:status>HTTP/1.1 404 Not Found</D:status>
     </D:response>
     <D:response>
       <D:href
   >http://webdav.example.com/home/cyrusdaboo/</D:href>
       <D:status>HTTP/1.1 507 Insufficient Storage</D:status>
       <D:error><D:number-of-matches-within-limits/></D:error>
     </D:response>
     <D:sync-token>http://example.com/ns/sync/1233</D:sync-token>
   </D:multistatus>"#;

    fn collection(mock: &Arc<MockTransport>) -> DavCollection<MockTransport> {
        let url = Url::parse("http://webdav.example.com/home/cyrusdaboo/").unwrap();
        DavCollection(
            DavResource::new(mock.clone(), url)
                .with_registry(Arc::new(PropertyRegistry::with_defaults())),
        )
    }

    #[tokio::test]
    async fn sync_collection_report() {
        let mock = Arc::new(MockTransport::new());
        mock.enqueue(207, &[("content-type", "text/xml")], RFC6578_RESPONSE);
        let mut col = collection(&mock);

        let mut changes = vec![];
        let token = col
            .report_changes(
                Some("http://example.com/ns/sync/1232"),
                false,
                Some(100),
                &[GETETAG],
                |response, relation| {
                    changes.push((response.href_name(), relation, response.is_success()));
                    Ok(())
                },
            )
            .await
            .unwrap();

        assert_eq!(token.as_deref(), Some("http://example.com/ns/sync/1233"));
        assert_eq!(
            changes,
            vec![
                ("test.ics".to_string(), HrefRelation::Member, true),
                ("vcard.vcf".to_string(), HrefRelation::Member, true),
                ("calendar.ics".to_string(), HrefRelation::Member, false),
                ("cyrusdaboo".to_string(), HrefRelation::SelfRef, false),
            ]
        );

        let request = mock.last();
        assert_eq!(request.method.as_str(), "REPORT");
        assert_eq!(request.headers.get("depth").unwrap(), "0");
        assert!(request
            .body
            .contains("<d:sync-token>http://example.com/ns/sync/1232</d:sync-token>"));
        assert!(request.body.contains("<d:sync-level>1</d:sync-level>"));
        assert!(request.body.contains("<d:nresults>100</d:nresults>"));
    }

    #[tokio::test]
    async fn truncated_sync_is_an_http_error() {
        let mock = Arc::new(MockTransport::new());
        mock.enqueue(
            507,
            &[("content-type", "application/xml")],
            r#"<?xml version="1.0"?><D:error xmlns:D="DAV:"><D:number-of-matches-within-limits/></D:error>"#,
        );
        let mut col = collection(&mock);

        let err = col
            .report_changes(None, true, None, &[GETETAG], |_, _| Ok(()))
            .await
            .unwrap_err();
        let http = err.http().unwrap();
        assert_eq!(http.status, StatusCode::INSUFFICIENT_STORAGE);
        assert_eq!(http.errors[0].name, NUMBER_OF_MATCHES_WITHIN_LIMITS);

        let request = mock.last();
        assert!(request.body.contains("<d:sync-token/>"));
        assert!(request.body.contains("<d:sync-level>infinite</d:sync-level>"));
    }
}
