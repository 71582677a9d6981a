use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;

use super::error::Error;
use super::resource::DavResource;
use super::transport::Transport;
use super::types::*;

/// A CalDAV calendar collection, RFC 4791
pub struct DavCalendar<T: Transport>(pub DavResource<T>);

impl<T: Transport> DavCalendar<T> {
    pub fn new(transport: Arc<T>, location: Url) -> Self {
        Self(DavResource::new(transport, location))
    }

    /// calendar-query REPORT listing the ETags of the `component`
    /// objects (VEVENT, VTODO...) overlapping `[start, end)`.
    pub async fn calendar_query<F>(
        &mut self,
        component: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        callback: F,
    ) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let body = CalendarQuery {
            component: component.to_string(),
            start,
            end,
        };
        self.0.report(1, &body, callback).await
    }

    /// calendar-multiget REPORT fetching the data of the given members
    pub async fn calendar_multiget<F>(
        &mut self,
        members: &[Url],
        content_type: Option<&str>,
        version: Option<&str>,
        callback: F,
    ) -> Result<Vec<Property>, Error>
    where
        F: FnMut(Response, HrefRelation) -> anyhow::Result<()> + Send,
    {
        let body = CalendarMultiget(Multiget {
            hrefs: members.iter().map(|url| url.path().to_string()).collect(),
            content_type: content_type.map(str::to_string),
            version: version.map(str::to_string),
        });
        self.0.report(0, &body, callback).await
    }
}

impl<T: Transport> Deref for DavCalendar<T> {
    type Target = DavResource<T>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<T: Transport> DerefMut for DavCalendar<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PropertyRegistry;
    use crate::transport::mock::MockTransport;
    use chrono::TimeZone;

    fn calendar(mock: &Arc<MockTransport>) -> DavCalendar<MockTransport> {
        let url = Url::parse("https://cal.example.com/home/work/").unwrap();
        DavCalendar(
            DavResource::new(mock.clone(), url)
                .with_registry(Arc::new(PropertyRegistry::with_defaults())),
        )
    }

    #[tokio::test]
    async fn query_then_multiget() {
        let mock = Arc::new(MockTransport::new());
        let mut cal = calendar(&mock);

        mock.enqueue(
            207,
            &[("content-type", "application/xml")],
            r#"<d:multistatus xmlns:d="DAV:">
                <d:response><d:href>/home/work/meeting.ics</d:href>
                    <d:propstat><d:prop><d:getetag>"1"</d:getetag></d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
            </d:multistatus>"#,
        );
        let mut members = vec![];
        cal.calendar_query(
            "VEVENT",
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()),
            |response, _| {
                members.push(response.href);
                Ok(())
            },
        )
        .await
        .unwrap();

        let request = mock.last();
        assert_eq!(request.headers.get("depth").unwrap(), "1");
        assert!(request
            .body
            .contains(r#"<c:time-range start="20240301T000000Z" end="20240401T000000Z"/>"#));
        assert_eq!(members[0].as_str(), "https://cal.example.com/home/work/meeting.ics");

        mock.enqueue(
            207,
            &[("content-type", "application/xml")],
            r#"<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
                <d:response><d:href>/home/work/meeting.ics</d:href>
                    <d:propstat><d:prop>
                        <d:getetag>"1"</d:getetag>
                        <c:schedule-tag>"s1"</c:schedule-tag>
                        <c:calendar-data>BEGIN:VCALENDAR&#13;
END:VCALENDAR&#13;
</c:calendar-data>
                    </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>
            </d:multistatus>"#,
        );
        let mut data = vec![];
        cal.calendar_multiget(&members, None, None, |response, _| {
            for property in response.properties() {
                if let Property::CalendarData(ics) = property {
                    data.push(ics.clone());
                }
            }
            Ok(())
        })
        .await
        .unwrap();

        let request = mock.last();
        assert_eq!(request.headers.get("depth").unwrap(), "0");
        assert!(request
            .body
            .contains("<d:href>/home/work/meeting.ics</d:href>"));
        assert_eq!(data.len(), 1);
        assert!(data[0].starts_with("BEGIN:VCALENDAR\r\n"));
    }
}
