use quick_xml::events::{BytesDecl, Event};
use quick_xml::Error as QError;

use super::types::*;
use super::xml::{IWrite, Name, QWrite, Writer};

const ICAL_DATE: &str = "%Y%m%dT%H%M%SZ";

/// Serialize a request body, XML declaration included
pub async fn to_bytes(body: &impl QWrite) -> Result<Vec<u8>, QError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .q
        .write_event_async(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .await?;
    body.qwrite(&mut writer).await?;
    Ok(writer.q.into_inner())
}

/// `<d:prop>` with one empty element per requested name
async fn write_prop_names(xml: &mut Writer<impl IWrite>, names: &[Name]) -> Result<(), QError> {
    let start = xml.create_dav_element("prop");
    let end = start.to_end().into_owned();
    xml.q.write_event_async(Event::Start(start)).await?;
    for name in names.iter() {
        let elem = xml.create_element(name);
        xml.q.write_event_async(Event::Empty(elem)).await?;
    }
    xml.q.write_event_async(Event::End(end)).await
}

async fn write_hrefs(xml: &mut Writer<impl IWrite>, hrefs: &[String]) -> Result<(), QError> {
    for href in hrefs.iter() {
        let start = xml.create_dav_element("href");
        xml.text_element(start, href).await?;
    }
    Ok(())
}

impl QWrite for PropFind {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("propfind");
        let end = start.to_end().into_owned();

        xml.q.write_event_async(Event::Start(start)).await?;
        write_prop_names(xml, &self.0).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for PropertyUpdate {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("propertyupdate");
        let end = start.to_end().into_owned();
        xml.q.write_event_async(Event::Start(start)).await?;

        if !self.set.is_empty() {
            let set = xml.create_dav_element("set");
            let set_end = set.to_end().into_owned();
            let prop = xml.create_dav_element("prop");
            let prop_end = prop.to_end().into_owned();
            xml.q.write_event_async(Event::Start(set)).await?;
            xml.q.write_event_async(Event::Start(prop)).await?;
            for (name, value) in self.set.iter() {
                let elem = xml.create_element(name);
                xml.text_element(elem, value).await?;
            }
            xml.q.write_event_async(Event::End(prop_end)).await?;
            xml.q.write_event_async(Event::End(set_end)).await?;
        }

        if !self.remove.is_empty() {
            let remove = xml.create_dav_element("remove");
            let remove_end = remove.to_end().into_owned();
            xml.q.write_event_async(Event::Start(remove)).await?;
            write_prop_names(xml, &self.remove).await?;
            xml.q.write_event_async(Event::End(remove_end)).await?;
        }

        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for SyncLevel {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("sync-level");
        let text = match self {
            Self::One => "1",
            Self::Infinite => "infinite",
        };
        xml.text_element(start, text).await
    }
}

impl QWrite for SyncCollection {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("sync-collection");
        let end = start.to_end().into_owned();
        xml.q.write_event_async(Event::Start(start)).await?;

        let token = xml.create_dav_element("sync-token");
        match &self.sync_token {
            None => xml.q.write_event_async(Event::Empty(token)).await?,
            Some(uri) => xml.text_element(token, uri).await?,
        }
        self.sync_level.qwrite(xml).await?;

        if let Some(limit) = self.limit {
            let start = xml.create_dav_element("limit");
            let end = start.to_end().into_owned();
            xml.q.write_event_async(Event::Start(start)).await?;
            let nresults = xml.create_dav_element("nresults");
            xml.text_element(nresults, &limit.to_string()).await?;
            xml.q.write_event_async(Event::End(end)).await?;
        }

        write_prop_names(xml, &self.prop).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for CalendarQuery {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_cal_element("calendar-query");
        let end = start.to_end().into_owned();
        xml.q.write_event_async(Event::Start(start)).await?;
        write_prop_names(xml, &[GETETAG]).await?;

        let filter = xml.create_cal_element("filter");
        let filter_end = filter.to_end().into_owned();
        xml.q.write_event_async(Event::Start(filter)).await?;

        let mut vcalendar = xml.create_cal_element("comp-filter");
        vcalendar.push_attribute(("name", "VCALENDAR"));
        let comp_end = vcalendar.to_end().into_owned();
        xml.q.write_event_async(Event::Start(vcalendar)).await?;

        let mut component = xml.create_cal_element("comp-filter");
        component.push_attribute(("name", self.component.as_str()));
        if self.start.is_none() && self.end.is_none() {
            xml.q.write_event_async(Event::Empty(component)).await?;
        } else {
            let component_end = component.to_end().into_owned();
            xml.q.write_event_async(Event::Start(component)).await?;
            let mut range = xml.create_cal_element("time-range");
            if let Some(start) = &self.start {
                range.push_attribute(("start", start.format(ICAL_DATE).to_string().as_str()));
            }
            if let Some(end) = &self.end {
                range.push_attribute(("end", end.format(ICAL_DATE).to_string().as_str()));
            }
            xml.q.write_event_async(Event::Empty(range)).await?;
            xml.q.write_event_async(Event::End(component_end)).await?;
        }

        xml.q.write_event_async(Event::End(comp_end)).await?;
        xml.q.write_event_async(Event::End(filter_end)).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl Multiget {
    /// `<data/>` with the optional content-type and version attributes
    async fn write_data(&self, xml: &mut Writer<impl IWrite>, data: &Name) -> Result<(), QError> {
        let mut elem = xml.create_element(data);
        if let Some(content_type) = &self.content_type {
            elem.push_attribute(("content-type", content_type.as_str()));
        }
        if let Some(version) = &self.version {
            elem.push_attribute(("version", version.as_str()));
        }
        xml.q.write_event_async(Event::Empty(elem)).await
    }
}

impl QWrite for CalendarMultiget {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_cal_element("calendar-multiget");
        let end = start.to_end().into_owned();
        xml.q.write_event_async(Event::Start(start)).await?;

        let prop = xml.create_dav_element("prop");
        let prop_end = prop.to_end().into_owned();
        xml.q.write_event_async(Event::Start(prop)).await?;
        for name in [GETCONTENTTYPE, GETETAG, SCHEDULE_TAG].iter() {
            let elem = xml.create_element(name);
            xml.q.write_event_async(Event::Empty(elem)).await?;
        }
        self.0.write_data(xml, &CALENDAR_DATA).await?;
        xml.q.write_event_async(Event::End(prop_end)).await?;

        write_hrefs(xml, &self.0.hrefs).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for AddressbookQuery {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_card_element("addressbook-query");
        let end = start.to_end().into_owned();
        xml.q.write_event_async(Event::Start(start)).await?;
        write_prop_names(xml, &[GETETAG]).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for AddressbookMultiget {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_card_element("addressbook-multiget");
        let end = start.to_end().into_owned();
        xml.q.write_event_async(Event::Start(start)).await?;

        let prop = xml.create_dav_element("prop");
        let prop_end = prop.to_end().into_owned();
        xml.q.write_event_async(Event::Start(prop)).await?;
        for name in [GETCONTENTTYPE, GETETAG].iter() {
            let elem = xml.create_element(name);
            xml.q.write_event_async(Event::Empty(elem)).await?;
        }
        self.0.write_data(xml, &ADDRESS_DATA).await?;
        xml.q.write_event_async(Event::End(prop_end)).await?;

        write_hrefs(xml, &self.0.hrefs).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}
