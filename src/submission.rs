//! Submission assembly: turn a completed record into an OpenRosa wire
//! payload, and interpret the server's acknowledgement.
//!
//! This is a boundary component: it builds bytes and headers but performs
//! no network I/O. Transport, retry, and user notification belong to the
//! caller.

use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::model::Submission;

/// One captured file to send alongside the instance XML
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Filename as referenced from the instance
    pub filename: String,
    /// MIME type of the content
    pub content_type: String,
    /// File bytes
    pub bytes: Vec<u8>,
}

/// A ready-to-send request body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Instance XML alone, sent as a plain `text/xml` body
    Xml {
        /// Serialized instance
        body: String,
    },
    /// Instance XML plus attachments as `multipart/form-data`
    Multipart {
        /// Part separator
        boundary: String,
        /// Full encoded body
        body: Vec<u8>,
    },
}

impl Payload {
    /// The `Content-Type` header value for this body
    pub fn content_type(&self) -> String {
        match self {
            Payload::Xml { .. } => "text/xml".to_string(),
            Payload::Multipart { boundary, .. } => {
                format!("multipart/form-data; boundary={boundary}")
            }
        }
    }

    /// The body bytes
    pub fn body(&self) -> &[u8] {
        match self {
            Payload::Xml { body } => body.as_bytes(),
            Payload::Multipart { body, .. } => body,
        }
    }

    /// Request headers the OpenRosa protocol expects, `Content-Type`
    /// included
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("X-OpenRosa-Version".to_string(), "1.0".to_string()),
            ("Date".to_string(), Utc::now().to_rfc2822()),
            ("Expect".to_string(), "100-continue".to_string()),
            ("Content-Type".to_string(), self.content_type()),
        ]
    }
}

/// Build the wire payload for a submission: the bare instance XML when
/// there are no attachments, otherwise a multipart body with the instance
/// in a part named `xml_submission_file` followed by one part per
/// attachment.
pub fn assemble(submission: &Submission, attachments: &[Attachment]) -> Payload {
    if attachments.is_empty() {
        return Payload::Xml {
            body: submission.instance_xml.clone(),
        };
    }

    let boundary = format!(
        "xformkit-{:x}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let mut body = Vec::new();

    push_part_header(
        &mut body,
        &boundary,
        "xml_submission_file",
        &format!("{}.xml", submission.id),
        "text/xml",
    );
    body.extend_from_slice(submission.instance_xml.as_bytes());
    body.extend_from_slice(b"\r\n");

    for attachment in attachments {
        push_part_header(
            &mut body,
            &boundary,
            &attachment.filename,
            &attachment.filename,
            &attachment.content_type,
        );
        body.extend_from_slice(&attachment.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Payload::Multipart { boundary, body }
}

fn push_part_header(body: &mut Vec<u8>, boundary: &str, name: &str, filename: &str, mime: &str) {
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
}

/// Whether an OpenRosa response body acknowledges a complete submission:
/// a `submissionMetadata` element whose `_isComplete` attribute is
/// `"true"`. Malformed responses count as not complete.
pub fn response_indicates_complete(xml: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(_) => return false,
        };
        let element = match &event {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => return false,
            _ => continue,
        };
        if e_local(element) != "submissionMetadata" {
            continue;
        }
        for attr in element.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let key = key.rsplit(':').next().unwrap_or(&key).to_string();
            if key == "_isComplete" {
                if let Ok(value) = attr.unescape_value() {
                    return value == "true";
                }
            }
        }
    }
}

fn e_local(e: &quick_xml::events::BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}
