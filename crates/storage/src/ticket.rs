//! Ticket request and response documents.
//!
//! A renewal produces two documents per tenant:
//!
//! - [`TicketRequest`]: the `loginTicketRequest` that gets signed and sent to the authority. Kept
//!   for audit and debugging.
//! - [`TicketResponse`]: the `loginTicketResponse` returned by the authority. Carries the
//!   token/sign pair and the instant after which it is no longer accepted.
//!
//! Both are persisted as XML in the authority's own wire format, so a stored
//! response is byte-for-byte what an operator would expect to find on disk.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use ticketbroker_storage::TicketResponse;
//!
//! let response = TicketResponse::builder()
//!     .token("T1")
//!     .sign("S1")
//!     .expiration_time(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap())
//!     .build();
//!
//! let xml = response.to_xml().unwrap();
//! let parsed = TicketResponse::from_xml(&xml).unwrap();
//! assert_eq!(parsed.token, "T1");
//! assert!(parsed.is_valid_at(Utc.with_ymd_and_hms(2030, 1, 1, 11, 59, 59).unwrap()));
//! assert!(!parsed.is_valid_at(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()));
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{StorageError, StorageResult},
    types::{DocumentKind, TenantId},
};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const DOCUMENT_VERSION: &str = "1.0";

/// A `loginTicketRequest` document.
///
/// Created fresh for every renewal attempt and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, bon::Builder)]
pub struct TicketRequest {
    /// Time-derived nonce (seconds since the Unix epoch at generation).
    pub unique_id: u64,

    /// Start of the validity window requested from the authority.
    pub generation_time: DateTime<Utc>,

    /// End of the validity window requested from the authority.
    pub expiration_time: DateTime<Utc>,

    /// Name of the business service the ticket is requested for.
    #[builder(into)]
    pub service: String,
}

/// A `loginTicketResponse` document: the ticket itself.
#[derive(Clone, Debug, PartialEq, Eq, bon::Builder)]
pub struct TicketResponse {
    /// Distinguished name of the issuing authority.
    #[builder(into, default)]
    pub source: String,

    /// Distinguished name the ticket was issued to.
    #[builder(into, default)]
    pub destination: String,

    /// Nonce echoed by the authority, when present.
    pub unique_id: Option<u64>,

    /// When the authority generated the ticket, when present.
    pub generation_time: Option<DateTime<Utc>>,

    /// Instant from which the ticket is no longer accepted.
    pub expiration_time: DateTime<Utc>,

    /// Opaque access token.
    #[builder(into)]
    pub token: String,

    /// Opaque signature accompanying the token.
    #[builder(into)]
    pub sign: String,
}

impl TicketResponse {
    /// Returns `true` if the ticket is still accepted at `instant`.
    ///
    /// The boundary is exclusive: at exactly `expiration_time` the ticket is
    /// expired.
    #[must_use]
    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        instant < self.expiration_time
    }

    /// Builds the credential block business calls embed for `tenant`.
    #[must_use]
    pub fn credentials(&self, tenant: &TenantId) -> Credentials {
        Credentials { token: self.token.clone(), sign: self.sign.clone(), cuit: tenant.clone() }
    }
}

/// Token, sign and tenant, as embedded in every authenticated business call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access token.
    pub token: String,
    /// Signature accompanying the token.
    pub sign: String,
    /// Tenant the ticket was issued for.
    pub cuit: TenantId,
}

// Token and sign are bearer credentials; keep them out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("sign", &"<redacted>")
            .field("cuit", &self.cuit)
            .finish()
    }
}

/// A stored per-tenant document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Document {
    /// A ticket request.
    Request(TicketRequest),
    /// A ticket response.
    Response(TicketResponse),
}

impl Document {
    /// The kind of this document.
    #[must_use]
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Request(_) => DocumentKind::Request,
            Document::Response(_) => DocumentKind::Response,
        }
    }

    /// Serializes the document to XML.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if serialization fails.
    pub fn to_xml(&self) -> StorageResult<String> {
        match self {
            Document::Request(request) => request.to_xml(),
            Document::Response(response) => response.to_xml(),
        }
    }

    /// Parses a document of the given kind.
    ///
    /// `resource` names the document in any resulting error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupt`] if the XML is malformed or a
    /// required field is missing.
    pub fn parse(kind: DocumentKind, xml: &str, resource: &str) -> StorageResult<Self> {
        match kind {
            DocumentKind::Request => parse_request(xml, resource).map(Document::Request),
            DocumentKind::Response => parse_response(xml, resource).map(Document::Response),
        }
    }

    /// Returns the response, if this is one.
    #[must_use]
    pub fn into_response(self) -> Option<TicketResponse> {
        match self {
            Document::Response(response) => Some(response),
            Document::Request(_) => None,
        }
    }

    /// Returns the request, if this is one.
    #[must_use]
    pub fn into_request(self) -> Option<TicketRequest> {
        match self {
            Document::Request(request) => Some(request),
            Document::Response(_) => None,
        }
    }
}

impl From<TicketRequest> for Document {
    fn from(request: TicketRequest) -> Self {
        Document::Request(request)
    }
}

impl From<TicketResponse> for Document {
    fn from(response: TicketResponse) -> Self {
        Document::Response(response)
    }
}

impl TicketRequest {
    /// Serializes the request to the XML that gets signed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if serialization fails.
    pub fn to_xml(&self) -> StorageResult<String> {
        let wire = RequestWire {
            version: Some(DOCUMENT_VERSION.to_owned()),
            header: Some(RequestHeaderWire {
                unique_id: Some(self.unique_id.to_string()),
                generation_time: Some(format_time(self.generation_time)),
                expiration_time: Some(format_time(self.expiration_time)),
            }),
            service: Some(self.service.clone()),
        };
        serialize(&wire)
    }

    /// Parses a `loginTicketRequest` document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupt`] if the XML is malformed or a
    /// required field is missing.
    pub fn from_xml(xml: &str) -> StorageResult<Self> {
        parse_request(xml, "loginTicketRequest")
    }
}

impl TicketResponse {
    /// Serializes the response in the authority's wire format.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if serialization fails.
    pub fn to_xml(&self) -> StorageResult<String> {
        let wire = ResponseWire {
            version: Some(DOCUMENT_VERSION.to_owned()),
            header: Some(ResponseHeaderWire {
                source: Some(self.source.clone()),
                destination: Some(self.destination.clone()),
                unique_id: self.unique_id.map(|id| id.to_string()),
                generation_time: self.generation_time.map(format_time),
                expiration_time: Some(format_time(self.expiration_time)),
            }),
            credentials: Some(CredentialsWire {
                token: Some(self.token.clone()),
                sign: Some(self.sign.clone()),
            }),
        };
        serialize(&wire)
    }

    /// Parses a `loginTicketResponse` document.
    ///
    /// Only `token`, `sign` and `expirationTime` are required. Header fields
    /// the authority omits are left empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupt`] if the XML is malformed or a
    /// required field is missing.
    pub fn from_xml(xml: &str) -> StorageResult<Self> {
        parse_response(xml, "loginTicketResponse")
    }
}

// Wire representations. Every field is optional so a missing element is
// reported as a named Corrupt error rather than a generic parse failure.

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "loginTicketRequest")]
struct RequestWire {
    #[serde(rename = "@version", default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    header: Option<RequestHeaderWire>,
    #[serde(default)]
    service: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RequestHeaderWire {
    #[serde(rename = "uniqueId", default)]
    unique_id: Option<String>,
    #[serde(rename = "generationTime", default)]
    generation_time: Option<String>,
    #[serde(rename = "expirationTime", default)]
    expiration_time: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "loginTicketResponse")]
struct ResponseWire {
    #[serde(rename = "@version", default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    header: Option<ResponseHeaderWire>,
    #[serde(default)]
    credentials: Option<CredentialsWire>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResponseHeaderWire {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(rename = "uniqueId", default, skip_serializing_if = "Option::is_none")]
    unique_id: Option<String>,
    #[serde(rename = "generationTime", default, skip_serializing_if = "Option::is_none")]
    generation_time: Option<String>,
    #[serde(rename = "expirationTime", default)]
    expiration_time: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsWire {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    sign: Option<String>,
}

fn serialize<T: Serialize>(wire: &T) -> StorageResult<String> {
    let body = quick_xml::se::to_string(wire)
        .map_err(|e| StorageError::internal(format!("failed to serialize document: {e}")))?;
    Ok(format!("{XML_DECLARATION}\n{body}\n"))
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(value: &str, field: &str, resource: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::corrupt_with_source(resource, format!("invalid {field}"), e))
}

fn parse_u64(value: &str, field: &str, resource: &str) -> StorageResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| StorageError::corrupt_with_source(resource, format!("invalid {field}"), e))
}

fn required(value: Option<String>, field: &str, resource: &str) -> StorageResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(StorageError::corrupt(resource, format!("missing {field}"))),
    }
}

fn parse_request(xml: &str, resource: &str) -> StorageResult<TicketRequest> {
    let wire: RequestWire = quick_xml::de::from_str(xml)
        .map_err(|e| StorageError::corrupt_with_source(resource, "malformed XML", e))?;
    let header = wire.header.unwrap_or_default();

    let unique_id = required(header.unique_id, "uniqueId", resource)?;
    let generation_time = required(header.generation_time, "generationTime", resource)?;
    let expiration_time = required(header.expiration_time, "expirationTime", resource)?;

    Ok(TicketRequest {
        unique_id: parse_u64(&unique_id, "uniqueId", resource)?,
        generation_time: parse_time(&generation_time, "generationTime", resource)?,
        expiration_time: parse_time(&expiration_time, "expirationTime", resource)?,
        service: required(wire.service, "service", resource)?,
    })
}

fn parse_response(xml: &str, resource: &str) -> StorageResult<TicketResponse> {
    let wire: ResponseWire = quick_xml::de::from_str(xml)
        .map_err(|e| StorageError::corrupt_with_source(resource, "malformed XML", e))?;
    let header = wire.header.unwrap_or_default();
    let credentials = wire.credentials.unwrap_or_default();

    let token = required(credentials.token, "token", resource)?;
    let sign = required(credentials.sign, "sign", resource)?;
    let expiration_time = required(header.expiration_time, "expirationTime", resource)?;

    let unique_id = match header.unique_id.filter(|v| !v.trim().is_empty()) {
        Some(v) => Some(parse_u64(&v, "uniqueId", resource)?),
        None => None,
    };
    let generation_time = match header.generation_time.filter(|v| !v.trim().is_empty()) {
        Some(v) => Some(parse_time(&v, "generationTime", resource)?),
        None => None,
    };

    Ok(TicketResponse {
        source: header.source.unwrap_or_default(),
        destination: header.destination.unwrap_or_default(),
        unique_id,
        generation_time,
        expiration_time: parse_time(&expiration_time, "expirationTime", resource)?,
        token,
        sign,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::{FixedOffset, TimeZone};
    use rstest::rstest;

    use super::*;

    const AUTHORITY_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<loginTicketResponse version="1.0">
    <header>
        <source>CN=wsaahomo, O=AFIP, C=AR, SERIALNUMBER=CUIT 33693450239</source>
        <destination>SERIALNUMBER=CUIT 20304050607, CN=broker</destination>
        <uniqueId>1893456000</uniqueId>
        <generationTime>2030-01-01T09:50:00.000-03:00</generationTime>
        <expirationTime>2030-01-01T21:50:00.000-03:00</expirationTime>
    </header>
    <credentials>
        <token>PD94bWwgdmVyc2lvbj0iMS4wIj8+</token>
        <sign>Zm9vYmFy+/=</sign>
    </credentials>
</loginTicketResponse>"#;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_parses_authority_response() {
        let response = TicketResponse::from_xml(AUTHORITY_RESPONSE).unwrap();

        assert_eq!(response.token, "PD94bWwgdmVyc2lvbj0iMS4wIj8+");
        assert_eq!(response.sign, "Zm9vYmFy+/=");
        assert_eq!(response.unique_id, Some(1_893_456_000));
        assert_eq!(response.destination, "SERIALNUMBER=CUIT 20304050607, CN=broker");
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let expected = offset.with_ymd_and_hms(2030, 1, 1, 21, 50, 0).unwrap();
        assert_eq!(response.expiration_time, expected.with_timezone(&Utc));
    }

    #[test]
    fn test_response_round_trip_preserves_credentials() {
        let original = TicketResponse::from_xml(AUTHORITY_RESPONSE).unwrap();
        let reparsed = TicketResponse::from_xml(&original.to_xml().unwrap()).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_response_escapes_markup_in_values() {
        let response = TicketResponse::builder()
            .token("a<b&c")
            .sign("\"s\"")
            .expiration_time(ts(12, 0))
            .build();
        let xml = response.to_xml().unwrap();
        assert!(!xml.contains("a<b"));
        assert_eq!(TicketResponse::from_xml(&xml).unwrap().token, "a<b&c");
    }

    #[rstest]
    #[case::missing_token("<credentials><sign>S</sign></credentials>", "token")]
    #[case::missing_sign("<credentials><token>T</token></credentials>", "sign")]
    #[case::empty_token("<credentials><token></token><sign>S</sign></credentials>", "token")]
    #[case::no_credentials("", "token")]
    fn test_response_missing_required_field_is_corrupt(
        #[case] credentials: &str,
        #[case] field: &str,
    ) {
        let xml = format!(
            "<loginTicketResponse><header><expirationTime>2030-01-01T12:00:00Z</expirationTime>\
             </header>{credentials}</loginTicketResponse>"
        );
        let err = TicketResponse::from_xml(&xml).unwrap_err();
        match err {
            StorageError::Corrupt { message, .. } => assert!(message.contains(field), "{message}"),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_response_missing_expiration_is_corrupt() {
        let xml = "<loginTicketResponse><header/><credentials><token>T</token><sign>S</sign>\
                   </credentials></loginTicketResponse>";
        let err = TicketResponse::from_xml(xml).unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("expirationTime"));
    }

    #[test]
    fn test_response_bad_timestamp_is_corrupt() {
        let xml = "<loginTicketResponse><header><expirationTime>tomorrow</expirationTime></header>\
                   <credentials><token>T</token><sign>S</sign></credentials></loginTicketResponse>";
        assert!(TicketResponse::from_xml(xml).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(TicketResponse::from_xml("not xml at all <").unwrap_err().is_corrupt());
    }

    #[test]
    fn test_request_xml_shape() {
        let request = TicketRequest::builder()
            .unique_id(1_893_456_000)
            .generation_time(ts(11, 50))
            .expiration_time(ts(12, 10))
            .service("wsfe")
            .build();
        let xml = request.to_xml().unwrap();

        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.contains("<loginTicketRequest version=\"1.0\">"));
        assert!(xml.contains("<uniqueId>1893456000</uniqueId>"));
        assert!(xml.contains("<generationTime>2030-01-01T11:50:00Z</generationTime>"));
        assert!(xml.contains("<expirationTime>2030-01-01T12:10:00Z</expirationTime>"));
        assert!(xml.contains("<service>wsfe</service>"));
        assert_eq!(TicketRequest::from_xml(&xml).unwrap(), request);
    }

    #[test]
    fn test_request_missing_service_is_corrupt() {
        let xml = "<loginTicketRequest><header><uniqueId>1</uniqueId>\
                   <generationTime>2030-01-01T11:50:00Z</generationTime>\
                   <expirationTime>2030-01-01T12:10:00Z</expirationTime></header></loginTicketRequest>";
        assert!(TicketRequest::from_xml(xml).unwrap_err().to_string().contains("service"));
    }

    #[test]
    fn test_document_parse_names_resource() {
        let err = Document::parse(DocumentKind::Response, "<x/>", "20304050607/response")
            .unwrap_err();
        assert!(err.to_string().contains("20304050607/response"));
    }

    #[test]
    fn test_validity_boundary_is_exclusive() {
        let response =
            TicketResponse::builder().token("T").sign("S").expiration_time(ts(12, 0)).build();
        assert!(response.is_valid_at(ts(11, 59)));
        assert!(!response.is_valid_at(ts(12, 0)));
        assert!(!response.is_valid_at(ts(12, 1)));
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let tenant = TenantId::new("20304050607").unwrap();
        let response = TicketResponse::builder()
            .token("secret-token")
            .sign("secret-sign")
            .expiration_time(ts(12, 0))
            .build();
        let rendered = format!("{:?}", response.credentials(&tenant));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("20304050607"));
    }
}
