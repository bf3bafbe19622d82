//! SOAP 1.1 envelope codec.
//!
//! Requests are rendered as plain strings; the authority's services accept a
//! fixed document shape and nothing here needs a general XML serializer.
//! Responses are scanned with a streaming reader that collects the text of
//! every leaf element by local name, which is enough to pick out
//! `loginCmsReturn`, a fault, or the `FEDummy` status fields regardless of
//! the prefixes the server chose.

use std::collections::BTreeMap;

use quick_xml::{Reader, escape::escape, events::Event};
use ticketbroker_authn::RemoteError;
use ticketbroker_storage::{Credentials, TicketResponse};

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENV_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace of the authentication service.
pub const WSAA_NAMESPACE: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";

/// Namespace of the invoicing service. Also the `SOAPAction` prefix.
pub const WSFE_NAMESPACE: &str = "http://ar.gov.afip.dif.FEV1/";

/// Builds the `loginCms` request carrying a base64 CMS signature.
#[must_use]
pub fn login_cms_request(signed_request: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{SOAP_ENV_NAMESPACE}" xmlns:wsaa="{WSAA_NAMESPACE}"><soapenv:Header/><soapenv:Body><wsaa:loginCms><wsaa:in0>{}</wsaa:in0></wsaa:loginCms></soapenv:Body></soapenv:Envelope>"#,
        escape(signed_request)
    )
}

/// Builds an invoicing request.
///
/// With `credentials` the operation element starts with an `ar:Auth` block.
/// `body` is inserted verbatim after it and may use the `ar` prefix.
/// `operation` must satisfy [`is_xml_name`].
#[must_use]
pub fn business_request(operation: &str, credentials: Option<&Credentials>, body: &str) -> String {
    let auth = credentials.map_or_else(String::new, |c| {
        format!(
            "<ar:Auth><ar:Token>{}</ar:Token><ar:Sign>{}</ar:Sign><ar:Cuit>{}</ar:Cuit></ar:Auth>",
            escape(c.token.as_str()),
            escape(c.sign.as_str()),
            c.cuit
        )
    });
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{SOAP_ENV_NAMESPACE}" xmlns:ar="{WSFE_NAMESPACE}"><soapenv:Header/><soapenv:Body><ar:{operation}>{auth}{body}</ar:{operation}></soapenv:Body></soapenv:Envelope>"#
    )
}

/// Returns `true` if `name` can be used as an unprefixed element name.
///
/// Only ASCII names are accepted; every operation the authority publishes
/// is ASCII.
#[must_use]
pub fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Leaf element text of a successful envelope, keyed by local name.
///
/// When a name occurs more than once the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapResponse {
    fields: BTreeMap<String, String>,
}

impl SoapResponse {
    /// Text of the first leaf element named `local_name`.
    #[must_use]
    pub fn get(&self, local_name: &str) -> Option<&str> {
        self.fields.get(local_name).map(String::as_str)
    }

    fn require(&self, local_name: &str) -> Result<&str, RemoteError> {
        self.get(local_name)
            .ok_or_else(|| RemoteError::malformed(format!("missing {local_name} in response")))
    }
}

/// Parses a response envelope.
///
/// # Errors
///
/// - [`RemoteError::Fault`] if the body holds a SOAP fault.
/// - [`RemoteError::MalformedResponse`] if the document is not well formed
///   or is not a SOAP envelope.
pub fn parse_envelope(xml: &str) -> Result<SoapResponse, RemoteError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = BTreeMap::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut saw_envelope = false;
    let mut saw_fault = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() {
                    saw_envelope = name == "Envelope";
                }
                saw_fault |= name == "Fault";
                path.push(name);
                text.clear();
            },
            Ok(Event::Text(t)) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| RemoteError::malformed_with_source("invalid character data", e))?;
                text.push_str(&unescaped);
            },
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            },
            Ok(Event::End(_)) => {
                if let Some(name) = path.pop()
                    && !text.is_empty()
                {
                    fields.entry(name).or_insert_with(|| std::mem::take(&mut text));
                }
                text.clear();
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(RemoteError::malformed_with_source("malformed XML", e)),
        }
    }

    if !saw_envelope {
        return Err(RemoteError::malformed("response is not a SOAP envelope"));
    }
    if saw_fault {
        let code = fields.remove("faultcode").or_else(|| fields.remove("Value"));
        let message = fields.remove("faultstring").or_else(|| fields.remove("Text"));
        return Err(RemoteError::fault(
            code.unwrap_or_else(|| "unknown".to_owned()),
            message.unwrap_or_default(),
        ));
    }
    Ok(SoapResponse { fields })
}

/// Parses a `loginCms` response into the ticket it carries.
///
/// # Errors
///
/// See [`parse_envelope`]. Also returns
/// [`RemoteError::MalformedResponse`] if `loginCmsReturn` is missing or is
/// not a complete `loginTicketResponse`.
pub fn parse_login_cms_response(xml: &str) -> Result<TicketResponse, RemoteError> {
    let envelope = parse_envelope(xml)?;
    let ticket = envelope.require("loginCmsReturn")?;
    TicketResponse::from_xml(ticket)
        .map_err(|e| RemoteError::malformed_with_source("invalid loginTicketResponse", e))
}

/// Status reported by `FEDummy`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DummyStatus {
    /// Application server status.
    pub app_server: String,
    /// Database server status.
    pub db_server: String,
    /// Authentication server status.
    pub auth_server: String,
}

impl DummyStatus {
    /// Returns `true` if all three servers report `OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        [&self.app_server, &self.db_server, &self.auth_server]
            .iter()
            .all(|s| s.eq_ignore_ascii_case("OK"))
    }
}

/// Parses an `FEDummy` response.
///
/// # Errors
///
/// See [`parse_envelope`]. Also returns
/// [`RemoteError::MalformedResponse`] if a status field is missing.
pub fn parse_dummy_response(xml: &str) -> Result<DummyStatus, RemoteError> {
    let envelope = parse_envelope(xml)?;
    Ok(DummyStatus {
        app_server: envelope.require("AppServer")?.to_owned(),
        db_server: envelope.require("DbServer")?.to_owned(),
        auth_server: envelope.require("AuthServer")?.to_owned(),
    })
}
