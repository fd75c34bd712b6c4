use std::fmt::Write;
use std::net::IpAddr;
use std::str::FromStr;
use crate::error::HandshakeError;

pub mod header_names {
    pub const USER_AGENT: &str = "User-Agent";
    pub const ULTRAPEER: &str = "X-Ultrapeer";
    pub const LISTEN_IP: &str = "Listen-IP";
    pub const REMOTE_IP: &str = "Remote-IP";
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const VENDOR_MESSAGE: &str = "Vendor-Message";
    pub const MAX_TTL: &str = "X-Max-TTL";
    pub const DEGREE: &str = "X-Degree";
    pub const QUERY_ROUTING: &str = "X-Query-Routing";
    pub const ULTRAPEER_QUERY_ROUTING: &str = "X-Ultrapeer-Query-Routing";
    pub const DYNAMIC_QUERY: &str = "X-Dynamic-Querying";
    pub const PROBE_QUERIES: &str = "X-Probe-Queries";
    pub const REQUERIES: &str = "X-Requeries";
    pub const PONG_CACHING: &str = "Pong-Caching";
    pub const GGEP: &str = "GGEP";
    pub const GUESS: &str = "X-Guess";
    pub const LOCALE_PREF: &str = "X-Locale-Pref";
    pub const TRY_ULTRAPEERS: &str = "X-Try-Ultrapeers";
    pub const CRAWLER: &str = "Crawler";
    pub const TEMP_CONNECTION: &str = "X-Temp-Connection";

    pub const DEFLATE: &str = "deflate";
}

use header_names::*;

/// Handshake header lines in the order they were received or added. Names are compared
///  case-insensitively; values are kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandshakeHeaders {
    entries: Vec<(String, String)>,
}

impl HandshakeHeaders {
    pub fn new() -> HandshakeHeaders {
        HandshakeHeaders::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// replaces an existing header with the same name, keeping its position
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> HandshakeHeaders {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    /// adds or replaces all headers from `other`
    pub fn merge(&mut self, other: &HandshakeHeaders) {
        for (name, value) in &other.entries {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a single `Name: value` line. Lines starting with whitespace continue the
    ///  previous header's value.
    pub fn parse_line(&mut self, line: &str) -> Result<(), HandshakeError> {
        if line.starts_with(' ') || line.starts_with('\t') {
            return match self.entries.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    Ok(())
                }
                None => Err(HandshakeError::BadHandshake(format!("continuation line without header: {:?}", line))),
            };
        }

        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                self.set(name.trim(), value.trim());
                Ok(())
            }
            _ => Err(HandshakeError::BadHandshake(format!("malformed header line: {:?}", line))),
        }
    }

    pub fn write_to(&self, out: &mut String) {
        for (name, value) in &self.entries {
            // writing to a String does not fail
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
    }

    fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).map(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    fn get_version(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(|v| f32::from_str(v.trim()).ok())
    }

    fn get_int<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// true if the comma separated header value contains `token`
    fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name)
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }
}

/// One side's message in the handshake: status line plus headers. A connect request is
///  represented as a response with status 200.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeResponse {
    status_code: u16,
    status_message: String,
    headers: HandshakeHeaders,
}

impl HandshakeResponse {
    pub const OK: u16 = 200;
    pub const UNAUTHORIZED: u16 = 401;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    pub const DEFAULT_DEGREE: u32 = 6;
    pub const HIGH_DEGREE: u32 = 15;
    pub const DEFAULT_MAX_TTL: u8 = 4;

    pub fn new(status_code: u16, status_message: impl Into<String>, headers: HandshakeHeaders) -> HandshakeResponse {
        HandshakeResponse {
            status_code,
            status_message: status_message.into(),
            headers,
        }
    }

    pub fn ok(headers: HandshakeHeaders) -> HandshakeResponse {
        Self::new(Self::OK, "OK", headers)
    }

    pub fn reject(status_code: u16, status_message: impl Into<String>) -> HandshakeResponse {
        Self::new(status_code, status_message, HandshakeHeaders::new())
    }

    pub fn busy() -> HandshakeResponse {
        Self::reject(Self::SERVICE_UNAVAILABLE, "Service Not Available")
    }

    /// Parses a status line like `GNUTELLA/0.6 200 OK`
    pub fn parse_status_line(line: &str) -> Result<(u16, String), HandshakeError> {
        let rest = line.strip_prefix("GNUTELLA/")
            .ok_or_else(|| HandshakeError::BadHandshake(format!("bad status line: {:?}", line)))?;
        let mut parts = rest.splitn(3, ' ');
        let _version = parts.next();
        let code = parts.next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| HandshakeError::BadHandshake(format!("bad status code: {:?}", line)))?;
        let message = parts.next().unwrap_or("").trim().to_string();
        Ok((code, message))
    }

    pub fn status_line(&self) -> String {
        format!("GNUTELLA/0.6 {} {}", self.status_code, self.status_message)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn headers(&self) -> &HandshakeHeaders {
        &self.headers
    }

    pub fn into_headers(self) -> HandshakeHeaders {
        self.headers
    }

    pub fn is_accepted(&self) -> bool {
        self.status_code == Self::OK
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT)
    }

    pub fn is_ultrapeer(&self) -> bool {
        self.headers.get_bool(ULTRAPEER) == Some(true)
    }

    pub fn is_leaf(&self) -> bool {
        self.headers.get_bool(ULTRAPEER) == Some(false)
    }

    /// the sender of these headers deflates what it sends
    pub fn is_deflate_enabled(&self) -> bool {
        self.headers.get(CONTENT_ENCODING)
            .map(|v| v.trim().eq_ignore_ascii_case(DEFLATE))
            .unwrap_or(false)
    }

    /// the sender of these headers can read deflated data
    pub fn is_deflate_accepted(&self) -> bool {
        self.headers.contains_token(ACCEPT_ENCODING, DEFLATE)
    }

    /// the port from `Listen-IP: <ip>:<port>`
    pub fn listening_port(&self) -> Option<u16> {
        let value = self.headers.get(LISTEN_IP)?;
        let (_, port) = value.trim().rsplit_once(':')?;
        port.parse().ok()
    }

    /// our address as seen by the peer
    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.headers.get(REMOTE_IP)?.trim().parse().ok()
    }

    /// the vendor message protocol version, 0 if not supported
    pub fn supports_vendor_messages(&self) -> f32 {
        self.headers.get_version(VENDOR_MESSAGE).unwrap_or(0.0)
    }

    pub fn max_ttl(&self) -> u8 {
        self.headers.get_int(MAX_TTL).unwrap_or(Self::DEFAULT_MAX_TTL)
    }

    pub fn degree(&self) -> u32 {
        self.headers.get_int(DEGREE).unwrap_or(Self::DEFAULT_DEGREE)
    }

    pub fn is_high_degree(&self) -> bool {
        self.degree() >= Self::HIGH_DEGREE
    }

    pub fn is_query_routing_enabled(&self) -> bool {
        self.headers.get_version(QUERY_ROUTING).map(|v| v >= 0.1).unwrap_or(false)
    }

    pub fn is_ultrapeer_query_routing_connection(&self) -> bool {
        self.headers.get_version(ULTRAPEER_QUERY_ROUTING).map(|v| v >= 0.1).unwrap_or(false)
    }

    pub fn is_dynamic_query_connection(&self) -> bool {
        self.headers.get_version(DYNAMIC_QUERY).map(|v| v >= 0.1).unwrap_or(false)
    }

    pub fn supports_probe_queries(&self) -> bool {
        self.headers.get_version(PROBE_QUERIES).map(|v| v >= 0.1).unwrap_or(false)
    }

    pub fn is_no_requerying(&self) -> bool {
        self.headers.get_bool(REQUERIES) == Some(false)
    }

    pub fn supports_pong_caching(&self) -> bool {
        self.headers.get_version(PONG_CACHING).map(|v| v >= 0.1).unwrap_or(false)
    }

    pub fn supports_guess(&self) -> bool {
        self.headers.get_version(GUESS).map(|v| v >= 0.1).unwrap_or(false)
    }

    pub fn supports_ggep(&self) -> bool {
        self.headers.contains(GGEP)
    }

    pub fn is_limewire(&self) -> bool {
        self.user_agent()
            .map(|ua| ua.to_ascii_lowercase().starts_with("limewire"))
            .unwrap_or(false)
    }

    pub fn is_good_ultrapeer(&self) -> bool {
        self.is_high_degree()
            && self.is_ultrapeer_query_routing_connection()
            && self.max_ttl() < 5
            && self.is_dynamic_query_connection()
    }

    pub fn is_good_leaf(&self) -> bool {
        self.is_good_ultrapeer() && (self.is_limewire() || self.is_no_requerying())
    }

    pub fn locale_pref(&self) -> Option<&str> {
        self.headers.get(LOCALE_PREF)
    }

    pub fn is_crawler(&self) -> bool {
        self.headers.contains(CRAWLER)
    }

    pub fn is_temporary_connection(&self) -> bool {
        self.headers.get_bool(TEMP_CONNECTION) == Some(true)
    }

    /// hosts the peer suggests trying instead, as `host:port` entries
    pub fn try_ultrapeers(&self) -> Vec<String> {
        self.headers.get(TRY_ULTRAPEERS)
            .map(|v| v.split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect())
            .unwrap_or_default()
    }
}
