use std::net::IpAddr;
use crate::handshake::headers::{HandshakeHeaders, HandshakeResponse};

/// What was negotiated during the handshake. This is an immutable snapshot; header updates
///  the peer sends later produce a new snapshot through [ConnectionCapabilities::with_header_update].
#[derive(Clone, Debug)]
pub struct ConnectionCapabilities {
    pub headers_read: HandshakeResponse,
    pub headers_written: HandshakeResponse,
    pub read_deflated: bool,
    pub write_deflated: bool,
}

impl ConnectionCapabilities {
    /// Deflate is used for reading if the peer announced it encodes, and for writing if we
    ///  announced it.
    pub fn new(headers_read: HandshakeResponse, headers_written: HandshakeResponse) -> ConnectionCapabilities {
        let read_deflated = headers_read.is_deflate_enabled();
        let write_deflated = headers_written.is_deflate_enabled();
        ConnectionCapabilities {
            headers_read,
            headers_written,
            read_deflated,
            write_deflated,
        }
    }

    pub fn listening_port(&self) -> Option<u16> {
        self.headers_read.listening_port()
    }

    /// our address as the peer sees it
    pub fn remote_reported_ip(&self) -> Option<IpAddr> {
        self.headers_read.remote_ip()
    }

    pub fn supports_vendor_messages(&self) -> bool {
        self.headers_read.supports_vendor_messages() > 0.0
    }

    pub fn is_good_ultrapeer(&self) -> bool {
        self.headers_read.is_good_ultrapeer()
    }

    pub fn is_good_leaf(&self) -> bool {
        self.headers_read.is_good_leaf()
    }

    /// Merges headers the peer sent after the handshake. The compression settings are fixed
    ///  for the connection's lifetime and are not affected.
    pub fn with_header_update(&self, update: &HandshakeHeaders) -> ConnectionCapabilities {
        let mut headers = self.headers_read.headers().clone();
        headers.merge(update);

        ConnectionCapabilities {
            headers_read: HandshakeResponse::new(self.headers_read.status_code(), self.headers_read.status_message(), headers),
            headers_written: self.headers_written.clone(),
            read_deflated: self.read_deflated,
            write_deflated: self.write_deflated,
        }
    }
}
