use std::net::SocketAddr;
#[cfg(test)] use mockall::automock;
use crate::config::ConnectionConfig;
use crate::handshake::headers::header_names::*;
use crate::handshake::headers::{HandshakeHeaders, HandshakeResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    Ultrapeer,
    Leaf,
}

/// Decides the content of our side of a handshake. The connection pipeline only looks at the
///  status codes and a few negotiated headers; everything else is up to the responder.
#[cfg_attr(test, automock)]
pub trait HandshakeResponder: Send + Sync + 'static {
    /// headers for the initial `GNUTELLA CONNECT/0.6` request of an outgoing connection
    fn request_headers(&self, role: NodeRole, remote: SocketAddr) -> HandshakeHeaders;

    /// Our reply to the peer's headers. For outgoing connections, `response` is the peer's
    ///  response to our request (which may be a 401 asking for a different set of request
    ///  headers); for incoming connections it is the peer's request.
    fn respond(&self, role: NodeRole, remote: SocketAddr, response: &HandshakeResponse, outgoing: bool) -> HandshakeResponse;
}

/// A responder advertising the capabilities of a current Gnutella 0.6 servent. It accepts all
///  connections that make sense for the node's role: leaves refuse incoming connections and
///  only connect to ultrapeers.
pub struct StandardResponder {
    user_agent: String,
    listen_addr: Option<SocketAddr>,
    accept_deflate: bool,
    encode_deflate: bool,
}

impl StandardResponder {
    pub fn new(config: &ConnectionConfig, listen_addr: Option<SocketAddr>) -> StandardResponder {
        StandardResponder {
            user_agent: config.user_agent.clone(),
            listen_addr,
            accept_deflate: config.accept_deflate,
            encode_deflate: config.encode_deflate,
        }
    }

    fn common_headers(&self, role: NodeRole, remote: SocketAddr) -> HandshakeHeaders {
        let mut headers = HandshakeHeaders::new()
            .with(USER_AGENT, self.user_agent.clone());
        if let Some(listen_addr) = self.listen_addr {
            headers.set(LISTEN_IP, listen_addr.to_string());
        }
        headers.set(REMOTE_IP, remote.ip().to_string());
        if self.accept_deflate {
            headers.set(ACCEPT_ENCODING, DEFLATE);
        }
        headers.set(ULTRAPEER, match role {
            NodeRole::Ultrapeer => "True",
            NodeRole::Leaf => "False",
        });
        headers.set(QUERY_ROUTING, "0.1");
        headers.set(ULTRAPEER_QUERY_ROUTING, "0.1");
        headers.set(VENDOR_MESSAGE, "0.2");
        headers.set(MAX_TTL, "3");
        headers.set(DEGREE, "32");
        headers.set(DYNAMIC_QUERY, "0.1");
        headers.set(PONG_CACHING, "0.1");
        headers.set(GGEP, "0.5");
        headers
    }
}

impl HandshakeResponder for StandardResponder {
    fn request_headers(&self, role: NodeRole, remote: SocketAddr) -> HandshakeHeaders {
        self.common_headers(role, remote)
    }

    fn respond(&self, role: NodeRole, remote: SocketAddr, response: &HandshakeResponse, outgoing: bool) -> HandshakeResponse {
        if outgoing {
            if role == NodeRole::Leaf && !response.is_ultrapeer() {
                return HandshakeResponse::reject(HandshakeResponse::SERVICE_UNAVAILABLE, "I am a leaf and you are not an ultrapeer");
            }

            let mut headers = HandshakeHeaders::new();
            if self.encode_deflate && response.is_deflate_accepted() {
                headers.set(CONTENT_ENCODING, DEFLATE);
            }
            return HandshakeResponse::ok(headers);
        }

        if role == NodeRole::Leaf {
            return HandshakeResponse::reject(HandshakeResponse::SERVICE_UNAVAILABLE, "I am a shielded leaf node");
        }

        let mut headers = self.common_headers(role, remote);
        if self.encode_deflate && response.is_deflate_accepted() {
            headers.set(CONTENT_ENCODING, DEFLATE);
        }
        HandshakeResponse::ok(headers)
    }
}
