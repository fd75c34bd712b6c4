use std::io;
use std::net::SocketAddr;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};
use crate::config::ConnectionConfig;
use crate::error::HandshakeError;
use crate::handshake::headers::{HandshakeHeaders, HandshakeResponse};
use crate::handshake::responder::{HandshakeResponder, NodeRole};

pub const CONNECT_LINE: &str = "GNUTELLA CONNECT/0.6";

/// The headers both sides ended up with after a successful handshake
#[derive(Clone, Debug)]
pub struct NegotiatedHeaders {
    /// everything the peer sent
    pub read: HandshakeResponse,
    /// everything we sent
    pub written: HandshakeResponse,
}

/// The text based header exchange that precedes message traffic on a connection:
///
/// ```ascii
/// outgoing                          incoming
/// GNUTELLA CONNECT/0.6  ------->
/// <request headers>
///                       <-------    GNUTELLA/0.6 200 OK
///                                   <response headers>
/// GNUTELLA/0.6 200 OK   ------->
/// <response headers>
/// ```
///
/// An outgoing connection that receives a 401 sends a new request with the headers the
///  responder provides for it, up to a configured number of rounds.
///
/// Reads go through a buffer, and data the peer sent after its last handshake line stays in
///  that buffer - it is handed to the message reader by [HandshakeIo::into_parts].
pub struct HandshakeIo<S> {
    stream: BufReader<S>,
    max_line_len: usize,
    max_lines: usize,
    max_rounds: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> HandshakeIo<S> {
    pub fn new(stream: S, config: &ConnectionConfig) -> HandshakeIo<S> {
        HandshakeIo {
            stream: BufReader::new(stream),
            max_line_len: config.max_header_line_len,
            max_lines: config.max_header_lines,
            max_rounds: config.max_handshake_rounds,
        }
    }

    pub fn into_parts(self) -> (S, Bytes) {
        let buffered = Bytes::copy_from_slice(self.stream.buffer());
        (self.stream.into_inner(), buffered)
    }

    pub async fn shake_outgoing(&mut self, responder: &dyn HandshakeResponder, role: NodeRole, remote: SocketAddr) -> Result<NegotiatedHeaders, HandshakeError> {
        let mut request = responder.request_headers(role, remote);

        for round in 0..self.max_rounds {
            trace!("sending connect request to {:?}, round {}", remote, round);
            self.write_block(CONNECT_LINE, &request).await?;

            let response = self.read_response().await?;
            if response.status_code() == HandshakeResponse::UNAUTHORIZED {
                debug!("{:?} requested authentication: {}", remote, response.status_message());
                let retry = responder.respond(role, remote, &response, true);
                if !retry.is_accepted() {
                    return Err(HandshakeError::NoGnutellaOk { code: response.status_code(), message: response.status_message().to_string() });
                }
                request = retry.into_headers();
                continue;
            }
            if !response.is_accepted() {
                return Err(HandshakeError::NoGnutellaOk { code: response.status_code(), message: response.status_message().to_string() });
            }

            let ours = responder.respond(role, remote, &response, true);
            self.write_block(&ours.status_line(), ours.headers()).await?;
            if !ours.is_accepted() {
                return Err(HandshakeError::NoGnutellaOk { code: ours.status_code(), message: ours.status_message().to_string() });
            }

            let mut written = request;
            written.merge(ours.headers());
            return Ok(NegotiatedHeaders {
                read: response,
                written: HandshakeResponse::ok(written),
            });
        }

        Err(HandshakeError::NoGnutellaOk {
            code: HandshakeResponse::UNAUTHORIZED,
            message: format!("no success after {} handshake rounds", self.max_rounds),
        })
    }

    pub async fn shake_incoming(&mut self, responder: &dyn HandshakeResponder, role: NodeRole, remote: SocketAddr) -> Result<NegotiatedHeaders, HandshakeError> {
        let greeting = self.read_line().await?;
        if !greeting.starts_with(CONNECT_LINE) {
            return Err(HandshakeError::BadHandshake(format!("unexpected greeting {:?}", greeting)));
        }
        let request = HandshakeResponse::ok(self.read_headers().await?);

        let ours = responder.respond(role, remote, &request, false);
        self.write_block(&ours.status_line(), ours.headers()).await?;
        if !ours.is_accepted() {
            return Err(HandshakeError::NoGnutellaOk { code: ours.status_code(), message: ours.status_message().to_string() });
        }

        let acknowledgement = self.read_response().await?;
        if !acknowledgement.is_accepted() {
            return Err(HandshakeError::NoGnutellaOk { code: acknowledgement.status_code(), message: acknowledgement.status_message().to_string() });
        }

        let mut read = request.into_headers();
        read.merge(acknowledgement.headers());
        Ok(NegotiatedHeaders {
            read: HandshakeResponse::ok(read),
            written: ours,
        })
    }

    async fn write_block(&mut self, first_line: &str, headers: &HandshakeHeaders) -> Result<(), HandshakeError> {
        let mut block = String::with_capacity(512);
        block.push_str(first_line);
        block.push_str("\r\n");
        headers.write_to(&mut block);
        block.push_str("\r\n");

        self.stream.write_all(block.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<HandshakeResponse, HandshakeError> {
        let status_line = self.read_line().await?;
        let (code, message) = HandshakeResponse::parse_status_line(&status_line)?;
        let headers = self.read_headers().await?;
        Ok(HandshakeResponse::new(code, message, headers))
    }

    async fn read_headers(&mut self) -> Result<HandshakeHeaders, HandshakeError> {
        let mut headers = HandshakeHeaders::new();
        for _ in 0..self.max_lines {
            let line = self.read_line().await?;
            if line.is_empty() {
                return Ok(headers);
            }
            headers.parse_line(&line)?;
        }
        Err(HandshakeError::BadHandshake(format!("more than {} header lines", self.max_lines)))
    }

    /// reads a single line, stripping the line terminator
    async fn read_line(&mut self) -> Result<String, HandshakeError> {
        let mut raw = Vec::new();
        let limit = (self.max_line_len + 2) as u64;
        let num_read = (&mut self.stream).take(limit).read_until(b'\n', &mut raw).await?;

        if num_read == 0 {
            return Err(HandshakeError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed during handshake")));
        }
        if raw.last() != Some(&b'\n') {
            if num_read as u64 == limit {
                return Err(HandshakeError::BadHandshake(format!("header line exceeds {} bytes", self.max_line_len)));
            }
            return Err(HandshakeError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed during handshake")));
        }

        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let line = String::from_utf8(raw)
            .map_err(|_| HandshakeError::BadHandshake("header line is not valid UTF-8".to_string()))?;
        trace!("handshake line: {:?}", line);
        Ok(line)
    }
}
