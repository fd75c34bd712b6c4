pub mod coordinator;
pub mod handshaker;
pub mod headers;
pub mod responder;
