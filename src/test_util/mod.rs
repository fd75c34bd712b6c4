//! Utilities for testing code that sits on top of a connection: message factories and
//!  observer implementations that record what they see. They are part of the crate's regular
//!  (non-#[cfg(test)]) code so applications can use them in their own tests.

pub mod message;
pub mod observer;
