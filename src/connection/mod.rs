pub mod address;
pub mod capabilities;
pub mod connection;
pub mod observer;
