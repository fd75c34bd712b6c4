pub mod bucket;
pub mod composite;
pub mod message_queue;
pub mod priority_queue;
pub mod simple_queue;
