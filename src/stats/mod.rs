pub mod bandwidth;
pub mod connection_stats;
