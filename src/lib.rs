//! offline-cache - request-intercepting caching agent
//!
//! Decides, for every request a web application makes, whether to answer
//! from a partitioned response cache or from the network, keeps cached
//! entries fresh in the background, and expires remote-data entries.

pub mod agent;
pub mod cache;
pub mod config;
pub mod event;
pub mod net;
pub mod notify;
