//! Request/response model and the network client.

pub mod client;
pub mod request;
pub mod response;

pub use client::{Fetcher, HttpFetcher};
pub use request::{Destination, Request, RequestKind};
pub use response::Response;
