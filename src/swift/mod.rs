//! Backend object-store plumbing.
//!
//! [`backend::SwiftBackend`] abstracts the transport, [`mapper`] turns an
//! OSS request into backend calls, and [`http::HttpSwiftBackend`] sends
//! them over the network.

pub mod backend;
pub mod http;
pub mod mapper;
#[cfg(test)]
pub mod mock;
