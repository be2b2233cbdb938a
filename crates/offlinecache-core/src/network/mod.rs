//! Network collaborator.
//!
//! The cache never talks to reqwest directly: strategies, the install step
//! and background sync all go through the `NetworkClient` trait so hosts and
//! tests can inject their own transport.

pub mod client;

pub use client::{HttpClient, NetworkClient};
