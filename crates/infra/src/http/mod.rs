//! HTTP client and the remote API adapter built on it

mod client;
mod remote;

pub use client::{HttpClient, HttpClientBuilder};
pub use remote::HttpRemoteApi;
