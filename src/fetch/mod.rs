//! Image fetching and decoding primitives

pub mod client;

pub use client::{FetchError, Fetcher};
