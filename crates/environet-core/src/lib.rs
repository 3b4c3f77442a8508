//! Core types and trait definitions for the Environet distribution node.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the domain model (identities, monitoring points, time series), the upload
//! document handed between pipeline stages, the [`store::DistributionStore`]
//! abstraction, and the request-signature protocol shared by the server and
//! the data-node client.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod identity;
pub mod monitoring;
pub mod signature;
pub mod store;
pub mod upload;

pub use error::{Error, Result};
