//! spotwatch-metadata — HTTP client for the instance metadata service.
//!
//! The metadata service is a link-local HTTP endpoint that exposes facts
//! about the instance it runs on. This crate issues the short, unadorned
//! requests the exporter needs: plain GETs against the metadata base URL
//! and, when the newer token protocol is enabled, a PUT against the token
//! endpoint before each scrape.
//!
//! Every request carries its own fixed 1-second timeout. There is no retry
//! and no caching; a scrape sees exactly what the service answered at that
//! moment. A 404 is a valid answer ("this instance has no such feature"),
//! distinct from a transport failure.

pub mod client;

pub use client::{FetchResponse, MetadataClient, MetadataError, MetadataResult, MetadataSource};
