//! Listing collection for the PropIntel pipeline.
//!
//! A [`Coordinator`] fans `(city, page range)` partitions out over a bounded
//! worker pool. Each worker pulls pages through a [`ListingSource`] (the HTTP
//! [`MagicBricksSource`] in production) and appends every parsed record to a
//! shared [`IncrementalStore`].

pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod parse;
pub mod source;
pub mod store;

pub use coordinator::{
    plan_partitions, Coordinator, FieldCompletion, PartitionFailure, ScrapePartition,
    ScrapeSummary,
};
pub use error::{FetchError, ParseError, PartitionError, StoreError};
pub use fetch::Fetcher;
pub use identity::{DelayWindow, IdentityProfile, IDENTITY_POOL};
pub use parse::{ListingDetail, ListingStub};
pub use source::{ListingSource, MagicBricksSource};
pub use store::IncrementalStore;
