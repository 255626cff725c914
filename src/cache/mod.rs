//! Auto-refreshing resource cache.
//!
//! This module binds resource keys to fetchers and keeps every subscriber of
//! a key looking at the same state:
//! - One entry and at most one in-flight request per key
//! - Polling on the refresh policy's interval while anyone is subscribed
//! - Manual refresh, focus and explicit invalidation triggers
//! - Stale data kept on screen next to the latest error

mod entry;
mod layer;
mod traits;

pub use layer::{ResourceCache, Subscription};
pub use traits::{CacheDefaults, ResourceOptions, ResourceState};
