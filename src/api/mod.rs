//! Backend API: authenticated client, wire schemas and typed resources.

mod api_types;
mod client;
mod error;
mod resources;
mod types;

pub use client::ApiClient;
pub use error::RequestError;
pub use resources::{ResourceKey, Resources};
pub use types::*;

#[cfg(test)]
pub(crate) use client::tests::{json_response, stub_server};
