//! Translation between the client schema and the provider's chat completions
//! schema.
//!
//! Everything here is pure apart from [`streaming::text_fragments`], which only
//! adapts a stream it is handed.

pub mod client_types;
pub mod provider_types;
pub mod request;
pub mod response;
pub mod streaming;
