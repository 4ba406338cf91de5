//! Gateway: thin HTTP surface over a configured provider.
//!
//! Single port. `GET /` is an unauthenticated health probe; `/api/*` routes require
//! the bearer token when token auth is configured.

mod protocol;
mod server;

pub use protocol::{
    CapabilitiesResponse, ChatParams, ChatResponse, EmbeddingInput, EmbeddingsParams,
    EmbeddingsResponse, ErrorBody, ModelsResponse,
};
pub use server::{router, run_gateway, GatewayState};
