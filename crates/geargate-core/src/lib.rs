//! geargate-core — shared types for the Geargate job gateway.
//!
//! Everything the HTTP layer and the dispatcher agree on lives here:
//!
//! - [`Token`] and [`TokenCodec`]: credentials carried as a URL path segment
//! - [`RequestId`]: the idempotency key derived from a token
//! - [`ResourceId`]: validated gear / repository identifiers
//! - [`Job`]: the closed set of backend job descriptors
//! - [`ResponseSink`] / [`RawResponseSink`]: single-writer response handles
//! - [`GatewayConfig`]: daemon configuration

pub mod config;
pub mod data;
pub mod identifier;
pub mod job;
pub mod request_id;
pub mod sink;
pub mod token;

pub use config::{ConfigError, DispatcherConfig, GatewayConfig};
pub use data::{CreateContainerData, CreateKeysData, PortPair, ValidationError};
pub use identifier::{IdentifierError, ResourceId};
pub use job::*;
pub use request_id::RequestId;
pub use sink::{RawResponseSink, ResponseSink, SinkBody, SinkError, SinkReceiver, SinkResponse};
pub use token::{Token, TokenCodec, TokenError, TEST_TOKEN_SEGMENT};
