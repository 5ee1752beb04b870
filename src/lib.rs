//! Zentinel gRPC Mock Engine
//!
//! Resolves file-based mocks for gRPC calls, renders them against the
//! caller's request, and replays the result with simulated latency for all
//! four call shapes.
//!
//! # Features
//!
//! - **File Store**: `pkg.Greeter.Hello` is served from `<mocks_dir>/pkg/Greeter/Hello.mock`
//! - **Wildcard Fallback**: `__` directories act as catch-all mocks per API family
//! - **Dynamic Templates**: Handlebars templates with the request bound as `request`
//! - **Latency Simulation**: Per-message `delay` fields, cumulative for server streams
//! - **Streaming**: Server, client, and bidirectional streaming state machines
//!
//! # Mock Files
//!
//! Unary and client streaming:
//!
//! ```text
//! {"message": "Hello {{request.name}}", "delay": 100}
//! ```
//!
//! Server streaming, frames separated by `====`:
//!
//! ```text
//! {"tick": 1, "delay": 100}
//! ====
//! {"tick": 2, "delay": 100}
//! ```
//!
//! Bidirectional streaming:
//!
//! ```text
//! {"data": {"echo": "{{request.text}}"}, "end": {"bye": true}}
//! ```

pub mod call;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
mod handlers;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod template;

pub use call::{Call, CallKind, CallState, Inbound, Outbound};
pub use config::EngineConfig;
pub use engine::MockEngine;
pub use error::MockError;
pub use resolver::{HandlerIdentity, MockPathResolver};
pub use store::{FsStore, InMemoryStore, MockStore};
pub use template::{RenderContext, Renderer, TemplateEngine};
