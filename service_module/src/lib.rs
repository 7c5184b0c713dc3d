pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod email;
pub mod feedback;
pub mod headers;
pub mod inbound;
pub mod routing;
pub mod schedule;
pub mod server;
pub mod store;
pub mod threading;

mod error;

pub use config::ServiceConfig;
pub use dispatch::{BatchDispatcher, RunStats};
pub use error::{BoxError, ServiceError, UpstreamError};
pub use inbound::{InboundFields, InboundOutcome, InboundPipeline};
pub use routing::{AddressRouter, RecipientRoute, RouteConfig};
pub use server::run_server;
pub use threading::ThreadFormatter;
