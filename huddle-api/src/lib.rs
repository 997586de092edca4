//! Huddle signaling surface
//!
//! Configuration, logging, the JSON event protocol and the axum WebSocket
//! endpoint clients negotiate media sessions through. Every request is
//! forwarded to the [`huddle_sfu::SfuManager`]; the `new-user` / `delete-user`
//! roster events go to the [`presence::PresenceHub`] instead.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod logging;
pub mod presence;
pub mod protocol;

pub use config::Config;
pub use dispatch::Session;
pub use error::{ApiError, ApiResult};
pub use http::{create_router, AppState};
pub use presence::PresenceHub;
