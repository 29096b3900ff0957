//! Real-time delivery for carelink: the connection hub, the per-connection
//! pump pair, the notification service and the HTTP/WebSocket surface.

pub mod chat;
pub mod connection;
pub mod hub;
pub mod inbound;
pub mod notify;
pub mod server;

pub use chat::{ChatError, ChatService, ChatStores};
pub use connection::{Connection, ConnectionState, FrameHandler, PumpConfig};
pub use hub::{Hub, HubError};
pub use inbound::Relay;
pub use notify::NotificationService;
pub use server::{build_router, start, AppState, ConnectError, ServerHandle};
