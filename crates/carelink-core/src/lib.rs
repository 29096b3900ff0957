pub mod envelope;
pub mod errors;
pub mod ids;
pub mod models;
pub mod notify;
pub mod provider;
pub mod security;
pub mod store;

pub use envelope::{Action, Envelope};
pub use errors::{ProviderError, StoreError};
pub use notify::Notifier;
pub use provider::{ChatTurn, CompletionProvider, CompletionRequest};
