//! SQLite persistence for the notification core.
//!
//! Each repo wraps a shared [`Database`] and implements one of the store
//! traits from `carelink_core::store`.

pub mod database;
pub mod error;
pub mod messages;
pub mod patients;
pub mod readings;
pub mod records;
pub mod row_helpers;
pub mod schema;
pub mod suggestions;

pub use database::Database;
pub use error::DbError;
pub use messages::MessageRepo;
pub use patients::PatientRepo;
pub use readings::ReadingRepo;
pub use records::RecordRepo;
pub use suggestions::SuggestionRepo;
