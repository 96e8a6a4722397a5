//! Storage change notifications as delivered by Event Grid.
//!
//! ```text
//! request body → NotificationBatch → ChangeNotification → ObjectLocator
//! ```

pub mod subject;
pub mod types;

pub use subject::{parse_subject, ObjectLocator};
pub use types::{
    ChangeNotification, EventKind, NotificationBatch, BLOB_CREATED_EVENTS,
    SUBSCRIPTION_VALIDATION_EVENT,
};
