pub mod client;
pub mod connection;
pub mod error;
pub mod types;

pub use client::{PublishClient, RemoteApi};
pub use connection::{ConnectionManager, Directive};
pub use error::{ErrorClass, RemoteError};
pub use types::{NewRecord, RecordCreated, UploadSlot, UserInfo};
