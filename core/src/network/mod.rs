//! External collaborator seams and wire formats
//!
//! - `store`: the content-addressed publish/fetch network
//! - `wire`: key-value header framing and payload classification
//! - `contact`: identity/trust resolution (contact records)

pub mod contact;
pub mod store;
pub mod wire;
