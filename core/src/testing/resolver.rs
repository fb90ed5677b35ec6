//! Static contact resolver
//!
//! Serves contact records from an in-memory table; unknown identities
//! resolve as unavailable, which exercises the retry path.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::network::contact::{ContactRecord, ContactResolver, ResolveError};

/// A resolver backed by a fixed table of records
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, ContactRecord>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the record served for `identity_id`
    pub fn insert(&mut self, identity_id: &str, record: ContactRecord) {
        self.records.insert(identity_id.to_string(), record);
    }
}

#[async_trait]
impl ContactResolver for StaticResolver {
    async fn resolve_contact_record(
        &self,
        _local_id: &str,
        remote_id: &str,
    ) -> Result<ContactRecord, ResolveError> {
        self.records
            .get(remote_id)
            .cloned()
            .ok_or(ResolveError::Unavailable)
    }
}
