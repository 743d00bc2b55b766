//! People-record write service.
//!
//! # Responsibility
//! - Validate and write records of the shared roster collection.
//!
//! # Invariants
//! - Records are written with canonical field names only.
//! - `createdAt`/`updatedAt` come from the store clock.

use crate::config::CoreConfig;
use crate::error::{CoreResult, ErrorCategory, UserFacingError};
use crate::model::profile::FIELD_CREATED_AT;
use crate::model::record::{RecordId, RecordInput};
use crate::provider::{DocumentStore, ProviderError, QueryDescriptor, SortDirection};
use log::{info, warn};
use std::sync::Arc;

pub struct RecordService {
    store: Arc<dyn DocumentStore>,
    collection: String,
    min_age: u32,
}

impl RecordService {
    pub fn new(store: Arc<dyn DocumentStore>, config: &CoreConfig) -> Self {
        Self {
            store,
            collection: config.records_collection.clone(),
            min_age: config.min_age,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Newest-first query over the record collection.
    pub fn roster_query(&self) -> QueryDescriptor {
        QueryDescriptor::collection(self.collection.as_str())
            .order_by(FIELD_CREATED_AT, SortDirection::Descending)
    }

    /// Validates and adds one record; returns the store-assigned id.
    pub async fn add_record(&self, input: &RecordInput) -> CoreResult<RecordId> {
        let input = input.normalized();
        input.validate(self.min_age)?;
        let id = self
            .store
            .add_document(&self.collection, input.create_write())
            .await
            .map_err(|err| self.fail("add", &err))?;
        info!(
            "event=record_add module=record_service status=ok collection={} record_id={}",
            self.collection, id
        );
        Ok(id)
    }

    pub async fn update_record(&self, id: &str, input: &RecordInput) -> CoreResult<()> {
        require_record_id(id)?;
        let input = input.normalized();
        input.validate(self.min_age)?;
        self.store
            .update_document(&self.collection, id, input.update_write())
            .await
            .map_err(|err| self.fail("update", &err))?;
        info!(
            "event=record_update module=record_service status=ok collection={} record_id={}",
            self.collection, id
        );
        Ok(())
    }

    pub async fn delete_record(&self, id: &str) -> CoreResult<()> {
        require_record_id(id)?;
        self.store
            .delete_document(&self.collection, id)
            .await
            .map_err(|err| self.fail("delete", &err))?;
        info!(
            "event=record_delete module=record_service status=ok collection={} record_id={}",
            self.collection, id
        );
        Ok(())
    }

    fn fail(&self, op: &str, err: &ProviderError) -> UserFacingError {
        let error = UserFacingError::from(err);
        warn!(
            "event=record_{} module=record_service status=error collection={} error_category={} error_code={}",
            op, self.collection, error.category, err.code
        );
        error
    }
}

fn require_record_id(id: &str) -> CoreResult<()> {
    if id.trim().is_empty() {
        return Err(UserFacingError::new(
            ErrorCategory::InvalidInput,
            "record id cannot be empty",
        ));
    }
    Ok(())
}
