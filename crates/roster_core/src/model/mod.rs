//! Domain model for sessions, profiles and live collection records.
//!
//! # Responsibility
//! - Define the data shapes exchanged between core components.
//! - Decode stored documents at the store-to-model boundary.
//!
//! # Invariants
//! - Identity ids are provider-assigned and never rewritten by core.
//! - Record ids are store-assigned and unique within one materialized list.
//! - Timestamps originate from the document store, never from client clocks.

pub mod document;
pub mod fields;
pub mod identity;
pub mod profile;
pub mod record;
pub mod user_view;
pub mod validation;
