//! Core services built on the provider SPI.
//!
//! # Responsibility
//! - Run session flows and record writes against injected collaborators.
//! - Keep provider error codes behind the classifier.

pub mod reconciler;
pub mod record_service;
pub mod session;

pub use reconciler::reconcile;
pub use record_service::RecordService;
pub use session::{SessionCallback, SessionManager, SessionObserver, SessionPhase};
