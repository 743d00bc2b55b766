//! Live collection synchronization.

pub mod live_collection;

pub use live_collection::{
    CollectionSnapshot, LiveCollectionSync, SnapshotChanges, SubscriptionHandle,
};
