//! Leader election over the shared relational store.
//!
//! Replicas contend for named singleton duties by upserting a lease row
//! keyed by the duty name. There is no peer-to-peer traffic: the store's
//! atomic conflict resolution is the only synchronization device, so any
//! number of stateless replicas can restart independently without a
//! coordination service.
//!
//! # Components
//!
//! - [`LeaderElector`]: claim, renew, and verify leadership
//! - [`lease`]: lease row shape and claim statement
//! - [`jitter`]: randomized claim retry delays
//!
//! # Claim flow
//!
//! 1. A replica calls [`LeaderElector::try_claim`] with a duty name
//! 2. A single atomic upsert inserts, renews, or steals the lease row
//! 3. The replica is leader iff the row now carries its identity
//! 4. A leader renews within the lease timeout or loses the lease

pub mod jitter;
pub mod lease;
pub mod service;

pub use lease::LeaseRecord;
pub use service::LeaderElector;
