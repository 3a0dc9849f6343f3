//! Domain Layer - Topics, connection state and subscription bookkeeping.
//!
//! Pure types with no I/O. Everything here can be exercised without a
//! runtime or a network connection.

/// Subscription topics, hub identities and wire names.
pub mod topic;

/// Transport connection states and status records.
pub mod connection;

/// Subscription registry (desired topics and their callbacks).
pub mod subscription;
