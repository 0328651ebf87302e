//! # Error Kinds
//!
//! Typed error kinds for prefixmap. Fallible functions across the crate
//! return `eyre::Result`; the variants below are attached at the origin
//! site and stay reachable through `Report::downcast_ref::<Error>()`, so
//! callers can match on the kind while still getting full error context.
//!
//! Invariant violations detected internally (an internal node presenting a
//! bucket array, a leaf deeper than the prefix width) are not represented
//! here: they indicate corruption rather than runtime conditions and panic
//! instead.

use thiserror::Error;

/// Errors surfaced by map and store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Construction parameter failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A handle resolved to an object that no longer exists in the store.
    #[error("object #{0} not found")]
    ObjectNotFound(u64),

    /// The operation is not provided by this implementation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Optimistic validation failed at commit: another transaction wrote
    /// an object this one read. The transaction installed nothing and can
    /// be retried.
    #[error("transaction aborted: conflicting write on object #{0}")]
    TransactionConflict(u64),

    /// An object could not be serialized or rehydrated.
    #[error("codec failure: {0}")]
    Codec(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_object_id() {
        let err = Error::ObjectNotFound(17);
        assert_eq!(err.to_string(), "object #17 not found");
    }

    #[test]
    fn conflict_names_the_object() {
        let err = Error::TransactionConflict(9);
        assert!(err.to_string().contains("object #9"));
    }

    #[test]
    fn kind_survives_eyre_roundtrip() {
        fn fails() -> eyre::Result<()> {
            Err(Error::InvalidArgument("split factor 0".into()).into())
        }
        let report = fails().unwrap_err();
        assert!(matches!(
            report.downcast_ref::<Error>(),
            Some(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
