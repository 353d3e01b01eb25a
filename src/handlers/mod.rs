//! HTTP handlers. Each one extracts the caller and input, calls a single
//! service operation and serializes the result; errors render through
//! [`crate::errors::ServiceError`].

pub mod commerce;
pub mod common;
pub mod orders;
