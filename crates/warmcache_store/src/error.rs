// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for store operations.

use std::borrow::Cow;

/// A specialized [`Result`] type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// An error from a [`ByteStore`][crate::ByteStore] operation.
///
/// Cloneable so that a single failed write can be handed to every caller that was waiting
/// on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The key exceeds the store's key size limit.
    #[error("key of {len} bytes exceeds the limit of {max} bytes")]
    KeyTooLarge {
        /// Length of the rejected key.
        len: usize,
        /// The store's limit.
        max: usize,
    },

    /// The value exceeds the store's per-entry size limit.
    #[error("value of {len} bytes exceeds the limit of {max} bytes")]
    ValueTooLarge {
        /// Length of the rejected value.
        len: usize,
        /// The store's limit.
        max: usize,
    },

    /// The backing storage could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(Cow<'static, str>),
}

impl StoreError {
    /// Creates an [`Unavailable`](Self::Unavailable) error.
    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Unavailable(message.into())
    }
}
