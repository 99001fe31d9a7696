use crate::id::{AssetAddress, ContainerId};
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with the
/// custody ledger
#[derive(Error, Debug)]
pub enum CustodyError {
    /// Caller is neither the container owner nor an approved delegate/operator
    #[error("caller {caller} is not authorized for {container}")]
    Unauthorized {
        caller: AssetAddress,
        container: ContainerId,
    },

    /// Transfer destination is the null address or the ledger itself
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// A non-fungible item is already recorded as held by another container
    #[error("item {item} of registry {registry} is already held by {holder}")]
    DuplicateCustody {
        registry: AssetAddress,
        item: u64,
        holder: ContainerId,
    },

    /// A container does not hold the asset an operation tries to remove
    #[error("{container} does not hold item {item} of registry {registry}")]
    NotHeld {
        container: ContainerId,
        registry: AssetAddress,
        item: u64,
    },

    /// Withdrawal amount exceeds the recorded balance
    #[error("insufficient balance for registry {registry}: have {have}, want {want}")]
    InsufficientBalance {
        registry: AssetAddress,
        have: u128,
        want: u128,
    },

    /// Pull deposit attempted beyond the allowance delegated to the caller
    #[error("allowance exceeded for registry {registry}: allowed {allowed}, requested {requested}")]
    AllowanceExceeded {
        registry: AssetAddress,
        allowed: u128,
        requested: u128,
    },

    /// Auxiliary transfer data does not resolve to a valid destination container
    #[error("malformed transfer data: {0}")]
    MalformedTransferData(String),

    /// A receiver hook returned a wrong acknowledgment or refused the asset
    #[error("receiver {receiver} rejected the transfer")]
    ReceiverRejected { receiver: AssetAddress },

    /// Completing the transfer would make a container an ancestor of itself
    #[error("re-custody of {child} into {destination} would create a custody cycle")]
    CircularCustody {
        child: ContainerId,
        destination: ContainerId,
    },

    /// An ownership chain walk exceeded the maximum nesting depth
    #[error("ownership chain exceeds the maximum nesting depth of {0}")]
    OwnershipChainTooDeep(usize),

    /// Enumeration index past the end of a registry or item set
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Operation referenced a container the ledger has never registered
    #[error("unknown container {0}")]
    UnknownContainer(ContainerId),

    /// Errors surfaced by an external asset registry or the identity ledger
    #[error("registry error: {0}")]
    Registry(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic errors that don't fit in other categories
    #[error("other error: {0}")]
    Other(String),

    /// Anyhow error wrapper for error context
    #[error(transparent)]
    Context(#[from] anyhow::Error),
}

// Additional From conversions for common error types

impl From<bincode::Error> for CustodyError {
    fn from(err: bincode::Error) -> Self {
        CustodyError::Serialization(err.to_string())
    }
}

impl From<String> for CustodyError {
    fn from(err: String) -> Self {
        CustodyError::Other(err)
    }
}

impl From<&str> for CustodyError {
    fn from(err: &str) -> Self {
        CustodyError::Other(err.to_string())
    }
}
