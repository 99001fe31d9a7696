use crate::id::AssetAddress;
use serde::{Deserialize, Serialize};

/// Numeric item identifier within a non-fungible registry
pub type ItemId = u64;

/// Sub-id within a semi-fungible registry
pub type SubId = u64;

/// Balance amount for fungible and semi-fungible assets
pub type Amount = u128;

/// Maximum depth of nested custody relationships
///
/// Every ownership-chain walk (root-owner resolution, cycle prevention) is
/// bounded by this constant so that corrupted state terminates with an error
/// instead of exhausting resources.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Discriminator prepended to root-owner query results so callers can tell a
/// custody-aware resolution apart from a plain external address
pub const ROOT_OWNER_TAG: [u8; 4] = [0xcd, 0x74, 0x0d, 0xb5];

/// Acknowledgment returned by a non-fungible receiver hook on success
pub const ITEM_RECEIVED_ACK: [u8; 4] = [0x15, 0x0b, 0x7a, 0x02];

/// Acknowledgment returned by a fungible receiver hook on success
pub const FUNDS_RECEIVED_ACK: [u8; 4] = [0x6e, 0x2c, 0x94, 0x1d];

/// Acknowledgment returned by a semi-fungible receiver hook on success
pub const SEMI_RECEIVED_ACK: [u8; 4] = [0xf2, 0x3a, 0x6e, 0x61];

/// The three asset categories the custody index tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    /// Unique items identified by an item id within their registry
    NonFungible,
    /// Interchangeable units tracked as a single balance per registry
    Fungible,
    /// Balances tracked per (registry, sub-id) pair
    SemiFungible,
}

impl AssetKind {
    /// Short label used in log lines
    pub fn label(&self) -> &'static str {
        match self {
            AssetKind::NonFungible => "non-fungible",
            AssetKind::Fungible => "fungible",
            AssetKind::SemiFungible => "semi-fungible",
        }
    }
}

/// The ultimate external owner found by resolving a chain of nested custody
/// relationships
///
/// The tag is a fixed discriminator (`ROOT_OWNER_TAG`) asserting that the
/// address was produced by custody-aware resolution rather than read off a
/// plain ownership record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootOwner {
    pub tag: [u8; 4],
    pub address: AssetAddress,
}

impl RootOwner {
    /// Tag an external address as a resolved root owner
    pub fn external(address: AssetAddress) -> Self {
        Self {
            tag: ROOT_OWNER_TAG,
            address,
        }
    }

    /// Check that the discriminator is the expected fixed value
    pub fn is_tagged(&self) -> bool {
        self.tag == ROOT_OWNER_TAG
    }
}
