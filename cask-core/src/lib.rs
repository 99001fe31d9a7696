pub mod assets;
pub mod error;
pub mod holdings;
pub mod id;

// Re-export the main types for convenience
pub use assets::{
    Amount, AssetKind, ItemId, RootOwner, SubId, FUNDS_RECEIVED_ACK, ITEM_RECEIVED_ACK,
    MAX_NESTING_DEPTH, ROOT_OWNER_TAG, SEMI_RECEIVED_ACK,
};
pub use error::CustodyError;
pub use holdings::{ContainerHoldings, CustodyIndex, IndexedSet};
pub use id::{AssetAddress, ContainerId};
