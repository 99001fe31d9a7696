//! Root-ownership resolution over nested custody chains
//!
//! A custodied container's recorded owner is the ledger itself, so plain
//! ownership lookups stop one level up. The resolver walks the custody index
//! parent-by-parent until it leaves the ledger's own registry, bounding the
//! walk so a corrupted or adversarial chain cannot loop forever.

use cask_core::assets::{ItemId, RootOwner, MAX_NESTING_DEPTH};
use cask_core::error::CustodyError;
use cask_core::id::{AssetAddress, ContainerId};
use log::trace;

use crate::engine::CustodyLedger;

impl CustodyLedger {
    /// The container directly holding this one, if it is nested
    pub fn parent_of(&self, container: ContainerId) -> Option<ContainerId> {
        self.index.holder_of(&self.address, container.value())
    }

    /// Resolve the ultimate external owner of a container
    ///
    /// Follows custody parents upward until a container whose recorded owner
    /// is a plain external address, then returns that address under the
    /// fixed root-owner tag. Fails with `OwnershipChainTooDeep` once the walk
    /// exceeds the nesting bound.
    pub fn root_owner(&self, container: ContainerId) -> Result<RootOwner, CustodyError> {
        if !self.container_exists(container) {
            return Err(CustodyError::UnknownContainer(container));
        }
        let mut cursor = container;
        for depth in 0..=MAX_NESTING_DEPTH {
            match self.parent_of(cursor) {
                Some(parent) => {
                    trace!("root walk at depth {}: {} held by {}", depth, cursor, parent);
                    cursor = parent;
                }
                None => return Ok(RootOwner::external(self.identity.owner_of(cursor)?)),
            }
        }
        Err(CustodyError::OwnershipChainTooDeep(MAX_NESTING_DEPTH))
    }

    /// Resolve the holding container and root owner of a custodied item
    pub fn root_owner_of_item(
        &self,
        registry: &AssetAddress,
        item: ItemId,
    ) -> Result<(ContainerId, RootOwner), CustodyError> {
        let holder = self.index.holder_of(registry, item).ok_or_else(|| {
            CustodyError::Other(format!("item {} of {} is not in custody", item, registry))
        })?;
        let root = self.root_owner(holder)?;
        Ok((holder, root))
    }

    /// Reject a deposit that would make a container its own ancestor
    ///
    /// Walks the destination's ownership chain upward; encountering the child
    /// anywhere on it means the hand-off would close a custody cycle. The
    /// walk shares the resolver's depth bound, so a deposit under an
    /// already-too-deep chain is rejected as well.
    pub(crate) fn ensure_no_cycle(
        &self,
        child: ContainerId,
        destination: ContainerId,
    ) -> Result<(), CustodyError> {
        let mut cursor = destination;
        for _ in 0..=MAX_NESTING_DEPTH {
            if cursor == child {
                return Err(CustodyError::CircularCustody { child, destination });
            }
            match self.parent_of(cursor) {
                Some(parent) => cursor = parent,
                None => return Ok(()),
            }
        }
        Err(CustodyError::OwnershipChainTooDeep(MAX_NESTING_DEPTH))
    }
}
