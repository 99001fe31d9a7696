use cask_core::assets::{Amount, ItemId, SubId};
use cask_core::error::CustodyError;
use cask_core::id::{AssetAddress, ContainerId};
use std::collections::HashMap;
use std::sync::Arc;

/// The external identity ledger for container identities
///
/// Minting, plain ownership bookkeeping, approvals and transfer execution for
/// containers themselves live outside the custody core. The protocol engine
/// calls into this trait to check authorization and to move container
/// identities when they are handed into or out of custody.
pub trait IdentityLedger {
    /// Mint a new container identity for an owner
    fn mint(&self, owner: AssetAddress) -> Result<ContainerId, CustodyError>;

    /// The recorded owner of a container
    ///
    /// While a container is custodied by the ledger, this is the custody
    /// ledger's own address; the real owner is found through root-ownership
    /// resolution.
    fn owner_of(&self, container: ContainerId) -> Result<AssetAddress, CustodyError>;

    /// Whether a caller is the owner, the approved delegate, or an approved
    /// operator of the owner
    fn is_approved_or_owner(
        &self,
        caller: AssetAddress,
        container: ContainerId,
    ) -> Result<bool, CustodyError>;

    /// Execute an ownership transfer of the container identity
    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        container: ContainerId,
    ) -> Result<(), CustodyError>;

    /// Set the single approved delegate for a container
    fn approve(
        &self,
        owner: AssetAddress,
        delegate: AssetAddress,
        container: ContainerId,
    ) -> Result<(), CustodyError>;

    /// Grant or revoke operator status over all of an owner's containers
    fn set_operator(
        &self,
        owner: AssetAddress,
        operator: AssetAddress,
        approved: bool,
    ) -> Result<(), CustodyError>;
}

/// An external non-fungible asset registry
pub trait ItemRegistry {
    /// Current owner of an item according to the registry's own ledger
    fn owner_of(&self, item: ItemId) -> Result<AssetAddress, CustodyError>;

    /// Whether an operator may move the item on the owner's behalf
    fn is_approved(
        &self,
        owner: AssetAddress,
        operator: AssetAddress,
        item: ItemId,
    ) -> Result<bool, CustodyError>;

    /// Transfer an item out of the caller's own balance
    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError>;

    /// Transfer an item using a previously granted approval
    fn transfer_from(
        &self,
        operator: AssetAddress,
        from: AssetAddress,
        to: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError>;
}

/// An external fungible asset registry
pub trait FundsRegistry {
    /// Balance recorded by the registry for a holder
    fn balance_of(&self, holder: AssetAddress) -> Result<Amount, CustodyError>;

    /// Remaining allowance an owner has delegated to a spender
    fn allowance(&self, owner: AssetAddress, spender: AssetAddress)
        -> Result<Amount, CustodyError>;

    /// Transfer units out of the caller's own balance
    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError>;

    /// Transfer units using a previously granted allowance
    fn transfer_from(
        &self,
        spender: AssetAddress,
        owner: AssetAddress,
        to: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError>;
}

/// An external semi-fungible asset registry
pub trait SemiRegistry {
    /// Balance recorded by the registry for a (holder, sub-id) pair
    fn balance_of(&self, holder: AssetAddress, sub_id: SubId) -> Result<Amount, CustodyError>;

    /// Whether an operator may move any of the owner's balances
    fn is_approved_for_all(
        &self,
        owner: AssetAddress,
        operator: AssetAddress,
    ) -> Result<bool, CustodyError>;

    /// Transfer units out of the caller's own balance
    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError>;

    /// Transfer units using operator approval
    fn transfer_from(
        &self,
        operator: AssetAddress,
        from: AssetAddress,
        to: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError>;
}

/// Receiver hooks exposed by contract addresses that accept custody hand-offs
///
/// When the protocol engine deposits an asset into an address registered as a
/// receiver, it invokes the matching hook and verifies that the returned
/// 4-byte acknowledgment equals the fixed per-kind discriminator. A wrong
/// acknowledgment aborts and rolls back the whole transfer.
pub trait AssetReceiver {
    fn on_item_received(
        &self,
        registry: AssetAddress,
        from: AssetAddress,
        item: ItemId,
        data: &[u8],
    ) -> Result<[u8; 4], CustodyError>;

    fn on_funds_received(
        &self,
        registry: AssetAddress,
        from: AssetAddress,
        amount: Amount,
        data: &[u8],
    ) -> Result<[u8; 4], CustodyError>;

    fn on_semi_received(
        &self,
        registry: AssetAddress,
        from: AssetAddress,
        sub_id: SubId,
        amount: Amount,
        data: &[u8],
    ) -> Result<[u8; 4], CustodyError>;
}

/// Directory of external collaborators keyed by address
///
/// The engine looks registries up here when it needs to execute an outgoing
/// transfer or verify incoming custody, and looks destinations up to decide
/// whether a receiver hook must be invoked.
#[derive(Default, Clone)]
pub struct RegistryDirectory {
    items: HashMap<AssetAddress, Arc<dyn ItemRegistry>>,
    funds: HashMap<AssetAddress, Arc<dyn FundsRegistry>>,
    semi: HashMap<AssetAddress, Arc<dyn SemiRegistry>>,
    receivers: HashMap<AssetAddress, Arc<dyn AssetReceiver>>,
}

impl RegistryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_item_registry(&mut self, address: AssetAddress, registry: Arc<dyn ItemRegistry>) {
        self.items.insert(address, registry);
    }

    pub fn register_funds_registry(
        &mut self,
        address: AssetAddress,
        registry: Arc<dyn FundsRegistry>,
    ) {
        self.funds.insert(address, registry);
    }

    pub fn register_semi_registry(&mut self, address: AssetAddress, registry: Arc<dyn SemiRegistry>) {
        self.semi.insert(address, registry);
    }

    pub fn register_receiver(&mut self, address: AssetAddress, receiver: Arc<dyn AssetReceiver>) {
        self.receivers.insert(address, receiver);
    }

    pub fn item_registry(
        &self,
        address: &AssetAddress,
    ) -> Result<&Arc<dyn ItemRegistry>, CustodyError> {
        self.items
            .get(address)
            .ok_or_else(|| CustodyError::Registry(format!("unknown item registry {}", address)))
    }

    pub fn funds_registry(
        &self,
        address: &AssetAddress,
    ) -> Result<&Arc<dyn FundsRegistry>, CustodyError> {
        self.funds
            .get(address)
            .ok_or_else(|| CustodyError::Registry(format!("unknown funds registry {}", address)))
    }

    pub fn semi_registry(
        &self,
        address: &AssetAddress,
    ) -> Result<&Arc<dyn SemiRegistry>, CustodyError> {
        self.semi
            .get(address)
            .ok_or_else(|| CustodyError::Registry(format!("unknown semi registry {}", address)))
    }

    /// Receiver hook for a destination address, if one is registered
    pub fn receiver(&self, address: &AssetAddress) -> Option<&Arc<dyn AssetReceiver>> {
        self.receivers.get(address)
    }

    /// Whether an item registry is known to the directory
    pub fn has_item_registry(&self, address: &AssetAddress) -> bool {
        self.items.contains_key(address)
    }
}
