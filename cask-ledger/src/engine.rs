use cask_core::assets::{
    Amount, AssetKind, ItemId, SubId, FUNDS_RECEIVED_ACK, ITEM_RECEIVED_ACK, SEMI_RECEIVED_ACK,
};
use cask_core::error::CustodyError;
use cask_core::holdings::{ContainerHoldings, CustodyIndex};
use cask_core::id::{AssetAddress, ContainerId};
use cask_proofs::commitment::{
    CommitmentEngine, CommitmentEvent, CommitmentHash, CommitmentPayload, CommitmentRecord,
    EventTag, VerificationResult,
};
use log::{debug, info};
use std::sync::Arc;

use crate::registry::{IdentityLedger, RegistryDirectory};

/// Pre-operation snapshot of everything a single transfer may touch
///
/// Captured before local effects are applied so that a failing external call
/// (registry transfer or receiver hook) leaves no partial state behind. The
/// before-image covers the container's holdings, the one reverse-map entry a
/// non-fungible transfer touches, and the commitment chain position.
struct Checkpoint {
    container: ContainerId,
    holdings: ContainerHoldings,
    reverse: Option<(AssetAddress, ItemId, Option<ContainerId>)>,
    commitment: Option<(CommitmentHash, usize)>,
}

/// The transfer protocol engine and custody ledger
///
/// Owns the custody index and the commitment engine, and talks to the external
/// identity ledger and asset registries through the directory. Every operation
/// is a single atomic state transition: all local index/commitment mutations
/// are committed before any external call is made, so a reentrant callback
/// observes a consistent, already-updated state, and any external failure
/// restores the pre-operation snapshot.
pub struct CustodyLedger {
    /// The ledger's own address, used as the custody holder towards external
    /// registries and as the registry address for container-as-child records
    pub(crate) address: AssetAddress,
    pub(crate) identity: Arc<dyn IdentityLedger>,
    pub(crate) registries: RegistryDirectory,
    pub(crate) index: CustodyIndex,
    pub(crate) commitments: CommitmentEngine,
}

impl CustodyLedger {
    pub fn new(
        address: AssetAddress,
        identity: Arc<dyn IdentityLedger>,
        registries: RegistryDirectory,
    ) -> Self {
        Self {
            address,
            identity,
            registries,
            index: CustodyIndex::new(),
            commitments: CommitmentEngine::new(),
        }
    }

    /// The ledger's own address
    pub fn address(&self) -> AssetAddress {
        self.address
    }

    /// Mint a container through the identity ledger and seed its commitment
    pub fn mint_container(&mut self, owner: AssetAddress) -> Result<ContainerId, CustodyError> {
        let container = self.identity.mint(owner)?;
        let hash = self.commitments.register(&self.address, container)?;
        info!("minted {} for {} with genesis {}", container, owner, hash);
        Ok(container)
    }

    /// Seed the commitment genesis for a container minted out-of-band
    pub fn register_container(
        &mut self,
        container: ContainerId,
    ) -> Result<CommitmentHash, CustodyError> {
        // The identity ledger must already know the container
        self.identity.owner_of(container)?;
        self.commitments.register(&self.address, container)
    }

    /// Whether the ledger has a registered commitment for a container
    pub fn container_exists(&self, container: ContainerId) -> bool {
        self.commitments.is_registered(container)
    }

    // ---- Read-only query surface ----

    pub fn registry_count(&self, container: ContainerId, kind: AssetKind) -> usize {
        self.index.registry_count(container, kind)
    }

    pub fn registry_at(
        &self,
        container: ContainerId,
        kind: AssetKind,
        index: usize,
    ) -> Result<AssetAddress, CustodyError> {
        self.index.registry_at(container, kind, index)
    }

    pub fn item_count(&self, container: ContainerId, registry: &AssetAddress) -> usize {
        self.index.item_count(container, registry)
    }

    pub fn item_at(
        &self,
        container: ContainerId,
        registry: &AssetAddress,
        index: usize,
    ) -> Result<ItemId, CustodyError> {
        self.index.item_at(container, registry, index)
    }

    pub fn holds(&self, container: ContainerId, registry: &AssetAddress, item: ItemId) -> bool {
        self.index.holds(container, registry, item)
    }

    pub fn holder_of(&self, registry: &AssetAddress, item: ItemId) -> Option<ContainerId> {
        self.index.holder_of(registry, item)
    }

    pub fn funds_balance(&self, container: ContainerId, registry: &AssetAddress) -> Amount {
        self.index.funds_balance(container, registry)
    }

    pub fn semi_balance(
        &self,
        container: ContainerId,
        registry: &AssetAddress,
        sub_id: SubId,
    ) -> Amount {
        self.index.semi_balance(container, registry, sub_id)
    }

    /// The container's current commitment hash
    pub fn commitment(&self, container: ContainerId) -> Result<CommitmentHash, CustodyError> {
        self.commitments
            .current_hash(container)
            .ok_or(CustodyError::UnknownContainer(container))
    }

    /// The container's journaled mutation history for external auditors
    pub fn history(&self, container: ContainerId) -> Vec<CommitmentRecord> {
        self.commitments.history(container)
    }

    /// Replay the journaled history against the genesis and current hash
    pub fn audit(&self, container: ContainerId) -> VerificationResult {
        let expected = self.commitments.current_hash(container);
        CommitmentEngine::verify_history(
            &self.address,
            container,
            &self.commitments.history(container),
            expected,
        )
    }

    // ---- Push deposits (receiver hooks exposed to registries) ----

    /// Non-fungible receiver hook: a registry notifies the ledger that an item
    /// arrived, with auxiliary data naming the destination container
    pub fn on_item_received(
        &mut self,
        registry: AssetAddress,
        from: AssetAddress,
        item: ItemId,
        data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        let destination = self.decode_destination(data)?;
        self.verify_incoming_item(registry, item)?;

        let payload = self.incoming_item_payload(registry, item, destination)?;
        self.index.record_item_deposit(destination, registry, item)?;
        self.commitments.record(
            destination,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload,
            },
        )?;
        debug!(
            "push deposit: item {} of {} from {} into {}",
            item, registry, from, destination
        );
        Ok(ITEM_RECEIVED_ACK)
    }

    /// Fungible receiver hook
    pub fn on_funds_received(
        &mut self,
        registry: AssetAddress,
        from: AssetAddress,
        amount: Amount,
        data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        let destination = self.decode_destination(data)?;
        if amount == 0 {
            return Ok(FUNDS_RECEIVED_ACK);
        }
        let balance = self.index.record_funds_deposit(destination, registry, amount);
        self.commitments.record(
            destination,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload: CommitmentPayload::Balance(balance),
            },
        )?;
        debug!(
            "push deposit: {} units of {} from {} into {}, balance {}",
            amount, registry, from, destination, balance
        );
        Ok(FUNDS_RECEIVED_ACK)
    }

    /// Semi-fungible receiver hook
    pub fn on_semi_received(
        &mut self,
        registry: AssetAddress,
        from: AssetAddress,
        sub_id: SubId,
        amount: Amount,
        data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        let destination = self.decode_destination(data)?;
        if amount == 0 {
            return Ok(SEMI_RECEIVED_ACK);
        }
        let balance = self
            .index
            .record_semi_deposit(destination, registry, sub_id, amount);
        self.commitments.record(
            destination,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload: CommitmentPayload::SubBalance {
                    sub_id,
                    balance,
                },
            },
        )?;
        debug!(
            "push deposit: {} units of {}/{} from {} into {}",
            amount, registry, sub_id, from, destination
        );
        Ok(SEMI_RECEIVED_ACK)
    }

    // ---- Pull deposits (container-initiated, using prior allowances) ----

    /// Pull a non-fungible item into a container using a prior approval
    pub fn pull_item(
        &mut self,
        caller: AssetAddress,
        from: AssetAddress,
        container: ContainerId,
        registry: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError> {
        if !self.container_exists(container) {
            return Err(CustodyError::UnknownContainer(container));
        }
        if caller != from && !self.incoming_item_approved(registry, from, caller, item)? {
            return Err(CustodyError::AllowanceExceeded {
                registry,
                allowed: 0,
                requested: 1,
            });
        }
        let payload = self.incoming_item_payload(registry, item, container)?;

        let checkpoint = self.checkpoint(container, Some((registry, item)));
        self.index.record_item_deposit(container, registry, item)?;
        self.commitments.record(
            container,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload,
            },
        )?;

        // External transfer-in happens after local effects; roll back if the
        // registry refuses the hand-off.
        let transferred = if registry == self.address {
            self.identity
                .transfer(from, self.address, ContainerId::new(item))
        } else {
            match self.registries.item_registry(&registry) {
                Ok(external) => external.transfer_from(self.address, from, self.address, item),
                Err(e) => Err(e),
            }
        };
        if let Err(e) = transferred {
            self.restore(checkpoint);
            return Err(e);
        }
        debug!(
            "pull deposit: item {} of {} from {} into {}",
            item, registry, from, container
        );
        Ok(())
    }

    /// Pull fungible units into a container using a prior allowance
    pub fn pull_funds(
        &mut self,
        caller: AssetAddress,
        from: AssetAddress,
        container: ContainerId,
        registry: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        if !self.container_exists(container) {
            return Err(CustodyError::UnknownContainer(container));
        }
        if amount == 0 {
            return Ok(());
        }
        let external = self.registries.funds_registry(&registry)?.clone();
        if caller != from {
            let allowed = external.allowance(from, caller)?;
            if allowed < amount {
                return Err(CustodyError::AllowanceExceeded {
                    registry,
                    allowed,
                    requested: amount,
                });
            }
        }

        let checkpoint = self.checkpoint(container, None);
        let balance = self.index.record_funds_deposit(container, registry, amount);
        self.commitments.record(
            container,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload: CommitmentPayload::Balance(balance),
            },
        )?;

        if let Err(e) = external.transfer_from(self.address, from, self.address, amount) {
            self.restore(checkpoint);
            return Err(e);
        }
        debug!(
            "pull deposit: {} units of {} from {} into {}, balance {}",
            amount, registry, from, container, balance
        );
        Ok(())
    }

    /// Pull semi-fungible units into a container using operator approval
    pub fn pull_semi(
        &mut self,
        caller: AssetAddress,
        from: AssetAddress,
        container: ContainerId,
        registry: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        if !self.container_exists(container) {
            return Err(CustodyError::UnknownContainer(container));
        }
        if amount == 0 {
            return Ok(());
        }
        let external = self.registries.semi_registry(&registry)?.clone();
        if caller != from && !external.is_approved_for_all(from, caller)? {
            return Err(CustodyError::AllowanceExceeded {
                registry,
                allowed: 0,
                requested: amount,
            });
        }

        let checkpoint = self.checkpoint(container, None);
        let balance = self
            .index
            .record_semi_deposit(container, registry, sub_id, amount);
        self.commitments.record(
            container,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload: CommitmentPayload::SubBalance { sub_id, balance },
            },
        )?;

        if let Err(e) = external.transfer_from(self.address, from, self.address, sub_id, amount) {
            self.restore(checkpoint);
            return Err(e);
        }
        debug!(
            "pull deposit: {} units of {}/{} from {} into {}",
            amount, registry, sub_id, from, container
        );
        Ok(())
    }

    // ---- Withdrawals ----

    /// Move a held non-fungible item out to an external address
    pub fn withdraw_item(
        &mut self,
        caller: AssetAddress,
        container: ContainerId,
        to: AssetAddress,
        registry: AssetAddress,
        item: ItemId,
        data: &[u8],
    ) -> Result<(), CustodyError> {
        self.authorize(caller, container)?;
        self.check_destination(&to)?;
        if !self.index.holds(container, &registry, item) {
            return Err(CustodyError::NotHeld {
                container,
                registry,
                item,
            });
        }
        let payload = self.held_item_payload(registry, item)?;

        let checkpoint = self.checkpoint(container, Some((registry, item)));
        self.index.record_item_withdrawal(container, registry, item)?;
        self.commitments.record(
            container,
            CommitmentEvent {
                tag: EventTag::Withdraw,
                registry,
                payload,
            },
        )?;

        if let Err(e) = self.finish_item_withdrawal(to, registry, item, data) {
            self.restore(checkpoint);
            return Err(e);
        }
        debug!(
            "withdrawal: item {} of {} from {} to {}",
            item, registry, container, to
        );
        Ok(())
    }

    /// Move fungible units out to an external address
    pub fn withdraw_funds(
        &mut self,
        caller: AssetAddress,
        container: ContainerId,
        to: AssetAddress,
        registry: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        self.authorize(caller, container)?;
        self.check_destination(&to)?;
        if amount == 0 {
            return Ok(());
        }

        let checkpoint = self.checkpoint(container, None);
        let balance = self
            .index
            .record_funds_withdrawal(container, registry, amount)?;
        self.commitments.record(
            container,
            CommitmentEvent {
                tag: EventTag::Withdraw,
                registry,
                payload: CommitmentPayload::Balance(balance),
            },
        )?;

        if let Err(e) = self.finish_funds_withdrawal(to, registry, amount) {
            self.restore(checkpoint);
            return Err(e);
        }
        debug!(
            "withdrawal: {} units of {} from {} to {}, balance {}",
            amount, registry, container, to, balance
        );
        Ok(())
    }

    /// Move semi-fungible units out to an external address
    pub fn withdraw_semi(
        &mut self,
        caller: AssetAddress,
        container: ContainerId,
        to: AssetAddress,
        registry: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        self.authorize(caller, container)?;
        self.check_destination(&to)?;
        if amount == 0 {
            return Ok(());
        }

        let checkpoint = self.checkpoint(container, None);
        let balance = self
            .index
            .record_semi_withdrawal(container, registry, sub_id, amount)?;
        self.commitments.record(
            container,
            CommitmentEvent {
                tag: EventTag::Withdraw,
                registry,
                payload: CommitmentPayload::SubBalance { sub_id, balance },
            },
        )?;

        if let Err(e) = self.finish_semi_withdrawal(to, registry, sub_id, amount) {
            self.restore(checkpoint);
            return Err(e);
        }
        debug!(
            "withdrawal: {} units of {}/{} from {} to {}",
            amount, registry, sub_id, container, to
        );
        Ok(())
    }

    // ---- Container-to-container re-custody ----

    /// Hand a held non-fungible item from one container to another
    ///
    /// Combines withdrawal and deposit as one atomic step; when the item is
    /// itself a container, the bounded ancestor walk over the destination's
    /// ownership chain rejects custody cycles before anything changes.
    pub fn recustody_item(
        &mut self,
        caller: AssetAddress,
        from_container: ContainerId,
        to_container: ContainerId,
        registry: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError> {
        self.authorize(caller, from_container)?;
        if !self.container_exists(to_container) {
            return Err(CustodyError::UnknownContainer(to_container));
        }
        if from_container == to_container {
            return Err(CustodyError::InvalidDestination(format!(
                "{} cannot re-custody into itself",
                from_container
            )));
        }
        if !self.index.holds(from_container, &registry, item) {
            return Err(CustodyError::NotHeld {
                container: from_container,
                registry,
                item,
            });
        }
        if registry == self.address {
            self.ensure_no_cycle(ContainerId::new(item), to_container)?;
        }
        let payload = self.held_item_payload(registry, item)?;

        // Both sides are local: fully validated above, no external leg
        self.index
            .record_item_withdrawal(from_container, registry, item)?;
        self.commitments.record(
            from_container,
            CommitmentEvent {
                tag: EventTag::Withdraw,
                registry,
                payload,
            },
        )?;
        self.index
            .record_item_deposit(to_container, registry, item)?;
        self.commitments.record(
            to_container,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload,
            },
        )?;
        debug!(
            "re-custody: item {} of {} from {} to {}",
            item, registry, from_container, to_container
        );
        Ok(())
    }

    /// Move fungible units between two containers
    pub fn recustody_funds(
        &mut self,
        caller: AssetAddress,
        from_container: ContainerId,
        to_container: ContainerId,
        registry: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        self.authorize(caller, from_container)?;
        if !self.container_exists(to_container) {
            return Err(CustodyError::UnknownContainer(to_container));
        }
        if from_container == to_container {
            return Err(CustodyError::InvalidDestination(format!(
                "{} cannot re-custody into itself",
                from_container
            )));
        }
        if amount == 0 {
            return Ok(());
        }

        let source_balance = self
            .index
            .record_funds_withdrawal(from_container, registry, amount)?;
        self.commitments.record(
            from_container,
            CommitmentEvent {
                tag: EventTag::Withdraw,
                registry,
                payload: CommitmentPayload::Balance(source_balance),
            },
        )?;
        let destination_balance = self
            .index
            .record_funds_deposit(to_container, registry, amount);
        self.commitments.record(
            to_container,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload: CommitmentPayload::Balance(destination_balance),
            },
        )?;
        debug!(
            "re-custody: {} units of {} from {} to {}",
            amount, registry, from_container, to_container
        );
        Ok(())
    }

    /// Move semi-fungible units between two containers
    pub fn recustody_semi(
        &mut self,
        caller: AssetAddress,
        from_container: ContainerId,
        to_container: ContainerId,
        registry: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        self.authorize(caller, from_container)?;
        if !self.container_exists(to_container) {
            return Err(CustodyError::UnknownContainer(to_container));
        }
        if from_container == to_container {
            return Err(CustodyError::InvalidDestination(format!(
                "{} cannot re-custody into itself",
                from_container
            )));
        }
        if amount == 0 {
            return Ok(());
        }

        let source_balance =
            self.index
                .record_semi_withdrawal(from_container, registry, sub_id, amount)?;
        self.commitments.record(
            from_container,
            CommitmentEvent {
                tag: EventTag::Withdraw,
                registry,
                payload: CommitmentPayload::SubBalance {
                    sub_id,
                    balance: source_balance,
                },
            },
        )?;
        let destination_balance =
            self.index
                .record_semi_deposit(to_container, registry, sub_id, amount);
        self.commitments.record(
            to_container,
            CommitmentEvent {
                tag: EventTag::Deposit,
                registry,
                payload: CommitmentPayload::SubBalance {
                    sub_id,
                    balance: destination_balance,
                },
            },
        )?;
        debug!(
            "re-custody: {} units of {}/{} from {} to {}",
            amount, registry, sub_id, from_container, to_container
        );
        Ok(())
    }

    // ---- Internal helpers ----

    /// Resolve auxiliary transfer data to a registered destination container
    fn decode_destination(&self, data: &[u8]) -> Result<ContainerId, CustodyError> {
        let destination = ContainerId::from_transfer_data(data).ok_or_else(|| {
            CustodyError::MalformedTransferData(format!(
                "expected 8 bytes of auxiliary data, got {}",
                data.len()
            ))
        })?;
        if !self.container_exists(destination) {
            return Err(CustodyError::MalformedTransferData(format!(
                "auxiliary data names unregistered {}",
                destination
            )));
        }
        Ok(destination)
    }

    /// Reject the null address and the ledger itself as withdrawal targets
    fn check_destination(&self, to: &AssetAddress) -> Result<(), CustodyError> {
        if to.is_zero() {
            return Err(CustodyError::InvalidDestination(
                "null destination address".to_string(),
            ));
        }
        if *to == self.address {
            return Err(CustodyError::InvalidDestination(
                "destination is the custody ledger itself".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that the caller may act for a container
    ///
    /// Authorized callers are the recorded owner, the approved delegate, an
    /// approved operator of the owner, or the resolved root owner when the
    /// container is nested (its recorded owner is then the ledger itself).
    fn authorize(
        &self,
        caller: AssetAddress,
        container: ContainerId,
    ) -> Result<(), CustodyError> {
        if !self.container_exists(container) {
            return Err(CustodyError::UnknownContainer(container));
        }
        if self.identity.is_approved_or_owner(caller, container)? {
            return Ok(());
        }
        if self.root_owner(container)?.address == caller {
            return Ok(());
        }
        Err(CustodyError::Unauthorized { caller, container })
    }

    /// Validation for an incoming non-fungible item
    ///
    /// When the registry is known, the ledger must already be the recorded
    /// owner (the external transfer precedes the notification); for
    /// container-as-child, the identity ledger plays that role.
    fn verify_incoming_item(
        &self,
        registry: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError> {
        let recorded = if registry == self.address {
            Some(self.identity.owner_of(ContainerId::new(item))?)
        } else if self.registries.has_item_registry(&registry) {
            Some(self.registries.item_registry(&registry)?.owner_of(item)?)
        } else {
            None
        };
        match recorded {
            Some(owner) if owner != self.address => Err(CustodyError::Registry(format!(
                "item {} of {} is not held by the ledger",
                item, registry
            ))),
            _ => Ok(()),
        }
    }

    /// Commitment payload for an item entering custody
    ///
    /// A container-as-child folds its current commitment; cycle prevention
    /// runs here because every incoming path goes through this payload.
    fn incoming_item_payload(
        &self,
        registry: AssetAddress,
        item: ItemId,
        destination: ContainerId,
    ) -> Result<CommitmentPayload, CustodyError> {
        if registry != self.address {
            return Ok(CommitmentPayload::Item(item));
        }
        let child = ContainerId::new(item);
        let commitment = self
            .commitments
            .current_hash(child)
            .ok_or(CustodyError::UnknownContainer(child))?;
        self.ensure_no_cycle(child, destination)?;
        Ok(CommitmentPayload::ChildContainer { child, commitment })
    }

    /// Commitment payload for an item leaving custody
    fn held_item_payload(
        &self,
        registry: AssetAddress,
        item: ItemId,
    ) -> Result<CommitmentPayload, CustodyError> {
        if registry != self.address {
            return Ok(CommitmentPayload::Item(item));
        }
        let child = ContainerId::new(item);
        let commitment = self
            .commitments
            .current_hash(child)
            .ok_or(CustodyError::UnknownContainer(child))?;
        Ok(CommitmentPayload::ChildContainer { child, commitment })
    }

    /// Whether a pull caller holds an approval for an incoming item
    fn incoming_item_approved(
        &self,
        registry: AssetAddress,
        from: AssetAddress,
        caller: AssetAddress,
        item: ItemId,
    ) -> Result<bool, CustodyError> {
        if registry == self.address {
            self.identity
                .is_approved_or_owner(caller, ContainerId::new(item))
        } else {
            self.registries
                .item_registry(&registry)?
                .is_approved(from, caller, item)
        }
    }

    /// External leg of an item withdrawal: receiver hook, then transfer-out
    ///
    /// The hook runs before the registry transfer so a rejecting receiver
    /// aborts while no external state has moved yet.
    fn finish_item_withdrawal(
        &self,
        to: AssetAddress,
        registry: AssetAddress,
        item: ItemId,
        data: &[u8],
    ) -> Result<(), CustodyError> {
        if let Some(receiver) = self.registries.receiver(&to) {
            let ack = receiver.on_item_received(registry, self.address, item, data)?;
            if ack != ITEM_RECEIVED_ACK {
                return Err(CustodyError::ReceiverRejected { receiver: to });
            }
        }
        if registry == self.address {
            self.identity
                .transfer(self.address, to, ContainerId::new(item))
        } else {
            self.registries
                .item_registry(&registry)?
                .transfer(self.address, to, item)
        }
    }

    /// External leg of a fungible withdrawal
    fn finish_funds_withdrawal(
        &self,
        to: AssetAddress,
        registry: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        if let Some(receiver) = self.registries.receiver(&to) {
            let ack = receiver.on_funds_received(registry, self.address, amount, &[])?;
            if ack != FUNDS_RECEIVED_ACK {
                return Err(CustodyError::ReceiverRejected { receiver: to });
            }
        }
        self.registries
            .funds_registry(&registry)?
            .transfer(self.address, to, amount)
    }

    /// External leg of a semi-fungible withdrawal
    fn finish_semi_withdrawal(
        &self,
        to: AssetAddress,
        registry: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        if let Some(receiver) = self.registries.receiver(&to) {
            let ack = receiver.on_semi_received(registry, self.address, sub_id, amount, &[])?;
            if ack != SEMI_RECEIVED_ACK {
                return Err(CustodyError::ReceiverRejected { receiver: to });
            }
        }
        self.registries
            .semi_registry(&registry)?
            .transfer(self.address, to, sub_id, amount)
    }

    fn checkpoint(
        &self,
        container: ContainerId,
        touched_item: Option<(AssetAddress, ItemId)>,
    ) -> Checkpoint {
        Checkpoint {
            container,
            holdings: self.index.holdings_of(container),
            reverse: touched_item
                .map(|(registry, item)| (registry, item, self.index.reverse_entry(&registry, item))),
            commitment: self.commitments.state(container),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.index
            .set_holdings(checkpoint.container, checkpoint.holdings);
        if let Some((registry, item, holder)) = checkpoint.reverse {
            self.index.set_reverse_entry(registry, item, holder);
        }
        if let Some((hash, journal_len)) = checkpoint.commitment {
            self.commitments
                .restore(checkpoint.container, hash, journal_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_registries::{
        AcceptingReceiver, InMemoryFundsRegistry, InMemoryIdentityLedger, InMemoryItemRegistry,
        InMemorySemiRegistry, RejectingReceiver,
    };
    use crate::registry::{FundsRegistry, ItemRegistry, SemiRegistry};
    use cask_core::assets::MAX_NESTING_DEPTH;

    fn alice() -> AssetAddress {
        AssetAddress::new([1; 32])
    }

    fn bob() -> AssetAddress {
        AssetAddress::new([2; 32])
    }

    fn carol() -> AssetAddress {
        AssetAddress::new([3; 32])
    }

    struct Harness {
        ledger: CustodyLedger,
        identity: Arc<InMemoryIdentityLedger>,
        items: Arc<InMemoryItemRegistry>,
        items_addr: AssetAddress,
        funds: Arc<InMemoryFundsRegistry>,
        funds_addr: AssetAddress,
        semi: Arc<InMemorySemiRegistry>,
        semi_addr: AssetAddress,
    }

    fn harness() -> Harness {
        let address = AssetAddress::new([0xee; 32]);
        let identity = Arc::new(InMemoryIdentityLedger::new());
        let items = Arc::new(InMemoryItemRegistry::new());
        let funds = Arc::new(InMemoryFundsRegistry::new());
        let semi = Arc::new(InMemorySemiRegistry::new());
        let items_addr = AssetAddress::new([0xaa; 32]);
        let funds_addr = AssetAddress::new([0xbb; 32]);
        let semi_addr = AssetAddress::new([0xcc; 32]);

        let mut directory = RegistryDirectory::new();
        directory.register_item_registry(items_addr, items.clone());
        directory.register_funds_registry(funds_addr, funds.clone());
        directory.register_semi_registry(semi_addr, semi.clone());

        Harness {
            ledger: CustodyLedger::new(address, identity.clone(), directory),
            identity,
            items,
            items_addr,
            funds,
            funds_addr,
            semi,
            semi_addr,
        }
    }

    /// Hand a container into custody of another: the identity transfer a
    /// registry would perform, followed by the receiver notification
    fn nest(h: &mut Harness, child: ContainerId, parent: ContainerId, owner: AssetAddress) {
        let ledger = h.ledger.address();
        h.identity.transfer(owner, ledger, child).unwrap();
        let ack = h
            .ledger
            .on_item_received(ledger, owner, child.value(), &parent.to_be_bytes())
            .unwrap();
        assert_eq!(ack, ITEM_RECEIVED_ACK);
    }

    #[test]
    fn test_mint_and_register() {
        let mut h = harness();
        let first = h.ledger.mint_container(alice()).unwrap();
        let second = h.ledger.mint_container(bob()).unwrap();
        assert_ne!(first, second);
        assert!(h.ledger.container_exists(first));
        assert_eq!(h.identity.owner_of(first).unwrap(), alice());

        // A container minted out-of-band can be registered afterwards
        let external = h.identity.mint(carol()).unwrap();
        assert!(!h.ledger.container_exists(external));
        h.ledger.register_container(external).unwrap();
        assert!(h.ledger.container_exists(external));

        // But not twice, and not when the identity ledger has never seen it
        assert!(h.ledger.register_container(external).is_err());
        assert!(matches!(
            h.ledger.register_container(ContainerId::new(999)),
            Err(CustodyError::UnknownContainer(_))
        ));
    }

    #[test]
    fn test_push_item_deposit_and_enumeration() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        let genesis = h.ledger.commitment(container).unwrap();

        h.items.mint(h.ledger.address(), 7);
        let ack = h
            .ledger
            .on_item_received(h.items_addr, alice(), 7, &container.to_be_bytes())
            .unwrap();
        assert_eq!(ack, ITEM_RECEIVED_ACK);

        assert!(h.ledger.holds(container, &h.items_addr, 7));
        assert_eq!(h.ledger.holder_of(&h.items_addr, 7), Some(container));
        assert_eq!(h.ledger.registry_count(container, AssetKind::NonFungible), 1);
        assert_eq!(
            h.ledger
                .registry_at(container, AssetKind::NonFungible, 0)
                .unwrap(),
            h.items_addr
        );
        assert_eq!(h.ledger.item_count(container, &h.items_addr), 1);
        assert_eq!(h.ledger.item_at(container, &h.items_addr, 0).unwrap(), 7);

        assert_ne!(h.ledger.commitment(container).unwrap(), genesis);
        let history = h.ledger.history(container);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event.payload, CommitmentPayload::Item(7));
        assert_eq!(h.ledger.audit(container), VerificationResult::Valid);
    }

    #[test]
    fn test_push_item_requires_ledger_ownership() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();

        // The registry has not actually moved the item to the ledger
        h.items.mint(alice(), 7);
        let err = h
            .ledger
            .on_item_received(h.items_addr, alice(), 7, &container.to_be_bytes())
            .unwrap_err();
        assert!(matches!(err, CustodyError::Registry(_)));
        assert!(!h.ledger.holds(container, &h.items_addr, 7));
    }

    #[test]
    fn test_push_item_duplicate_custody() {
        let mut h = harness();
        let first = h.ledger.mint_container(alice()).unwrap();
        let second = h.ledger.mint_container(alice()).unwrap();

        h.items.mint(h.ledger.address(), 7);
        h.ledger
            .on_item_received(h.items_addr, alice(), 7, &first.to_be_bytes())
            .unwrap();

        let err = h
            .ledger
            .on_item_received(h.items_addr, alice(), 7, &second.to_be_bytes())
            .unwrap_err();
        assert!(matches!(err, CustodyError::DuplicateCustody { .. }));
        assert_eq!(h.ledger.holder_of(&h.items_addr, 7), Some(first));
    }

    #[test]
    fn test_malformed_transfer_data() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();

        h.items.mint(h.ledger.address(), 7);

        // Wrong auxiliary data length
        let err = h
            .ledger
            .on_item_received(h.items_addr, alice(), 7, &[1, 2, 3])
            .unwrap_err();
        assert!(matches!(err, CustodyError::MalformedTransferData(_)));

        // Well-formed but naming a container that was never registered
        let err = h
            .ledger
            .on_item_received(
                h.items_addr,
                alice(),
                7,
                &ContainerId::new(999).to_be_bytes(),
            )
            .unwrap_err();
        assert!(matches!(err, CustodyError::MalformedTransferData(_)));
        assert_eq!(h.ledger.registry_count(container, AssetKind::NonFungible), 0);
    }

    #[test]
    fn test_funds_deposit_withdraw_cycle() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        let genesis = h.ledger.commitment(container).unwrap();

        h.funds.mint(h.ledger.address(), 1000);
        let ack = h
            .ledger
            .on_funds_received(h.funds_addr, alice(), 1000, &container.to_be_bytes())
            .unwrap();
        assert_eq!(ack, FUNDS_RECEIVED_ACK);
        assert_eq!(h.ledger.funds_balance(container, &h.funds_addr), 1000);
        assert_eq!(h.ledger.registry_count(container, AssetKind::Fungible), 1);

        let after_deposit = h.ledger.commitment(container).unwrap();
        assert_ne!(after_deposit, genesis);

        h.ledger
            .withdraw_funds(alice(), container, bob(), h.funds_addr, 1000)
            .unwrap();
        assert_eq!(h.ledger.funds_balance(container, &h.funds_addr), 0);
        // A zero balance drops the registry from enumeration
        assert_eq!(h.ledger.registry_count(container, AssetKind::Fungible), 0);
        assert_eq!(h.funds.balance_of(bob()).unwrap(), 1000);

        // The commitment distinguishes the empty-again container from a fresh one
        let after_withdraw = h.ledger.commitment(container).unwrap();
        assert_ne!(after_withdraw, genesis);
        assert_ne!(after_withdraw, after_deposit);

        let history = h.ledger.history(container);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event.payload, CommitmentPayload::Balance(1000));
        assert_eq!(history[0].event.tag, EventTag::Deposit);
        assert_eq!(history[1].event.payload, CommitmentPayload::Balance(0));
        assert_eq!(history[1].event.tag, EventTag::Withdraw);
        assert_eq!(h.ledger.audit(container), VerificationResult::Valid);
    }

    #[test]
    fn test_pull_funds_with_allowance() {
        let mut h = harness();
        let container = h.ledger.mint_container(bob()).unwrap();

        h.funds.mint(alice(), 500);
        h.funds.approve(alice(), h.ledger.address(), 500);
        h.funds.approve(alice(), bob(), 300);

        h.ledger
            .pull_funds(bob(), alice(), container, h.funds_addr, 300)
            .unwrap();
        assert_eq!(h.ledger.funds_balance(container, &h.funds_addr), 300);
        assert_eq!(h.funds.balance_of(h.ledger.address()).unwrap(), 300);
        assert_eq!(h.funds.balance_of(alice()).unwrap(), 200);

        // The caller's delegated allowance is exhausted
        let err = h
            .ledger
            .pull_funds(bob(), alice(), container, h.funds_addr, 400)
            .unwrap_err();
        assert!(matches!(
            err,
            CustodyError::AllowanceExceeded {
                allowed: 300,
                requested: 400,
                ..
            }
        ));
        assert_eq!(h.ledger.funds_balance(container, &h.funds_addr), 300);
    }

    #[test]
    fn test_pull_funds_rollback_on_registry_failure() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        let genesis = h.ledger.commitment(container).unwrap();

        // No allowance granted to the ledger, so the transfer-in will fail
        h.funds.mint(alice(), 500);
        let err = h
            .ledger
            .pull_funds(alice(), alice(), container, h.funds_addr, 200)
            .unwrap_err();
        assert!(matches!(err, CustodyError::Registry(_)));

        assert_eq!(h.ledger.funds_balance(container, &h.funds_addr), 0);
        assert_eq!(h.ledger.registry_count(container, AssetKind::Fungible), 0);
        assert_eq!(h.ledger.commitment(container).unwrap(), genesis);
        assert!(h.ledger.history(container).is_empty());
    }

    #[test]
    fn test_pull_item() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();

        h.items.mint(alice(), 9);
        h.items.approve(h.ledger.address(), 9);

        // A stranger without an approval cannot initiate the pull
        let err = h
            .ledger
            .pull_item(bob(), alice(), container, h.items_addr, 9)
            .unwrap_err();
        assert!(matches!(err, CustodyError::AllowanceExceeded { .. }));

        h.ledger
            .pull_item(alice(), alice(), container, h.items_addr, 9)
            .unwrap();
        assert!(h.ledger.holds(container, &h.items_addr, 9));
        assert_eq!(h.items.owner_of(9).unwrap(), h.ledger.address());
        assert_eq!(h.ledger.audit(container), VerificationResult::Valid);
    }

    #[test]
    fn test_pull_item_rollback_on_registry_failure() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        let genesis = h.ledger.commitment(container).unwrap();

        // Owner initiates, but the ledger holds no approval for the hand-off
        h.items.mint(alice(), 9);
        let err = h
            .ledger
            .pull_item(alice(), alice(), container, h.items_addr, 9)
            .unwrap_err();
        assert!(matches!(err, CustodyError::Registry(_)));

        assert!(!h.ledger.holds(container, &h.items_addr, 9));
        assert_eq!(h.ledger.holder_of(&h.items_addr, 9), None);
        assert_eq!(h.ledger.commitment(container).unwrap(), genesis);
        assert_eq!(h.items.owner_of(9).unwrap(), alice());
    }

    #[test]
    fn test_pull_semi_operator() {
        let mut h = harness();
        let container = h.ledger.mint_container(bob()).unwrap();

        h.semi.mint(alice(), 5, 100);
        h.semi.set_operator(alice(), h.ledger.address(), true);

        let err = h
            .ledger
            .pull_semi(bob(), alice(), container, h.semi_addr, 5, 40)
            .unwrap_err();
        assert!(matches!(err, CustodyError::AllowanceExceeded { .. }));

        h.semi.set_operator(alice(), bob(), true);
        h.ledger
            .pull_semi(bob(), alice(), container, h.semi_addr, 5, 40)
            .unwrap();
        assert_eq!(h.ledger.semi_balance(container, &h.semi_addr, 5), 40);
        assert_eq!(h.semi.balance_of(h.ledger.address(), 5).unwrap(), 40);
    }

    #[test]
    fn test_withdraw_item_authorization() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        h.items.mint(h.ledger.address(), 7);
        h.ledger
            .on_item_received(h.items_addr, alice(), 7, &container.to_be_bytes())
            .unwrap();

        let err = h
            .ledger
            .withdraw_item(bob(), container, bob(), h.items_addr, 7, &[])
            .unwrap_err();
        assert!(matches!(err, CustodyError::Unauthorized { .. }));
        assert!(h.ledger.holds(container, &h.items_addr, 7));

        // The approved delegate may withdraw
        h.identity.approve(alice(), bob(), container).unwrap();
        h.ledger
            .withdraw_item(bob(), container, bob(), h.items_addr, 7, &[])
            .unwrap();
        assert!(!h.ledger.holds(container, &h.items_addr, 7));
        assert_eq!(h.items.owner_of(7).unwrap(), bob());
    }

    #[test]
    fn test_withdraw_operator_authorization() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        h.funds.mint(h.ledger.address(), 100);
        h.ledger
            .on_funds_received(h.funds_addr, alice(), 100, &container.to_be_bytes())
            .unwrap();

        h.identity.set_operator(alice(), carol(), true).unwrap();
        h.ledger
            .withdraw_funds(carol(), container, carol(), h.funds_addr, 100)
            .unwrap();
        assert_eq!(h.funds.balance_of(carol()).unwrap(), 100);
    }

    #[test]
    fn test_withdraw_destination_checks() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        h.funds.mint(h.ledger.address(), 100);
        h.ledger
            .on_funds_received(h.funds_addr, alice(), 100, &container.to_be_bytes())
            .unwrap();

        let err = h
            .ledger
            .withdraw_funds(alice(), container, AssetAddress::zero(), h.funds_addr, 50)
            .unwrap_err();
        assert!(matches!(err, CustodyError::InvalidDestination(_)));

        let err = h
            .ledger
            .withdraw_funds(alice(), container, h.ledger.address(), h.funds_addr, 50)
            .unwrap_err();
        assert!(matches!(err, CustodyError::InvalidDestination(_)));
        assert_eq!(h.ledger.funds_balance(container, &h.funds_addr), 100);
    }

    #[test]
    fn test_withdraw_not_held_and_insufficient() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();

        let err = h
            .ledger
            .withdraw_item(alice(), container, bob(), h.items_addr, 1, &[])
            .unwrap_err();
        assert!(matches!(err, CustodyError::NotHeld { .. }));

        h.funds.mint(h.ledger.address(), 10);
        h.ledger
            .on_funds_received(h.funds_addr, alice(), 10, &container.to_be_bytes())
            .unwrap();
        let err = h
            .ledger
            .withdraw_funds(alice(), container, bob(), h.funds_addr, 11)
            .unwrap_err();
        assert!(matches!(
            err,
            CustodyError::InsufficientBalance {
                have: 10,
                want: 11,
                ..
            }
        ));
    }

    #[test]
    fn test_withdraw_invokes_receiver_hook() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        h.funds.mint(h.ledger.address(), 100);
        h.ledger
            .on_funds_received(h.funds_addr, alice(), 100, &container.to_be_bytes())
            .unwrap();

        let receiver = Arc::new(AcceptingReceiver::new());
        h.ledger.registries.register_receiver(bob(), receiver.clone());

        h.ledger
            .withdraw_funds(alice(), container, bob(), h.funds_addr, 60)
            .unwrap();
        assert_eq!(receiver.call_count(), 1);
        assert_eq!(h.funds.balance_of(bob()).unwrap(), 60);
    }

    #[test]
    fn test_rejecting_receiver_rolls_back() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        h.items.mint(h.ledger.address(), 7);
        h.ledger
            .on_item_received(h.items_addr, alice(), 7, &container.to_be_bytes())
            .unwrap();
        let before = h.ledger.commitment(container).unwrap();
        let journal = h.ledger.history(container).len();

        h.ledger
            .registries
            .register_receiver(carol(), Arc::new(RejectingReceiver));

        let err = h
            .ledger
            .withdraw_item(alice(), container, carol(), h.items_addr, 7, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            CustodyError::ReceiverRejected { receiver } if receiver == carol()
        ));

        // Local effects were rolled back and nothing moved externally
        assert!(h.ledger.holds(container, &h.items_addr, 7));
        assert_eq!(h.ledger.holder_of(&h.items_addr, 7), Some(container));
        assert_eq!(h.ledger.commitment(container).unwrap(), before);
        assert_eq!(h.ledger.history(container).len(), journal);
        assert_eq!(h.items.owner_of(7).unwrap(), h.ledger.address());
        assert_eq!(h.ledger.audit(container), VerificationResult::Valid);
    }

    #[test]
    fn test_semi_deposit_and_withdraw() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();

        h.semi.mint(h.ledger.address(), 5, 70);
        h.semi.mint(h.ledger.address(), 6, 30);
        h.ledger
            .on_semi_received(h.semi_addr, alice(), 5, 70, &container.to_be_bytes())
            .unwrap();
        h.ledger
            .on_semi_received(h.semi_addr, alice(), 6, 30, &container.to_be_bytes())
            .unwrap();

        assert_eq!(h.ledger.semi_balance(container, &h.semi_addr, 5), 70);
        assert_eq!(h.ledger.semi_balance(container, &h.semi_addr, 6), 30);
        assert_eq!(
            h.ledger.registry_count(container, AssetKind::SemiFungible),
            1
        );

        h.ledger
            .withdraw_semi(alice(), container, bob(), h.semi_addr, 5, 70)
            .unwrap();
        assert_eq!(h.ledger.semi_balance(container, &h.semi_addr, 5), 0);
        // Sub-id 6 still keeps the registry enumerated
        assert_eq!(
            h.ledger.registry_count(container, AssetKind::SemiFungible),
            1
        );

        h.ledger
            .withdraw_semi(alice(), container, bob(), h.semi_addr, 6, 30)
            .unwrap();
        assert_eq!(
            h.ledger.registry_count(container, AssetKind::SemiFungible),
            0
        );
        assert_eq!(h.semi.balance_of(bob(), 5).unwrap(), 70);
        assert_eq!(h.semi.balance_of(bob(), 6).unwrap(), 30);
        assert_eq!(h.ledger.audit(container), VerificationResult::Valid);
    }

    #[test]
    fn test_recustody_item() {
        let mut h = harness();
        let first = h.ledger.mint_container(alice()).unwrap();
        let second = h.ledger.mint_container(bob()).unwrap();
        h.items.mint(h.ledger.address(), 7);
        h.ledger
            .on_item_received(h.items_addr, alice(), 7, &first.to_be_bytes())
            .unwrap();

        let err = h
            .ledger
            .recustody_item(bob(), first, second, h.items_addr, 7)
            .unwrap_err();
        assert!(matches!(err, CustodyError::Unauthorized { .. }));

        h.ledger
            .recustody_item(alice(), first, second, h.items_addr, 7)
            .unwrap();
        assert!(!h.ledger.holds(first, &h.items_addr, 7));
        assert!(h.ledger.holds(second, &h.items_addr, 7));
        assert_eq!(h.ledger.holder_of(&h.items_addr, 7), Some(second));

        // Both sides journal the hand-off
        assert_eq!(h.ledger.history(first).len(), 2);
        assert_eq!(h.ledger.history(second).len(), 1);
        assert_eq!(h.ledger.audit(first), VerificationResult::Valid);
        assert_eq!(h.ledger.audit(second), VerificationResult::Valid);

        let err = h
            .ledger
            .recustody_item(bob(), second, second, h.items_addr, 7)
            .unwrap_err();
        assert!(matches!(err, CustodyError::InvalidDestination(_)));
    }

    #[test]
    fn test_recustody_funds() {
        let mut h = harness();
        let first = h.ledger.mint_container(alice()).unwrap();
        let second = h.ledger.mint_container(bob()).unwrap();
        h.funds.mint(h.ledger.address(), 100);
        h.ledger
            .on_funds_received(h.funds_addr, alice(), 100, &first.to_be_bytes())
            .unwrap();

        let err = h
            .ledger
            .recustody_funds(alice(), first, second, h.funds_addr, 150)
            .unwrap_err();
        assert!(matches!(err, CustodyError::InsufficientBalance { .. }));
        assert_eq!(h.ledger.funds_balance(second, &h.funds_addr), 0);

        h.ledger
            .recustody_funds(alice(), first, second, h.funds_addr, 60)
            .unwrap();
        assert_eq!(h.ledger.funds_balance(first, &h.funds_addr), 40);
        assert_eq!(h.ledger.funds_balance(second, &h.funds_addr), 60);
        assert_eq!(h.ledger.audit(first), VerificationResult::Valid);
        assert_eq!(h.ledger.audit(second), VerificationResult::Valid);
    }

    #[test]
    fn test_recustody_semi() {
        let mut h = harness();
        let first = h.ledger.mint_container(alice()).unwrap();
        let second = h.ledger.mint_container(alice()).unwrap();
        h.semi.mint(h.ledger.address(), 9, 50);
        h.ledger
            .on_semi_received(h.semi_addr, alice(), 9, 50, &first.to_be_bytes())
            .unwrap();

        h.ledger
            .recustody_semi(alice(), first, second, h.semi_addr, 9, 20)
            .unwrap();
        assert_eq!(h.ledger.semi_balance(first, &h.semi_addr, 9), 30);
        assert_eq!(h.ledger.semi_balance(second, &h.semi_addr, 9), 20);
    }

    #[test]
    fn test_nested_container_commitment() {
        let mut h = harness();
        let parent = h.ledger.mint_container(alice()).unwrap();
        let child = h.ledger.mint_container(alice()).unwrap();
        let child_genesis = h.ledger.commitment(child).unwrap();

        nest(&mut h, child, parent, alice());

        assert_eq!(h.ledger.parent_of(child), Some(parent));
        assert_eq!(h.identity.owner_of(child).unwrap(), h.ledger.address());

        // The parent folded the child's commitment at hand-off time
        let history = h.ledger.history(parent);
        assert_eq!(
            history[0].event.payload,
            CommitmentPayload::ChildContainer {
                child,
                commitment: child_genesis,
            }
        );
        let parent_hash = h.ledger.commitment(parent).unwrap();

        // Mutating the child afterwards does not ripple into the parent
        h.funds.mint(h.ledger.address(), 10);
        h.ledger
            .on_funds_received(h.funds_addr, alice(), 10, &child.to_be_bytes())
            .unwrap();
        assert_eq!(h.ledger.commitment(parent).unwrap(), parent_hash);
        assert_ne!(h.ledger.commitment(child).unwrap(), child_genesis);
    }

    #[test]
    fn test_root_owner_resolution() {
        let mut h = harness();
        let top = h.ledger.mint_container(alice()).unwrap();
        let middle = h.ledger.mint_container(alice()).unwrap();
        let bottom = h.ledger.mint_container(alice()).unwrap();
        nest(&mut h, middle, top, alice());
        nest(&mut h, bottom, middle, alice());

        let root = h.ledger.root_owner(bottom).unwrap();
        assert!(root.is_tagged());
        assert_eq!(root.address, alice());
        assert_eq!(h.ledger.root_owner(top).unwrap().address, alice());

        let (holder, root) = h
            .ledger
            .root_owner_of_item(&h.ledger.address(), bottom.value())
            .unwrap();
        assert_eq!(holder, middle);
        assert_eq!(root.address, alice());

        assert!(h
            .ledger
            .root_owner_of_item(&h.items_addr, 42)
            .is_err());
    }

    #[test]
    fn test_nested_authorization_via_root_owner() {
        let mut h = harness();
        let parent = h.ledger.mint_container(alice()).unwrap();
        let child = h.ledger.mint_container(alice()).unwrap();
        nest(&mut h, child, parent, alice());

        h.funds.mint(h.ledger.address(), 100);
        h.ledger
            .on_funds_received(h.funds_addr, alice(), 100, &child.to_be_bytes())
            .unwrap();

        // The child's recorded owner is the ledger, but the resolved root
        // owner may still operate it
        let err = h
            .ledger
            .withdraw_funds(bob(), child, bob(), h.funds_addr, 100)
            .unwrap_err();
        assert!(matches!(err, CustodyError::Unauthorized { .. }));
        h.ledger
            .withdraw_funds(alice(), child, bob(), h.funds_addr, 100)
            .unwrap();
        assert_eq!(h.funds.balance_of(bob()).unwrap(), 100);
    }

    #[test]
    fn test_withdraw_nested_container() {
        let mut h = harness();
        let parent = h.ledger.mint_container(alice()).unwrap();
        let child = h.ledger.mint_container(alice()).unwrap();
        nest(&mut h, child, parent, alice());

        h.ledger
            .withdraw_item(
                alice(),
                parent,
                bob(),
                h.ledger.address(),
                child.value(),
                &[],
            )
            .unwrap();
        assert_eq!(h.identity.owner_of(child).unwrap(), bob());
        assert_eq!(h.ledger.parent_of(child), None);
        assert_eq!(h.ledger.root_owner(child).unwrap().address, bob());
    }

    #[test]
    fn test_custody_cycle_rejected() {
        let mut h = harness();
        let top = h.ledger.mint_container(alice()).unwrap();
        let middle = h.ledger.mint_container(alice()).unwrap();
        let bottom = h.ledger.mint_container(alice()).unwrap();
        nest(&mut h, middle, top, alice());
        nest(&mut h, bottom, middle, alice());

        // Handing the top container into its own subtree must fail
        h.identity
            .transfer(alice(), h.ledger.address(), top)
            .unwrap();
        let err = h
            .ledger
            .on_item_received(
                h.ledger.address(),
                alice(),
                top.value(),
                &bottom.to_be_bytes(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CustodyError::CircularCustody { child, destination }
                if child == top && destination == bottom
        ));
        assert_eq!(h.ledger.parent_of(top), None);
        assert_eq!(
            h.ledger.registry_count(bottom, AssetKind::NonFungible),
            0
        );
    }

    #[test]
    fn test_recustody_cycle_rejected() {
        let mut h = harness();
        let top = h.ledger.mint_container(alice()).unwrap();
        let middle = h.ledger.mint_container(alice()).unwrap();
        nest(&mut h, middle, top, alice());

        // Pull the top container into custody of a sibling first
        let sibling = h.ledger.mint_container(alice()).unwrap();
        nest(&mut h, top, sibling, alice());

        // Re-custody of top from sibling into its own descendant
        let err = h
            .ledger
            .recustody_item(alice(), sibling, middle, h.ledger.address(), top.value())
            .unwrap_err();
        assert!(matches!(err, CustodyError::CircularCustody { .. }));
        assert_eq!(h.ledger.parent_of(top), Some(sibling));
        assert!(h.ledger.holds(sibling, &h.ledger.address(), top.value()));
    }

    #[test]
    fn test_nesting_depth_bound() {
        let mut h = harness();
        let mut containers = Vec::new();
        for _ in 0..MAX_NESTING_DEPTH + 4 {
            containers.push(h.ledger.mint_container(alice()).unwrap());
        }

        let mut depth_error = None;
        for window in containers.windows(2) {
            let (parent, child) = (window[0], window[1]);
            h.identity
                .transfer(alice(), h.ledger.address(), child)
                .unwrap();
            let result = h.ledger.on_item_received(
                h.ledger.address(),
                alice(),
                child.value(),
                &parent.to_be_bytes(),
            );
            if let Err(err) = result {
                depth_error = Some(err);
                break;
            }
        }
        assert!(matches!(
            depth_error,
            Some(CustodyError::OwnershipChainTooDeep(_))
        ));
    }

    #[test]
    fn test_zero_amount_operations_are_noops() {
        let mut h = harness();
        let container = h.ledger.mint_container(alice()).unwrap();
        let genesis = h.ledger.commitment(container).unwrap();

        h.ledger
            .on_funds_received(h.funds_addr, alice(), 0, &container.to_be_bytes())
            .unwrap();
        h.ledger
            .withdraw_funds(alice(), container, bob(), h.funds_addr, 0)
            .unwrap();
        h.ledger
            .on_semi_received(h.semi_addr, alice(), 1, 0, &container.to_be_bytes())
            .unwrap();

        assert_eq!(h.ledger.commitment(container).unwrap(), genesis);
        assert!(h.ledger.history(container).is_empty());
        assert_eq!(h.ledger.registry_count(container, AssetKind::Fungible), 0);
    }
}
