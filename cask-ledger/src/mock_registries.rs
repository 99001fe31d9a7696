use cask_core::assets::{
    Amount, ItemId, SubId, FUNDS_RECEIVED_ACK, ITEM_RECEIVED_ACK, SEMI_RECEIVED_ACK,
};
use cask_core::error::CustodyError;
use cask_core::id::{AssetAddress, ContainerId};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::registry::{AssetReceiver, FundsRegistry, IdentityLedger, ItemRegistry, SemiRegistry};

/// In-memory identity ledger for containers, used in tests
///
/// Implements the minimal mint/ownership/approval surface the protocol engine
/// needs from its external identity collaborator.
#[derive(Default)]
pub struct InMemoryIdentityLedger {
    state: Mutex<IdentityState>,
}

#[derive(Default)]
struct IdentityState {
    next_id: u64,
    owners: HashMap<ContainerId, AssetAddress>,
    delegates: HashMap<ContainerId, AssetAddress>,
    operators: HashMap<(AssetAddress, AssetAddress), bool>,
}

impl InMemoryIdentityLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityLedger for InMemoryIdentityLedger {
    fn mint(&self, owner: AssetAddress) -> Result<ContainerId, CustodyError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let container = ContainerId::new(state.next_id);
        state.owners.insert(container, owner);
        Ok(container)
    }

    fn owner_of(&self, container: ContainerId) -> Result<AssetAddress, CustodyError> {
        let state = self.state.lock().unwrap();
        state
            .owners
            .get(&container)
            .copied()
            .ok_or(CustodyError::UnknownContainer(container))
    }

    fn is_approved_or_owner(
        &self,
        caller: AssetAddress,
        container: ContainerId,
    ) -> Result<bool, CustodyError> {
        let state = self.state.lock().unwrap();
        let owner = state
            .owners
            .get(&container)
            .copied()
            .ok_or(CustodyError::UnknownContainer(container))?;
        if caller == owner {
            return Ok(true);
        }
        if state.delegates.get(&container) == Some(&caller) {
            return Ok(true);
        }
        Ok(state
            .operators
            .get(&(owner, caller))
            .copied()
            .unwrap_or(false))
    }

    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        container: ContainerId,
    ) -> Result<(), CustodyError> {
        let mut state = self.state.lock().unwrap();
        let owner = state
            .owners
            .get(&container)
            .copied()
            .ok_or(CustodyError::UnknownContainer(container))?;
        if owner != from {
            return Err(CustodyError::Registry(format!(
                "{} is not owned by {}",
                container, from
            )));
        }
        state.owners.insert(container, to);
        // Ownership change clears the approved delegate
        state.delegates.remove(&container);
        Ok(())
    }

    fn approve(
        &self,
        owner: AssetAddress,
        delegate: AssetAddress,
        container: ContainerId,
    ) -> Result<(), CustodyError> {
        let mut state = self.state.lock().unwrap();
        match state.owners.get(&container) {
            Some(recorded) if *recorded == owner => {
                state.delegates.insert(container, delegate);
                Ok(())
            }
            Some(_) => Err(CustodyError::Registry(format!(
                "{} is not owned by {}",
                container, owner
            ))),
            None => Err(CustodyError::UnknownContainer(container)),
        }
    }

    fn set_operator(
        &self,
        owner: AssetAddress,
        operator: AssetAddress,
        approved: bool,
    ) -> Result<(), CustodyError> {
        let mut state = self.state.lock().unwrap();
        state.operators.insert((owner, operator), approved);
        Ok(())
    }
}

/// In-memory non-fungible registry, used in tests
#[derive(Default)]
pub struct InMemoryItemRegistry {
    owners: Mutex<HashMap<ItemId, AssetAddress>>,
    approvals: Mutex<HashMap<ItemId, AssetAddress>>,
}

impl InMemoryItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an item directly to an owner
    pub fn mint(&self, owner: AssetAddress, item: ItemId) {
        self.owners.lock().unwrap().insert(item, owner);
    }

    /// Grant a single-item approval
    pub fn approve(&self, operator: AssetAddress, item: ItemId) {
        self.approvals.lock().unwrap().insert(item, operator);
    }
}

impl ItemRegistry for InMemoryItemRegistry {
    fn owner_of(&self, item: ItemId) -> Result<AssetAddress, CustodyError> {
        self.owners
            .lock()
            .unwrap()
            .get(&item)
            .copied()
            .ok_or_else(|| CustodyError::Registry(format!("unknown item {}", item)))
    }

    fn is_approved(
        &self,
        owner: AssetAddress,
        operator: AssetAddress,
        item: ItemId,
    ) -> Result<bool, CustodyError> {
        if self.owner_of(item)? != owner {
            return Ok(false);
        }
        Ok(self.approvals.lock().unwrap().get(&item) == Some(&operator))
    }

    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError> {
        let mut owners = self.owners.lock().unwrap();
        match owners.get(&item) {
            Some(owner) if *owner == from => {
                owners.insert(item, to);
                self.approvals.lock().unwrap().remove(&item);
                Ok(())
            }
            Some(_) => Err(CustodyError::Registry(format!(
                "item {} not owned by {}",
                item, from
            ))),
            None => Err(CustodyError::Registry(format!("unknown item {}", item))),
        }
    }

    fn transfer_from(
        &self,
        operator: AssetAddress,
        from: AssetAddress,
        to: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError> {
        if operator != from && !self.is_approved(from, operator, item)? {
            return Err(CustodyError::Registry(format!(
                "{} has no approval for item {}",
                operator, item
            )));
        }
        self.transfer(from, to, item)
    }
}

/// In-memory fungible registry, used in tests
#[derive(Default)]
pub struct InMemoryFundsRegistry {
    balances: Mutex<HashMap<AssetAddress, Amount>>,
    allowances: Mutex<HashMap<(AssetAddress, AssetAddress), Amount>>,
}

impl InMemoryFundsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint units directly to a holder
    pub fn mint(&self, holder: AssetAddress, amount: Amount) {
        let mut balances = self.balances.lock().unwrap();
        *balances.entry(holder).or_insert(0) += amount;
    }

    /// Set an owner's allowance for a spender
    pub fn approve(&self, owner: AssetAddress, spender: AssetAddress, amount: Amount) {
        self.allowances.lock().unwrap().insert((owner, spender), amount);
    }
}

impl FundsRegistry for InMemoryFundsRegistry {
    fn balance_of(&self, holder: AssetAddress) -> Result<Amount, CustodyError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&holder)
            .copied()
            .unwrap_or(0))
    }

    fn allowance(
        &self,
        owner: AssetAddress,
        spender: AssetAddress,
    ) -> Result<Amount, CustodyError> {
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(&(owner, spender))
            .copied()
            .unwrap_or(0))
    }

    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        let mut balances = self.balances.lock().unwrap();
        let have = balances.get(&from).copied().unwrap_or(0);
        if have < amount {
            return Err(CustodyError::Registry(format!(
                "{} holds {} units, cannot send {}",
                from, have, amount
            )));
        }
        balances.insert(from, have - amount);
        *balances.entry(to).or_insert(0) += amount;
        Ok(())
    }

    fn transfer_from(
        &self,
        spender: AssetAddress,
        owner: AssetAddress,
        to: AssetAddress,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        {
            let mut allowances = self.allowances.lock().unwrap();
            let allowed = allowances.get(&(owner, spender)).copied().unwrap_or(0);
            if allowed < amount {
                return Err(CustodyError::Registry(format!(
                    "allowance of {} for {} is {}, cannot spend {}",
                    owner, spender, allowed, amount
                )));
            }
            allowances.insert((owner, spender), allowed - amount);
        }
        self.transfer(owner, to, amount)
    }
}

/// In-memory semi-fungible registry, used in tests
#[derive(Default)]
pub struct InMemorySemiRegistry {
    balances: Mutex<HashMap<(AssetAddress, SubId), Amount>>,
    operators: Mutex<HashMap<(AssetAddress, AssetAddress), bool>>,
}

impl InMemorySemiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint units of a sub-id directly to a holder
    pub fn mint(&self, holder: AssetAddress, sub_id: SubId, amount: Amount) {
        let mut balances = self.balances.lock().unwrap();
        *balances.entry((holder, sub_id)).or_insert(0) += amount;
    }

    /// Grant or revoke operator status
    pub fn set_operator(&self, owner: AssetAddress, operator: AssetAddress, approved: bool) {
        self.operators
            .lock()
            .unwrap()
            .insert((owner, operator), approved);
    }
}

impl SemiRegistry for InMemorySemiRegistry {
    fn balance_of(&self, holder: AssetAddress, sub_id: SubId) -> Result<Amount, CustodyError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(holder, sub_id))
            .copied()
            .unwrap_or(0))
    }

    fn is_approved_for_all(
        &self,
        owner: AssetAddress,
        operator: AssetAddress,
    ) -> Result<bool, CustodyError> {
        Ok(self
            .operators
            .lock()
            .unwrap()
            .get(&(owner, operator))
            .copied()
            .unwrap_or(false))
    }

    fn transfer(
        &self,
        from: AssetAddress,
        to: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        let mut balances = self.balances.lock().unwrap();
        let have = balances.get(&(from, sub_id)).copied().unwrap_or(0);
        if have < amount {
            return Err(CustodyError::Registry(format!(
                "{} holds {} units of sub-id {}, cannot send {}",
                from, have, sub_id, amount
            )));
        }
        balances.insert((from, sub_id), have - amount);
        *balances.entry((to, sub_id)).or_insert(0) += amount;
        Ok(())
    }

    fn transfer_from(
        &self,
        operator: AssetAddress,
        from: AssetAddress,
        to: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<(), CustodyError> {
        if operator != from && !self.is_approved_for_all(from, operator)? {
            return Err(CustodyError::Registry(format!(
                "{} is not an operator of {}",
                operator, from
            )));
        }
        self.transfer(from, to, sub_id, amount)
    }
}

/// Receiver that acknowledges every hand-off with the expected discriminator
///
/// Records every invocation so tests can assert the engine called the hook.
#[derive(Default)]
pub struct AcceptingReceiver {
    calls: Mutex<Vec<String>>,
}

impl AcceptingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hook invocations seen so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl AssetReceiver for AcceptingReceiver {
    fn on_item_received(
        &self,
        registry: AssetAddress,
        _from: AssetAddress,
        item: ItemId,
        _data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("item {} of {}", item, registry));
        Ok(ITEM_RECEIVED_ACK)
    }

    fn on_funds_received(
        &self,
        registry: AssetAddress,
        _from: AssetAddress,
        amount: Amount,
        _data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} units of {}", amount, registry));
        Ok(FUNDS_RECEIVED_ACK)
    }

    fn on_semi_received(
        &self,
        registry: AssetAddress,
        _from: AssetAddress,
        sub_id: SubId,
        amount: Amount,
        _data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} units of {}/{}", amount, registry, sub_id));
        Ok(SEMI_RECEIVED_ACK)
    }
}

/// Receiver that answers every hook with a wrong acknowledgment
pub struct RejectingReceiver;

impl AssetReceiver for RejectingReceiver {
    fn on_item_received(
        &self,
        _registry: AssetAddress,
        _from: AssetAddress,
        _item: ItemId,
        _data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        Ok([0; 4])
    }

    fn on_funds_received(
        &self,
        _registry: AssetAddress,
        _from: AssetAddress,
        _amount: Amount,
        _data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        Ok([0; 4])
    }

    fn on_semi_received(
        &self,
        _registry: AssetAddress,
        _from: AssetAddress,
        _sub_id: SubId,
        _amount: Amount,
        _data: &[u8],
    ) -> Result<[u8; 4], CustodyError> {
        Ok([0; 4])
    }
}
