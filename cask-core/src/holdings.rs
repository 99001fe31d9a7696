use crate::assets::{Amount, AssetKind, ItemId, SubId};
use crate::error::CustodyError;
use crate::id::{AssetAddress, ContainerId};
use std::collections::HashMap;
use std::hash::Hash;

/// Index-addressable set with O(1) insertion and removal
///
/// Removal relocates the last entry into the freed slot (swap-and-remove), so
/// index-based iteration order is stable only between mutations. Callers must
/// never treat slot indices as stable identifiers across mutating calls.
#[derive(Debug, Clone)]
pub struct IndexedSet<T: Copy + Eq + Hash> {
    entries: Vec<T>,
    positions: HashMap<T, usize>,
}

impl<T: Copy + Eq + Hash> Default for IndexedSet<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> IndexedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, appending at the tail
    ///
    /// Returns false if the value was already present.
    pub fn insert(&mut self, value: T) -> bool {
        if self.positions.contains_key(&value) {
            return false;
        }
        self.positions.insert(value, self.entries.len());
        self.entries.push(value);
        true
    }

    /// Remove a value, relocating the last entry into the freed slot
    ///
    /// Returns false if the value was not present.
    pub fn remove(&mut self, value: &T) -> bool {
        let Some(position) = self.positions.remove(value) else {
            return false;
        };
        self.entries.swap_remove(position);
        if position < self.entries.len() {
            // The former tail entry now lives in the freed slot
            self.positions.insert(self.entries[position], position);
        }
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.positions.contains_key(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the value at a slot index
    pub fn at(&self, index: usize) -> Result<T, CustodyError> {
        self.entries
            .get(index)
            .copied()
            .ok_or(CustodyError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

/// The recorded holdings of a single container across all three asset kinds
#[derive(Debug, Clone, Default)]
pub struct ContainerHoldings {
    /// Non-fungible registries with at least one held item
    item_registries: IndexedSet<AssetAddress>,
    /// Fungible registries with a positive balance
    funds_registries: IndexedSet<AssetAddress>,
    /// Semi-fungible registries with at least one positive sub-id balance
    semi_registries: IndexedSet<AssetAddress>,
    /// Held item ids per non-fungible registry
    items: HashMap<AssetAddress, IndexedSet<ItemId>>,
    /// Balance per fungible registry
    funds: HashMap<AssetAddress, Amount>,
    /// Balance per (semi-fungible registry, sub-id)
    semi: HashMap<AssetAddress, HashMap<SubId, Amount>>,
}

impl ContainerHoldings {
    fn registries(&self, kind: AssetKind) -> &IndexedSet<AssetAddress> {
        match kind {
            AssetKind::NonFungible => &self.item_registries,
            AssetKind::Fungible => &self.funds_registries,
            AssetKind::SemiFungible => &self.semi_registries,
        }
    }

    /// Number of registries of a kind with at least one held asset
    pub fn registry_count(&self, kind: AssetKind) -> usize {
        self.registries(kind).len()
    }

    /// Registry address at a slot index for a kind
    pub fn registry_at(&self, kind: AssetKind, index: usize) -> Result<AssetAddress, CustodyError> {
        self.registries(kind).at(index)
    }

    /// Number of held items from a non-fungible registry
    pub fn item_count(&self, registry: &AssetAddress) -> usize {
        self.items.get(registry).map_or(0, |set| set.len())
    }

    /// Held item id at a slot index within a non-fungible registry
    pub fn item_at(&self, registry: &AssetAddress, index: usize) -> Result<ItemId, CustodyError> {
        match self.items.get(registry) {
            Some(set) => set.at(index),
            None => Err(CustodyError::IndexOutOfRange { index, len: 0 }),
        }
    }

    /// Whether a specific item of a registry is held
    pub fn holds_item(&self, registry: &AssetAddress, item: ItemId) -> bool {
        self.items
            .get(registry)
            .map_or(false, |set| set.contains(&item))
    }

    /// Recorded fungible balance for a registry
    pub fn funds_balance(&self, registry: &AssetAddress) -> Amount {
        self.funds.get(registry).copied().unwrap_or(0)
    }

    /// Recorded semi-fungible balance for a (registry, sub-id) pair
    pub fn semi_balance(&self, registry: &AssetAddress, sub_id: SubId) -> Amount {
        self.semi
            .get(registry)
            .and_then(|balances| balances.get(&sub_id))
            .copied()
            .unwrap_or(0)
    }

    fn add_item(&mut self, registry: AssetAddress, item: ItemId) {
        self.items.entry(registry).or_default().insert(item);
        self.item_registries.insert(registry);
    }

    fn remove_item(&mut self, registry: &AssetAddress, item: ItemId) {
        if let Some(set) = self.items.get_mut(registry) {
            set.remove(&item);
            if set.is_empty() {
                // Last item gone: the registry leaves the per-kind set
                self.items.remove(registry);
                self.item_registries.remove(registry);
            }
        }
    }

    fn add_funds(&mut self, registry: AssetAddress, amount: Amount) -> Amount {
        let balance = self.funds.entry(registry).or_insert(0);
        *balance = balance.saturating_add(amount);
        self.funds_registries.insert(registry);
        *balance
    }

    fn remove_funds(
        &mut self,
        registry: &AssetAddress,
        amount: Amount,
    ) -> Result<Amount, CustodyError> {
        let have = self.funds_balance(registry);
        if amount > have {
            return Err(CustodyError::InsufficientBalance {
                registry: *registry,
                have,
                want: amount,
            });
        }
        let remaining = have - amount;
        if remaining == 0 {
            self.funds.remove(registry);
            self.funds_registries.remove(registry);
        } else {
            self.funds.insert(*registry, remaining);
        }
        Ok(remaining)
    }

    fn add_semi(&mut self, registry: AssetAddress, sub_id: SubId, amount: Amount) -> Amount {
        let balances = self.semi.entry(registry).or_default();
        let balance = balances.entry(sub_id).or_insert(0);
        *balance = balance.saturating_add(amount);
        self.semi_registries.insert(registry);
        *balance
    }

    fn remove_semi(
        &mut self,
        registry: &AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<Amount, CustodyError> {
        let have = self.semi_balance(registry, sub_id);
        if amount > have {
            return Err(CustodyError::InsufficientBalance {
                registry: *registry,
                have,
                want: amount,
            });
        }
        let remaining = have - amount;
        let balances = self.semi.entry(*registry).or_default();
        if remaining == 0 {
            balances.remove(&sub_id);
        } else {
            balances.insert(sub_id, remaining);
        }
        if balances.is_empty() {
            self.semi.remove(registry);
            self.semi_registries.remove(registry);
        }
        Ok(remaining)
    }
}

/// Bidirectional custody index across all containers
///
/// Tracks per-container holdings plus the global reverse map from a
/// (registry, item) pair to the single container recording it, which guards
/// the at-most-one-owner invariant for non-fungible items.
#[derive(Debug, Clone, Default)]
pub struct CustodyIndex {
    holdings: HashMap<ContainerId, ContainerHoldings>,
    item_holder: HashMap<(AssetAddress, ItemId), ContainerId>,
}

impl CustodyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record custody of a non-fungible item
    ///
    /// Fails with DuplicateCustody if any container already records the item.
    pub fn record_item_deposit(
        &mut self,
        container: ContainerId,
        registry: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError> {
        if let Some(holder) = self.item_holder.get(&(registry, item)) {
            return Err(CustodyError::DuplicateCustody {
                registry,
                item,
                holder: *holder,
            });
        }
        self.holdings
            .entry(container)
            .or_default()
            .add_item(registry, item);
        self.item_holder.insert((registry, item), container);
        Ok(())
    }

    /// Remove custody of a non-fungible item
    pub fn record_item_withdrawal(
        &mut self,
        container: ContainerId,
        registry: AssetAddress,
        item: ItemId,
    ) -> Result<(), CustodyError> {
        if self.item_holder.get(&(registry, item)) != Some(&container) {
            return Err(CustodyError::NotHeld {
                container,
                registry,
                item,
            });
        }
        if let Some(holdings) = self.holdings.get_mut(&container) {
            holdings.remove_item(&registry, item);
        }
        self.item_holder.remove(&(registry, item));
        Ok(())
    }

    /// Record a fungible deposit, returning the new balance
    pub fn record_funds_deposit(
        &mut self,
        container: ContainerId,
        registry: AssetAddress,
        amount: Amount,
    ) -> Amount {
        self.holdings
            .entry(container)
            .or_default()
            .add_funds(registry, amount)
    }

    /// Record a fungible withdrawal, returning the new balance
    pub fn record_funds_withdrawal(
        &mut self,
        container: ContainerId,
        registry: AssetAddress,
        amount: Amount,
    ) -> Result<Amount, CustodyError> {
        match self.holdings.get_mut(&container) {
            Some(holdings) => holdings.remove_funds(&registry, amount),
            None => Err(CustodyError::InsufficientBalance {
                registry,
                have: 0,
                want: amount,
            }),
        }
    }

    /// Record a semi-fungible deposit, returning the new sub-id balance
    pub fn record_semi_deposit(
        &mut self,
        container: ContainerId,
        registry: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Amount {
        self.holdings
            .entry(container)
            .or_default()
            .add_semi(registry, sub_id, amount)
    }

    /// Record a semi-fungible withdrawal, returning the new sub-id balance
    pub fn record_semi_withdrawal(
        &mut self,
        container: ContainerId,
        registry: AssetAddress,
        sub_id: SubId,
        amount: Amount,
    ) -> Result<Amount, CustodyError> {
        match self.holdings.get_mut(&container) {
            Some(holdings) => holdings.remove_semi(&registry, sub_id, amount),
            None => Err(CustodyError::InsufficientBalance {
                registry,
                have: 0,
                want: amount,
            }),
        }
    }

    /// The container currently recording custody of an item, if any
    pub fn holder_of(&self, registry: &AssetAddress, item: ItemId) -> Option<ContainerId> {
        self.item_holder.get(&(*registry, item)).copied()
    }

    /// Whether a specific container records custody of an item
    pub fn holds(&self, container: ContainerId, registry: &AssetAddress, item: ItemId) -> bool {
        self.holder_of(registry, item) == Some(container)
    }

    pub fn registry_count(&self, container: ContainerId, kind: AssetKind) -> usize {
        self.holdings
            .get(&container)
            .map_or(0, |h| h.registry_count(kind))
    }

    pub fn registry_at(
        &self,
        container: ContainerId,
        kind: AssetKind,
        index: usize,
    ) -> Result<AssetAddress, CustodyError> {
        match self.holdings.get(&container) {
            Some(holdings) => holdings.registry_at(kind, index),
            None => Err(CustodyError::IndexOutOfRange { index, len: 0 }),
        }
    }

    pub fn item_count(&self, container: ContainerId, registry: &AssetAddress) -> usize {
        self.holdings
            .get(&container)
            .map_or(0, |h| h.item_count(registry))
    }

    pub fn item_at(
        &self,
        container: ContainerId,
        registry: &AssetAddress,
        index: usize,
    ) -> Result<ItemId, CustodyError> {
        match self.holdings.get(&container) {
            Some(holdings) => holdings.item_at(registry, index),
            None => Err(CustodyError::IndexOutOfRange { index, len: 0 }),
        }
    }

    pub fn funds_balance(&self, container: ContainerId, registry: &AssetAddress) -> Amount {
        self.holdings
            .get(&container)
            .map_or(0, |h| h.funds_balance(registry))
    }

    pub fn semi_balance(
        &self,
        container: ContainerId,
        registry: &AssetAddress,
        sub_id: SubId,
    ) -> Amount {
        self.holdings
            .get(&container)
            .map_or(0, |h| h.semi_balance(registry, sub_id))
    }

    /// Clone a container's holdings for a pre-operation snapshot
    pub fn holdings_of(&self, container: ContainerId) -> ContainerHoldings {
        self.holdings.get(&container).cloned().unwrap_or_default()
    }

    /// Restore a container's holdings from a snapshot
    pub fn set_holdings(&mut self, container: ContainerId, holdings: ContainerHoldings) {
        self.holdings.insert(container, holdings);
    }

    /// Read a reverse-map entry for snapshotting
    pub fn reverse_entry(&self, registry: &AssetAddress, item: ItemId) -> Option<ContainerId> {
        self.item_holder.get(&(*registry, item)).copied()
    }

    /// Restore a reverse-map entry from a snapshot
    pub fn set_reverse_entry(
        &mut self,
        registry: AssetAddress,
        item: ItemId,
        holder: Option<ContainerId>,
    ) {
        match holder {
            Some(container) => {
                self.item_holder.insert((registry, item), container);
            }
            None => {
                self.item_holder.remove(&(registry, item));
            }
        }
    }
}
