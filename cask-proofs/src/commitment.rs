use cask_core::assets::{Amount, ItemId, SubId};
use cask_core::error::CustodyError;
use cask_core::id::{AssetAddress, ContainerId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// A per-container commitment to its direct mutation history
///
/// This is an append-only, order-sensitive accumulator: every direct mutation
/// of a container's holdings chains a new value from the previous one. Two
/// containers with identical final holdings but different mutation histories
/// are expected to carry different hashes. It is *not* a canonical digest of
/// current contents; callers needing an order-independent subtree summary need
/// a different, stronger primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitmentHash([u8; 32]);

impl fmt::Display for CommitmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commit:{}", hex::encode(&self.0[0..8]))
    }
}

impl CommitmentHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        CommitmentHash(bytes)
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Direction of the mutation folded into the hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTag {
    Deposit,
    Withdraw,
}

impl EventTag {
    fn byte(&self) -> u8 {
        match self {
            EventTag::Deposit => 0,
            EventTag::Withdraw => 1,
        }
    }
}

/// Payload folded into the commitment for one mutation
///
/// Balances are the *post-event* values, so deposit-then-withdraw of the same
/// amount folds two distinct payloads. A nested container folds its own
/// current commitment at the instant of the hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentPayload {
    /// A non-fungible item id entering or leaving custody
    Item(ItemId),
    /// A container entering or leaving custody, carrying its current commitment
    ChildContainer {
        child: ContainerId,
        commitment: CommitmentHash,
    },
    /// Post-event fungible balance for the registry
    Balance(Amount),
    /// Post-event semi-fungible balance for one sub-id of the registry
    SubBalance { sub_id: SubId, balance: Amount },
}

impl CommitmentPayload {
    fn fold_into(&self, hasher: &mut Sha256) {
        match self {
            CommitmentPayload::Item(item) => {
                hasher.update([0u8]);
                hasher.update(item.to_be_bytes());
            }
            CommitmentPayload::ChildContainer { child, commitment } => {
                hasher.update([1u8]);
                hasher.update(child.to_be_bytes());
                hasher.update(commitment.bytes());
            }
            CommitmentPayload::Balance(balance) => {
                hasher.update([2u8]);
                hasher.update(balance.to_be_bytes());
            }
            CommitmentPayload::SubBalance { sub_id, balance } => {
                hasher.update([3u8]);
                hasher.update(sub_id.to_be_bytes());
                hasher.update(balance.to_be_bytes());
            }
        }
    }
}

/// One direct mutation of a container's holdings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentEvent {
    pub tag: EventTag,
    pub registry: AssetAddress,
    pub payload: CommitmentPayload,
}

/// Initial commitment for a freshly minted container
///
/// Seeded from the custody ledger's own address and the container id, so two
/// ledgers minting the same id never share a genesis value.
pub fn genesis(ledger: &AssetAddress, container: ContainerId) -> CommitmentHash {
    let mut hasher = Sha256::new();
    hasher.update(b"CASK_Genesis");
    hasher.update(ledger.bytes());
    hasher.update(container.to_be_bytes());
    CommitmentHash(hasher.finalize().into())
}

/// Chain one mutation onto a previous commitment
///
/// Pure and deterministic: no wall-clock or other ambient input, so the full
/// chain is reproducible from a replay of events.
pub fn advance(
    prev: &CommitmentHash,
    container: ContainerId,
    event: &CommitmentEvent,
) -> CommitmentHash {
    let mut hasher = Sha256::new();
    hasher.update(b"CASK_Commitment");
    hasher.update(prev.bytes());
    hasher.update(container.to_be_bytes());
    hasher.update([event.tag.byte()]);
    hasher.update(event.registry.bytes());
    event.payload.fold_into(&mut hasher);
    CommitmentHash(hasher.finalize().into())
}

/// A journaled mutation: the event plus the commitment it produced
///
/// Records are what external auditors replay against an independently kept
/// event log to verify a container's mutation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentRecord {
    /// The container this record belongs to
    pub container: ContainerId,

    /// Zero-based position of this record in the container's history
    pub sequence: u64,

    /// The mutation that was folded in
    pub event: CommitmentEvent,

    /// The commitment value after folding the event
    pub hash: CommitmentHash,
}

impl CommitmentRecord {
    /// Serialize the record for export to an external auditor
    pub fn to_bytes(&self) -> Result<Vec<u8>, CustodyError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a record exported with `to_bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CustodyError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Represents the result of verifying a commitment history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// The history replays to the expected final commitment
    Valid,

    /// The history is invalid for the specified reason
    Invalid(String),

    /// Missing data needed to complete verification
    MissingData(String),
}

/// Tracks the current commitment and the mutation journal per container
#[derive(Debug, Clone, Default)]
pub struct CommitmentEngine {
    current: HashMap<ContainerId, CommitmentHash>,
    history: HashMap<ContainerId, Vec<CommitmentRecord>>,
}

impl CommitmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the genesis commitment for a freshly minted container
    pub fn register(
        &mut self,
        ledger: &AssetAddress,
        container: ContainerId,
    ) -> Result<CommitmentHash, CustodyError> {
        if self.current.contains_key(&container) {
            return Err(CustodyError::Other(format!(
                "commitment already registered for {}",
                container
            )));
        }
        let hash = genesis(ledger, container);
        self.current.insert(container, hash);
        self.history.insert(container, Vec::new());
        Ok(hash)
    }

    /// Whether a container has a registered commitment
    pub fn is_registered(&self, container: ContainerId) -> bool {
        self.current.contains_key(&container)
    }

    /// The container's current commitment value
    pub fn current_hash(&self, container: ContainerId) -> Option<CommitmentHash> {
        self.current.get(&container).copied()
    }

    /// Fold one mutation into a container's commitment and journal it
    pub fn record(
        &mut self,
        container: ContainerId,
        event: CommitmentEvent,
    ) -> Result<CommitmentHash, CustodyError> {
        let prev = self
            .current
            .get(&container)
            .copied()
            .ok_or(CustodyError::UnknownContainer(container))?;
        let hash = advance(&prev, container, &event);
        let journal = self.history.entry(container).or_default();
        journal.push(CommitmentRecord {
            container,
            sequence: journal.len() as u64,
            event,
            hash,
        });
        self.current.insert(container, hash);
        Ok(hash)
    }

    /// The container's full journaled history, oldest first
    pub fn history(&self, container: ContainerId) -> Vec<CommitmentRecord> {
        self.history.get(&container).cloned().unwrap_or_default()
    }

    /// Snapshot (current hash, journal length) for a pre-operation checkpoint
    pub fn state(&self, container: ContainerId) -> Option<(CommitmentHash, usize)> {
        let hash = self.current.get(&container)?;
        let len = self.history.get(&container).map_or(0, |j| j.len());
        Some((*hash, len))
    }

    /// Restore a container's commitment state from a checkpoint
    pub fn restore(&mut self, container: ContainerId, hash: CommitmentHash, journal_len: usize) {
        self.current.insert(container, hash);
        if let Some(journal) = self.history.get_mut(&container) {
            journal.truncate(journal_len);
        }
    }

    /// Replay an exported history against the container's genesis value
    ///
    /// Verifies that sequence numbers are contiguous, that every record's hash
    /// chains correctly from its predecessor, and that the final record equals
    /// `expected` when one is provided.
    pub fn verify_history(
        ledger: &AssetAddress,
        container: ContainerId,
        records: &[CommitmentRecord],
        expected: Option<CommitmentHash>,
    ) -> VerificationResult {
        let mut prev = genesis(ledger, container);

        for (position, record) in records.iter().enumerate() {
            if record.container != container {
                return VerificationResult::Invalid(format!(
                    "record {} belongs to {}",
                    position, record.container
                ));
            }
            if record.sequence != position as u64 {
                return VerificationResult::MissingData(format!(
                    "expected sequence {}, found {}",
                    position, record.sequence
                ));
            }
            let computed = advance(&prev, container, &record.event);
            if computed != record.hash {
                return VerificationResult::Invalid(format!(
                    "commitment chain broken at sequence {}",
                    record.sequence
                ));
            }
            prev = computed;
        }

        if let Some(expected) = expected {
            if prev != expected {
                return VerificationResult::Invalid(
                    "replayed history does not reach the expected commitment".to_string(),
                );
            }
        }

        VerificationResult::Valid
    }
}
