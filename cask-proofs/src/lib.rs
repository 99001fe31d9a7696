pub mod commitment;

// Re-export the main types for convenience
pub use commitment::{
    advance, genesis, CommitmentEngine, CommitmentEvent, CommitmentHash, CommitmentPayload,
    CommitmentRecord, EventTag, VerificationResult,
};
