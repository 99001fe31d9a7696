pub mod engine;
pub mod mock_registries;
pub mod registry;
pub mod resolver;

// Re-export the main types for convenience
pub use engine::CustodyLedger;
pub use registry::{
    AssetReceiver, FundsRegistry, IdentityLedger, ItemRegistry, RegistryDirectory, SemiRegistry,
};

pub use mock_registries::{
    AcceptingReceiver, InMemoryFundsRegistry, InMemoryIdentityLedger, InMemoryItemRegistry,
    InMemorySemiRegistry, RejectingReceiver,
};

// Re-export the verification surface from cask-proofs
pub use cask_proofs::VerificationResult;
