// auth-gateway/src/signature/mod.rs
pub mod contract_wallet;
pub mod recovery;

pub use contract_wallet::{ContractWalletVerifier, JsonRpcContractVerifier};
pub use recovery::{recover, RecoveryOutcome, RecoveryStage};
