pub mod identity;
pub mod session;

pub use identity::{IdentityError, WalletAddress};
pub use session::{SessionToken, StakeCookie};
