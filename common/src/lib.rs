pub mod config;
pub mod messages;
pub mod models;
pub mod tokens;
pub mod utils;

pub use config::*;
pub use messages::*;
pub use tokens::{TokenError, TokenManager};
pub use utils::*;
