// Braid common library - main library exports

pub mod crypto;
pub mod events;
pub mod hash;
pub mod messages;
pub mod params;
pub mod types;
pub mod wait_group;

// Flattened re-exports
pub use self::hash::{BlockHash, Hash, TxId};
pub use self::types::*;
