pub mod activation;
pub mod deposit;
pub mod error;
pub mod params;
pub mod proposal;
pub mod scdb;
pub mod sidechain;
pub mod types;
pub mod undo;
pub mod vote;
pub mod withdrawal;

pub use crate::error::Error;
pub use crate::params::Params;
pub use crate::scdb::{BlockReport, BlockUpdate, ConnectedBlock, Scdb};
pub use crate::undo::BlockUndo;

// Sidechain State Machine
pub trait SSM {
    type Block;
    type Undo;
    type Error;

    fn connect(&mut self, block: &Self::Block) -> Result<Self::Undo, Self::Error>;
    fn disconnect(&mut self, undo: Self::Undo) -> Result<(), Self::Error>;
}

/// Checks a block against a state without changing it.
pub trait Validator {
    type State: SSM;
    type Error;

    fn validate(&self, block: &<Self::State as SSM>::Block) -> Result<(), Self::Error>;
}
