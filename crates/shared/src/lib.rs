pub mod domain;
pub mod error;
pub mod protocol;
pub mod quantity;

pub use alloy_primitives::{Address, U256};
