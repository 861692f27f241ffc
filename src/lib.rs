#![doc = include_str!("../README.md")]

pub mod constant;
pub mod types;
pub use types::{sha512_half, Item, Key, NodeHash, NodeId};
pub mod node;
pub use node::{InnerNode, LeafNode};
pub mod store;
pub use store::DirtyNodes;
pub mod map;
pub use map::{AuthMap, FatResponse, MapError, MapState};

#[cfg(test)]
pub mod fuzz;
