//! Domain model shared by the store, journal, resolver and sync protocol.

mod item;
mod mutation;

pub use item::PantryItem;
pub use mutation::{ItemPatch, Mutation, MutationKind, MutationPayload};
