//! Repository layer over the key-value store.
//!
//! # Responsibility
//! - Allocate record identifiers with store-level compare-and-set.
//! - Map create/get/list/update/delete onto store operations.
//!
//! # Invariants
//! - Records are stored at `("pokemons", id)`; nothing else writes there.
//! - Identifiers are never reused, even after delete.
//! - Repository APIs return semantic errors (`NotFound`, `EmptyCollection`,
//!   `InvalidId`) in addition to store transport errors.

pub mod allocator;
pub mod record_repo;
