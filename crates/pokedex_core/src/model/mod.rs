//! Domain model for the records collection.
//!
//! # Responsibility
//! - Define the open record shape stored under the collection prefix.
//! - Define the identifier type handed out by the allocator.
//!
//! # Invariants
//! - A record is always a JSON object; contents are otherwise unchecked.
//! - `id` and `createdAt` are owned by the repository at creation time.

pub mod record;
