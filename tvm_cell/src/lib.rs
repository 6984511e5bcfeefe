//! Utilities and types for working with TON VM cells.
//!
//! Everything the TON VM stores or exchanges is a tree of [`Cell`][cell::Cell]s:
//! each cell holds up to 1023 data bits and up to 4 references to other
//! cells, and is identified by a SHA-256 hash over its content and the hashes
//! of its children.
//!
//! This crate covers what a client needs to talk to a lite server and check
//! its answers:
//! - building and reading cells ([`Builder`][builder::Builder],
//!   [`Slice`][slice::Slice]);
//! - the bag of cells wire format ([`boc`]);
//! - merkle proofs made of pruned branches, which hash like the subtrees they
//!   replace ([`merkle_proof`]);
//! - the `Hashmap` family of dictionaries ([`dict`]).

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod bits;
pub mod boc;
pub mod builder;
pub mod cell;
mod cell_hashing;
pub mod dict;
pub mod merkle_proof;
pub mod slice;

#[cfg(test)]
pub(crate) mod testing_utils;
