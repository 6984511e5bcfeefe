//! Creating and opening merkle proofs over cell trees.
//!
//! A proof is a copy of a tree in which every subtree the verifier does not
//! need is replaced with a pruned branch. Because a pruned branch hashes like
//! the subtree it replaced, the proof root has the same hash as the original
//! root, and the proof can be checked against that hash alone.

use log::trace;
use thiserror::Error;

use crate::cell::{Cell, CellError, CellHash, CellType, MAX_REFS};

/// The output type of merkle proof operations.
pub type MerkleProofResult<T> = Result<T, MerkleProofError>;

/// Errors that may occur when creating or opening a merkle proof.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum MerkleProofError {
    /// The cell is not a merkle proof cell.
    #[error("Expected a merkle proof cell, got a {0} cell!")]
    NotAProof(CellType),

    /// The proof commits to a different hash than the caller trusts.
    #[error("Merkle proof hash mismatch! (expected: {expected}, proof: {actual})")]
    HashMismatch {
        /// The trusted hash, hex encoded.
        expected: String,
        /// The hash committed to by the proof, hex encoded.
        actual: String,
    },

    /// A path to keep names a reference the tree does not have, or passes
    /// through a cell that is already pruned.
    #[error("Path {path:?} does not exist in the tree!")]
    InvalidPath {
        /// The offending path.
        path: Vec<u8>,
    },

    /// Rebuilding a cell of the proof failed.
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// Returns the virtual root of `proof` after checking that it hashes to
/// `expected_hash`.
pub fn unwrap_proof(proof: &Cell, expected_hash: &CellHash) -> MerkleProofResult<Cell> {
    let root = proof_root(proof)?;
    if root.hash() != expected_hash {
        return Err(MerkleProofError::HashMismatch {
            expected: hex::encode(expected_hash),
            actual: hex::encode(root.hash()),
        });
    }

    Ok(root)
}

/// Returns the virtual root of `proof` without checking it against anything.
pub fn proof_root(proof: &Cell) -> MerkleProofResult<Cell> {
    match proof.cell_type() {
        CellType::MerkleProof => Ok(proof.refs()[0].clone()),
        t => Err(MerkleProofError::NotAProof(t)),
    }
}

/// Creates a merkle proof of `root` that keeps every cell on `paths` and
/// prunes everything else.
///
/// A path is a sequence of reference indexes starting at `root`. Every cell
/// a path passes through or ends at keeps its data. References of kept cells
/// that no path follows become pruned branches. The root is always kept.
pub fn create_proof(root: &Cell, paths: &[&[u8]]) -> MerkleProofResult<Cell> {
    Ok(Cell::merkle_proof(prune(root, paths)?)?)
}

/// Like [`create_proof`], but returns the pruned tree without the merkle
/// proof wrapper.
pub fn prune(root: &Cell, paths: &[&[u8]]) -> MerkleProofResult<Cell> {
    let mut kept = KeptNode::default();
    for path in paths {
        kept.mark(path);
    }

    let pruned = prune_cell(root, &kept, 0, &mut Vec::new())?;
    trace!(
        "Pruned tree {} down to {} kept paths",
        hex::encode(root.hash()),
        paths.len()
    );

    Ok(pruned)
}

/// The set of kept paths, as a tree of reference indexes.
#[derive(Debug, Default)]
struct KeptNode {
    children: [Option<Box<KeptNode>>; MAX_REFS],
    /// Set for path indexes outside of `0..MAX_REFS`, which can never exist.
    invalid: Option<u8>,
}

impl KeptNode {
    fn mark(&mut self, path: &[u8]) {
        let Some((idx, rest)) = path.split_first() else {
            return;
        };

        match self.children.get_mut(*idx as usize) {
            Some(child) => child.get_or_insert_with(Default::default).mark(rest),
            None => self.invalid = Some(*idx),
        }
    }
}

/// Rebuilds `cell` keeping the `kept` paths. `merkle_depth` counts the merkle
/// cells between the proof root and `cell`; branches are pruned one level
/// above it.
fn prune_cell(
    cell: &Cell,
    kept: &KeptNode,
    merkle_depth: u8,
    path: &mut Vec<u8>,
) -> MerkleProofResult<Cell> {
    if let Some(idx) = kept.invalid {
        path.push(idx);
        return Err(MerkleProofError::InvalidPath { path: path.clone() });
    }

    let child_depth = match cell.cell_type() {
        CellType::MerkleProof | CellType::MerkleUpdate => merkle_depth + 1,
        _ => merkle_depth,
    };

    let mut refs = Vec::with_capacity(cell.refs().len());
    for (i, child) in cell.refs().iter().enumerate() {
        match &kept.children[i] {
            Some(next) => {
                path.push(i as u8);
                refs.push(prune_cell(child, next, child_depth, path)?);
                path.pop();
            }
            None => refs.push(prune_child(child, child_depth + 1)?),
        }
    }

    if let Some(i) = (cell.refs().len()..MAX_REFS).find(|i| kept.children[*i].is_some()) {
        path.push(i as u8);
        return Err(MerkleProofError::InvalidPath { path: path.clone() });
    }

    Ok(Cell::new(
        cell.cell_type(),
        cell.data().to_vec(),
        cell.bit_len(),
        refs,
    )?)
}

fn prune_child(child: &Cell, level: u8) -> MerkleProofResult<Cell> {
    match child.cell_type() {
        CellType::PrunedBranch => Ok(child.clone()),
        _ => Ok(Cell::pruned_branch(child, level)?),
    }
}
