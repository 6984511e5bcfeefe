//! Definitions for the core [`Cell`] type.
//!
//! A cell holds up to [`MAX_BITS`] bits of data and up to [`MAX_REFS`]
//! references to other cells. Cells are immutable once built and are shared
//! through an [`Arc`], so a tree of cells is really a DAG that is cheap to
//! clone and safe to send between threads.

use std::{
    fmt::{self, Debug, Display},
    sync::Arc,
};

use thiserror::Error;

use crate::{
    bits::{read_uint, to_tagged_hex},
    builder::Builder,
    cell_hashing::{hash_index, hashes_and_depths, mask_level, pruned_hash_count, MAX_LEVEL},
    slice::Slice,
};

/// Maximum number of data bits in a cell.
pub const MAX_BITS: u16 = 1023;

/// Maximum number of references in a cell.
pub const MAX_REFS: usize = 4;

/// Maximum depth of a cell tree.
pub const MAX_DEPTH: u16 = 1024;

/// A SHA-256 cell hash.
pub type CellHash = [u8; 32];

/// Size of a pruned branch storing `n` hashes and depths.
pub(crate) const fn pruned_branch_bits(n: usize) -> u16 {
    (8 + 8 + n * (256 + 16)) as u16
}

pub(crate) const MERKLE_PROOF_BITS: u16 = 8 + 256 + 16;
pub(crate) const MERKLE_UPDATE_BITS: u16 = 8 + 2 * 256 + 2 * 16;

/// Stores the result of cell operations. Returns a [`CellError`] upon
/// failure.
pub type CellResult<T> = Result<T, CellError>;

/// An error type for building and reading cells.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum CellError {
    /// Storing the bits would exceed [`MAX_BITS`].
    #[error("Cell data overflow! (have: {have}, storing: {storing}, max: {})", MAX_BITS)]
    BitsOverflow {
        /// Bits already in the builder.
        have: usize,
        /// Bits being stored.
        storing: usize,
    },

    /// Storing the reference would exceed [`MAX_REFS`].
    #[error("Cell reference overflow! (max: {})", MAX_REFS)]
    RefsOverflow,

    /// Tried to read more bits than remain in a slice.
    #[error("Not enough bits in slice! (requested: {requested}, remaining: {remaining})")]
    NotEnoughBits {
        /// Bits requested.
        requested: usize,
        /// Bits remaining.
        remaining: usize,
    },

    /// Tried to read a reference past the last one in a slice.
    #[error("No references left in slice!")]
    NotEnoughRefs,

    /// A value does not fit in the requested bit width.
    #[error("Value does not fit in {bits} bits!")]
    IntegerOverflow {
        /// The requested width.
        bits: usize,
    },

    /// Cell data does not form a valid exotic cell.
    #[error("Invalid exotic cell: {0}")]
    InvalidExotic(&'static str),

    /// Tried to read an exotic cell as if it were ordinary.
    #[error("Cannot parse a {0} cell as an ordinary cell!")]
    ExoticAccess(CellType),

    /// The cell tree is deeper than [`MAX_DEPTH`].
    #[error("Cell tree depth exceeds {}!", MAX_DEPTH)]
    DepthOverflow,
}

/// The kind of a cell. Everything but [`CellType::Ordinary`] is exotic, and
/// exotic cells carry their type in the first byte of their data.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CellType {
    /// A plain data cell.
    Ordinary,

    /// Stands in for a subtree that was cut out of a proof. Carries the hash
    /// and depth of the subtree it replaces.
    PrunedBranch,

    /// Wraps a (partially pruned) tree and commits to its hash.
    MerkleProof,

    /// Commits to the hashes of an old and a new version of a tree.
    MerkleUpdate,
}

impl CellType {
    /// The type byte of an exotic cell, or `None` for ordinary cells.
    pub const fn exotic_tag(&self) -> Option<u8> {
        match self {
            CellType::Ordinary => None,
            CellType::PrunedBranch => Some(1),
            CellType::MerkleProof => Some(3),
            CellType::MerkleUpdate => Some(4),
        }
    }

    /// The exotic cell type with the given type byte.
    pub const fn from_exotic_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(CellType::PrunedBranch),
            3 => Some(CellType::MerkleProof),
            4 => Some(CellType::MerkleUpdate),
            _ => None,
        }
    }

    /// Returns `true` for every type except [`CellType::Ordinary`].
    pub const fn is_exotic(&self) -> bool {
        !matches!(self, CellType::Ordinary)
    }
}

impl Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CellType::Ordinary => "Ordinary",
            CellType::PrunedBranch => "PrunedBranch",
            CellType::MerkleProof => "MerkleProof",
            CellType::MerkleUpdate => "MerkleUpdate",
        };

        write!(f, "{}", s)
    }
}

struct CellInner {
    cell_type: CellType,
    data: Vec<u8>,
    bit_len: u16,
    refs: Vec<Cell>,
    level_mask: u8,
    /// Distinct hashes, lowest level first.
    hashes: Vec<CellHash>,
    /// Depths matching `hashes`.
    depths: Vec<u16>,
}

/// An immutable, reference counted cell.
///
/// Cloning a `Cell` only bumps a reference count.
#[derive(Clone)]
pub struct Cell(Arc<CellInner>);

impl Cell {
    /// Builds a cell, validating exotic layouts and computing its hash.
    ///
    /// `data` must not carry set bits past `bit_len`.
    pub(crate) fn new(
        cell_type: CellType,
        data: Vec<u8>,
        bit_len: u16,
        refs: Vec<Cell>,
    ) -> CellResult<Self> {
        if bit_len > MAX_BITS {
            return Err(CellError::BitsOverflow {
                have: 0,
                storing: bit_len as usize,
            });
        }
        if refs.len() > MAX_REFS {
            return Err(CellError::RefsOverflow);
        }

        let children_mask = refs.iter().fold(0, |m, c| m | c.level_mask());
        let level_mask = match cell_type {
            CellType::Ordinary => children_mask,
            CellType::PrunedBranch => validate_pruned_branch(&data, bit_len, &refs)?,
            CellType::MerkleProof => {
                validate_merkle_proof(&data, bit_len, &refs)?;
                children_mask >> 1
            }
            CellType::MerkleUpdate => {
                validate_merkle_update(&data, bit_len, &refs)?;
                children_mask >> 1
            }
        };

        let (hashes, depths) = hashes_and_depths(cell_type, level_mask, &data, bit_len, &refs)?;

        Ok(Self(Arc::new(CellInner {
            cell_type,
            data,
            bit_len,
            refs,
            level_mask,
            hashes,
            depths,
        })))
    }

    /// A cell with no data and no references.
    pub fn empty() -> Self {
        Self::new(CellType::Ordinary, Vec::new(), 0, Vec::new())
            .expect("an empty cell is always valid")
    }

    /// Creates a pruned branch that stands in for `cell` in a proof.
    ///
    /// `level` is the number of merkle cells above the branch plus one, and
    /// must be above the level of `cell`.
    pub fn pruned_branch(cell: &Cell, level: u8) -> CellResult<Self> {
        if level == 0 || level > MAX_LEVEL || level <= cell.level() {
            return Err(CellError::InvalidExotic("pruned branch level out of range"));
        }

        let mut b = Builder::new();
        b.store_u8(1)?.store_u8(cell.level_mask() | (1 << (level - 1)))?;
        for h in &cell.0.hashes {
            b.store_bytes(h)?;
        }
        for d in &cell.0.depths {
            b.store_u16(*d)?;
        }

        b.build_exotic()
    }

    /// Wraps `root` (usually a tree with pruned subtrees) in a merkle proof
    /// cell committing to its hash.
    pub fn merkle_proof(root: Cell) -> CellResult<Self> {
        let mut b = Builder::new();
        b.store_u8(3)?
            .store_bytes(root.hash())?
            .store_u16(root.depth())?
            .store_ref(root)?;

        b.build_exotic()
    }

    /// Creates a merkle update cell from `old` to `new`.
    pub fn merkle_update(old: Cell, new: Cell) -> CellResult<Self> {
        let mut b = Builder::new();
        b.store_u8(4)?
            .store_bytes(old.hash())?
            .store_bytes(new.hash())?
            .store_u16(old.depth())?
            .store_u16(new.depth())?
            .store_ref(old)?
            .store_ref(new)?;

        b.build_exotic()
    }

    /// The type of this cell.
    pub fn cell_type(&self) -> CellType {
        self.0.cell_type
    }

    /// Returns `true` if this cell is not ordinary.
    pub fn is_exotic(&self) -> bool {
        self.0.cell_type.is_exotic()
    }

    /// The packed data bytes. Bits past [`Cell::bit_len`] are zero.
    pub fn data(&self) -> &[u8] {
        &self.0.data
    }

    /// Number of data bits.
    pub fn bit_len(&self) -> u16 {
        self.0.bit_len
    }

    /// All references, in order.
    pub fn refs(&self) -> &[Cell] {
        &self.0.refs
    }

    /// The reference at `idx`, if there is one.
    pub fn reference(&self, idx: usize) -> Option<&Cell> {
        self.0.refs.get(idx)
    }

    /// The level mask, used in bag of cells descriptors. Bit `i` is set when
    /// the cell has a distinct hash at level `i + 1`.
    pub fn level_mask(&self) -> u8 {
        self.0.level_mask
    }

    /// The level of the cell: how many merkle cells it needs above it before
    /// all of its pruned branches are accounted for.
    pub fn level(&self) -> u8 {
        mask_level(self.0.level_mask)
    }

    /// The hash of the cell as seen from `level`. Levels above
    /// [`Cell::level`] all give the representation hash.
    pub fn hash_at(&self, level: u8) -> &CellHash {
        &self.0.hashes[hash_index(self.0.level_mask, level)]
    }

    /// The depth of the tree below this cell as seen from `level`.
    pub fn depth_at(&self, level: u8) -> u16 {
        self.0.depths[hash_index(self.0.level_mask, level)]
    }

    /// The level `0` hash of the cell. For a pruned branch this is the hash of
    /// the subtree it replaced.
    pub fn hash(&self) -> &CellHash {
        self.hash_at(0)
    }

    /// Depth of the tree below this cell (`0` for a cell without references).
    pub fn depth(&self) -> u16 {
        self.depth_at(0)
    }

    /// The hash of the cell as it is actually stored, pruned branches
    /// included. Differs from [`Cell::hash`] only for cells with a non-zero
    /// level.
    pub fn repr_hash(&self) -> &CellHash {
        self.hash_at(MAX_LEVEL)
    }

    /// Begins reading an ordinary cell.
    ///
    /// Exotic cells can not be read this way: their data is not contract
    /// data, and a pruned branch has none of the data it stands in for.
    pub fn parse(&self) -> CellResult<Slice> {
        match self.cell_type() {
            CellType::Ordinary => Ok(Slice::new(self.clone())),
            t => Err(CellError::ExoticAccess(t)),
        }
    }

    /// Begins reading the raw data of any cell, exotic or not.
    pub fn parse_exotic(&self) -> Slice {
        Slice::new(self.clone())
    }

    /// Copies the cell's data and references into a new builder.
    pub fn to_builder(&self) -> Builder {
        Builder::from_parts(self.data(), self.bit_len(), self.refs())
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let marker = match self.cell_type() {
            CellType::Ordinary => "",
            CellType::PrunedBranch => "p",
            CellType::MerkleProof => "m",
            CellType::MerkleUpdate => "u",
        };
        writeln!(
            f,
            "{:indent$}{}x{{{}}}",
            "",
            marker,
            to_tagged_hex(self.data(), self.bit_len() as usize),
            indent = indent
        )?;

        for c in self.refs() {
            c.fmt_tree(f, indent + 1)?;
        }

        Ok(())
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

/// Two cells are equal when they have the same representation hash, so a
/// pruned subtree never equals the full one.
impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.repr_hash() == other.repr_hash()
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.repr_hash().hash(state);
    }
}

impl Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("type", &self.cell_type())
            .field(
                "data",
                &to_tagged_hex(self.data(), self.bit_len() as usize),
            )
            .field("refs", &self.refs().len())
            .field("hash", &hex::encode(self.hash()))
            .finish()
    }
}

/// Prints the whole tree, one cell per line, children indented.
impl Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

/// Returns the level mask stored in a pruned branch.
fn validate_pruned_branch(data: &[u8], bit_len: u16, refs: &[Cell]) -> CellResult<u8> {
    if bit_len < 16 || !refs.is_empty() {
        return Err(CellError::InvalidExotic("pruned branch has the wrong size"));
    }

    let mask = data[1];
    if mask == 0 || mask_level(mask) > MAX_LEVEL {
        return Err(CellError::InvalidExotic(
            "pruned branch level mask out of range",
        ));
    }
    if bit_len != pruned_branch_bits(pruned_hash_count(mask)) {
        return Err(CellError::InvalidExotic("pruned branch has the wrong size"));
    }

    Ok(mask)
}

fn validate_merkle_proof(data: &[u8], bit_len: u16, refs: &[Cell]) -> CellResult<()> {
    if bit_len != MERKLE_PROOF_BITS || refs.len() != 1 {
        return Err(CellError::InvalidExotic("merkle proof has the wrong size"));
    }
    check_commitment(data, 1, 1 + 32, &refs[0])
}

fn validate_merkle_update(data: &[u8], bit_len: u16, refs: &[Cell]) -> CellResult<()> {
    if bit_len != MERKLE_UPDATE_BITS || refs.len() != 2 {
        return Err(CellError::InvalidExotic("merkle update has the wrong size"));
    }
    check_commitment(data, 1, 1 + 64, &refs[0])?;
    check_commitment(data, 1 + 32, 1 + 64 + 2, &refs[1])
}

/// Checks that the hash at byte `hash_offset` and the depth at byte
/// `depth_offset` of `data` describe `child`.
fn check_commitment(
    data: &[u8],
    hash_offset: usize,
    depth_offset: usize,
    child: &Cell,
) -> CellResult<()> {
    if &data[hash_offset..hash_offset + 32] != child.hash() {
        return Err(CellError::InvalidExotic(
            "stored hash does not match the referenced cell",
        ));
    }
    if read_uint(data, depth_offset * 8, 16) as u16 != child.depth() {
        return Err(CellError::InvalidExotic(
            "stored depth does not match the referenced cell",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cell, CellError, CellType};
    use crate::{builder::Builder, testing_utils::common_setup};

    #[test]
    fn equal_content_means_equal_cells() {
        common_setup();

        let a = Builder::new().store_u32(5).unwrap().build().unwrap();
        let b = Builder::new().store_u32(5).unwrap().build().unwrap();
        let c = Builder::new().store_u32(6).unwrap().build().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn pruned_branch_is_not_equal_to_what_it_replaces() {
        common_setup();

        let a = Builder::new().store_u32(5).unwrap().build().unwrap();
        let p = Cell::pruned_branch(&a, 1).unwrap();

        assert_eq!(a.hash(), p.hash());
        assert_eq!(p.cell_type(), CellType::PrunedBranch);
        assert_ne!(a, p);
    }

    #[test]
    fn exotic_cells_can_not_be_parsed_as_ordinary() {
        common_setup();

        let p = Cell::pruned_branch(&Cell::empty(), 1).unwrap();
        assert_eq!(
            p.parse().unwrap_err(),
            CellError::ExoticAccess(CellType::PrunedBranch)
        );

        // Raw access still works.
        assert_eq!(p.parse_exotic().load_u8().unwrap(), 1);
    }

    #[test]
    fn merkle_proof_with_wrong_hash_is_rejected() {
        common_setup();

        let root = Builder::new().store_u8(1).unwrap().build().unwrap();
        let mut b = Builder::new();
        b.store_u8(3).unwrap();
        b.store_bytes(&[0; 32]).unwrap();
        b.store_u16(root.depth()).unwrap();
        b.store_ref(root).unwrap();

        assert!(matches!(
            b.build_exotic(),
            Err(CellError::InvalidExotic(_))
        ));
    }

    #[test]
    fn merkle_update_commits_to_both_sides() {
        common_setup();

        let old = Builder::new().store_u8(1).unwrap().build().unwrap();
        let new = Builder::new().store_u8(2).unwrap().build().unwrap();
        let upd = Cell::merkle_update(old.clone(), new.clone()).unwrap();

        let mut s = upd.parse_exotic();
        assert_eq!(s.load_u8().unwrap(), 4);
        assert_eq!(&s.load_hash().unwrap(), old.hash());
        assert_eq!(&s.load_hash().unwrap(), new.hash());
    }

    #[test]
    fn level_mask_propagates_from_pruned_children() {
        common_setup();

        let inner = Builder::new().store_u8(9).unwrap().build().unwrap();
        let parent = Builder::new()
            .store_ref(Cell::pruned_branch(&inner, 1).unwrap())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(parent.level_mask(), 1);
        assert_eq!(Cell::merkle_proof(parent).unwrap().level_mask(), 0);
    }

    #[test]
    fn pruned_branch_of_two_levels() {
        common_setup();

        let h0 = [0x11; 32];
        let h1 = [0x22; 32];
        let mut b = Builder::new();
        b.store_u8(1).unwrap().store_u8(3).unwrap();
        b.store_bytes(&h0).unwrap().store_bytes(&h1).unwrap();
        b.store_u16(5).unwrap().store_u16(4).unwrap();
        let p = b.build_exotic().unwrap();

        assert_eq!(p.bit_len(), 16 + 2 * (256 + 16));
        assert_eq!(p.level_mask(), 3);
        assert_eq!(p.level(), 2);
        assert_eq!(p.hash_at(0), &h0);
        assert_eq!(p.hash_at(1), &h1);
        assert_eq!((p.depth_at(0), p.depth_at(1)), (5, 4));
        assert_eq!(p.depth_at(2), 0);
        assert_ne!(p.repr_hash(), &h1);
    }

    #[test]
    fn pruned_branch_size_must_match_its_mask() {
        common_setup();

        // Mask 3 needs two hashes, only one is stored.
        let mut b = Builder::new();
        b.store_u8(1).unwrap().store_u8(3).unwrap();
        b.store_bytes(&[0; 32]).unwrap().store_u16(0).unwrap();
        assert!(matches!(b.build_exotic(), Err(CellError::InvalidExotic(_))));

        let mut b = Builder::new();
        b.store_u8(1).unwrap().store_u8(0).unwrap();
        assert!(matches!(b.build_exotic(), Err(CellError::InvalidExotic(_))));
    }

    #[test]
    fn pruned_branch_level_must_exceed_the_cells() {
        common_setup();

        let p = Cell::pruned_branch(&Cell::empty(), 1).unwrap();
        assert!(Cell::pruned_branch(&p, 1).is_err());
        assert!(Cell::pruned_branch(&Cell::empty(), 0).is_err());
        assert!(Cell::pruned_branch(&Cell::empty(), 4).is_err());

        let pp = Cell::pruned_branch(&p, 2).unwrap();
        assert_eq!(pp.level_mask(), 3);
        assert_eq!(pp.hash_at(0), Cell::empty().hash());
        assert_eq!(pp.hash_at(1), p.repr_hash());
    }

    #[test]
    fn full_and_pruned_twins_are_different_cells() {
        common_setup();

        let leaf = Builder::new().store_u8(9).unwrap().build().unwrap();
        let full = Builder::new().store_ref(leaf.clone()).unwrap().build().unwrap();
        let twin = Builder::new()
            .store_ref(Cell::pruned_branch(&leaf, 1).unwrap())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(full.hash(), twin.hash());
        assert_ne!(full, twin);

        let set: std::collections::HashSet<_> = [full, twin].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display_prints_the_tree() {
        common_setup();

        let child = Builder::new().store_u8(0xab).unwrap().build().unwrap();
        let root = Builder::new()
            .store_u8(0x01)
            .unwrap()
            .store_ref(child)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(root.to_string(), "x{01}\n x{ab}\n");
    }
}
