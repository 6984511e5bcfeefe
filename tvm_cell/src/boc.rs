//! Serialization of cell trees to and from the "bag of cells" (BOC) format.
//!
//! A BOC lists every distinct cell of one or more trees exactly once, parents
//! before children, with references encoded as indexes into that list.

use std::collections::{HashMap, HashSet};

use log::trace;
use thiserror::Error;

use crate::{
    bits::{bytes_for_bits, strip_completion_tag, with_completion_tag},
    cell::{Cell, CellError, CellType},
    cell_hashing::descriptors,
};

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

const FLAG_HAS_IDX: u8 = 0x80;
const FLAG_HAS_CRC32C: u8 = 0x40;
const FLAG_HAS_CACHE_BITS: u8 = 0x20;
const SIZE_MASK: u8 = 0x07;

/// Set in `d1` when a cell is followed by its stored hashes.
const D1_WITH_HASHES: u8 = 0x10;

/// The result type of BOC operations.
pub type BocResult<T> = Result<T, BocError>;

/// Errors that may occur while decoding a BOC.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum BocError {
    /// The input does not start with the BOC magic.
    #[error("Not a bag of cells! (magic: {0})")]
    InvalidMagic(String),

    /// The input ended before the structure it describes.
    #[error("Unexpected end of BOC data! (needed: {needed}, have: {have})")]
    UnexpectedEof {
        /// Bytes needed to continue.
        needed: usize,
        /// Bytes left.
        have: usize,
    },

    /// A header field holds an unsupported or inconsistent value.
    #[error("Invalid BOC header: {0}")]
    InvalidHeader(&'static str),

    /// The BOC has a different number of roots than the caller asked for.
    #[error("Expected a single root, BOC has {0}!")]
    RootCount(usize),

    /// The stored CRC32-C does not match the data.
    #[error("BOC checksum mismatch! (stored: {stored:#010x}, computed: {computed:#010x})")]
    ChecksumMismatch {
        /// Checksum found in the input.
        stored: u32,
        /// Checksum of the data.
        computed: u32,
    },

    /// A cell references a cell that does not come after it.
    #[error("Cell {cell} has an invalid reference to cell {child}!")]
    InvalidReference {
        /// Index of the referencing cell.
        cell: usize,
        /// The referenced index.
        child: usize,
    },

    /// A cell's descriptor or data is malformed.
    #[error("Cell {idx} is malformed: {reason}")]
    InvalidCellData {
        /// Index of the cell.
        idx: usize,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A cell could not be rebuilt from its serialized parts.
    #[error("Cell {idx} is invalid: {source}")]
    InvalidCell {
        /// Index of the cell.
        idx: usize,
        /// The underlying cell error.
        #[source]
        source: CellError,
    },

    /// Bytes were left over after the last field.
    #[error("{0} trailing bytes after the bag of cells!")]
    TrailingData(usize),
}

/// Optional parts of a serialized BOC.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BocOptions {
    /// Include the cell offset index.
    pub index: bool,
    /// Append a CRC32-C of everything before it.
    pub crc32c: bool,
}

/// Serializes a single tree without index and without checksum.
pub fn to_boc(root: &Cell) -> Vec<u8> {
    to_boc_multi_root(std::slice::from_ref(root), BocOptions::default())
}

/// Serializes a single tree with the given options.
pub fn to_boc_with_options(root: &Cell, opts: BocOptions) -> Vec<u8> {
    to_boc_multi_root(std::slice::from_ref(root), opts)
}

/// Serializes several trees into one BOC. Cells shared between (or within)
/// the trees are written once.
pub fn to_boc_multi_root(roots: &[Cell], opts: BocOptions) -> Vec<u8> {
    let order = topological_order(roots);
    let idx_of: HashMap<&Cell, usize> = order.iter().enumerate().map(|(i, c)| (*c, i)).collect();

    let size_bytes = min_bytes(order.len() as u64);

    let mut cells_data = Vec::new();
    let mut offsets = Vec::with_capacity(order.len());
    for c in order.iter() {
        cells_data.extend_from_slice(&descriptors(
            c.refs().len(),
            c.is_exotic(),
            c.level_mask(),
            c.bit_len(),
        ));
        cells_data.extend(with_completion_tag(c.data(), c.bit_len() as usize));
        for r in c.refs() {
            write_uint(&mut cells_data, idx_of[r] as u64, size_bytes);
        }
        offsets.push(cells_data.len() as u64);
    }

    let off_bytes = min_bytes(cells_data.len() as u64);

    let mut flags = size_bytes as u8;
    if opts.index {
        flags |= FLAG_HAS_IDX;
    }
    if opts.crc32c {
        flags |= FLAG_HAS_CRC32C;
    }

    let mut out = Vec::with_capacity(cells_data.len() + 32);
    out.extend_from_slice(&BOC_MAGIC);
    out.push(flags);
    out.push(off_bytes as u8);
    write_uint(&mut out, order.len() as u64, size_bytes);
    write_uint(&mut out, roots.len() as u64, size_bytes);
    write_uint(&mut out, 0, size_bytes);
    write_uint(&mut out, cells_data.len() as u64, off_bytes);
    for r in roots {
        write_uint(&mut out, idx_of[r] as u64, size_bytes);
    }
    if opts.index {
        for off in offsets {
            write_uint(&mut out, off, off_bytes);
        }
    }
    out.extend(cells_data);

    if opts.crc32c {
        let crc = crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
    }

    trace!(
        "Serialized {} cells from {} roots into {} bytes",
        order.len(),
        roots.len(),
        out.len()
    );

    out
}

/// Deserializes a BOC that must hold exactly one root.
pub fn from_boc(data: &[u8]) -> BocResult<Cell> {
    let mut roots = from_boc_multi_root(data)?;
    match roots.len() {
        1 => Ok(roots.remove(0)),
        n => Err(BocError::RootCount(n)),
    }
}

/// Deserializes a BOC, returning its roots in the order they are listed.
pub fn from_boc_multi_root(data: &[u8]) -> BocResult<Vec<Cell>> {
    let mut r = Reader { data, pos: 0 };

    let magic = r.take(4)?;
    if magic != BOC_MAGIC {
        return Err(BocError::InvalidMagic(hex::encode(magic)));
    }

    let flags = r.take(1)?[0];
    let has_idx = flags & FLAG_HAS_IDX != 0;
    let has_crc = flags & FLAG_HAS_CRC32C != 0;
    let has_cache_bits = flags & FLAG_HAS_CACHE_BITS != 0;
    let size_bytes = (flags & SIZE_MASK) as usize;
    if size_bytes == 0 || size_bytes > 4 {
        return Err(BocError::InvalidHeader("reference size must be 1 to 4 bytes"));
    }
    if has_cache_bits && !has_idx {
        return Err(BocError::InvalidHeader("cache bits require an index"));
    }

    let off_bytes = r.take(1)?[0] as usize;
    if off_bytes == 0 || off_bytes > 8 {
        return Err(BocError::InvalidHeader("offset size must be 1 to 8 bytes"));
    }

    let cell_count = r.uint(size_bytes)? as usize;
    let root_count = r.uint(size_bytes)? as usize;
    let absent_count = r.uint(size_bytes)? as usize;
    let total_size = r.uint(off_bytes)? as usize;

    if root_count == 0 {
        return Err(BocError::InvalidHeader("no roots"));
    }
    if root_count > cell_count {
        return Err(BocError::InvalidHeader("more roots than cells"));
    }
    if absent_count != 0 {
        return Err(BocError::InvalidHeader("absent cells are not supported"));
    }

    let root_idxs = (0..root_count)
        .map(|_| r.uint(size_bytes).map(|v| v as usize))
        .collect::<BocResult<Vec<_>>>()?;
    if root_idxs.iter().any(|i| *i >= cell_count) {
        return Err(BocError::InvalidHeader("root index out of range"));
    }

    if has_idx {
        r.take(cell_count * off_bytes)?;
    }

    let cells_data = r.take(total_size)?;
    if cell_count > cells_data.len() / 2 {
        return Err(BocError::InvalidHeader("more cells than the data can hold"));
    }

    if has_crc {
        let body_len = r.pos;
        let stored = u32::from_le_bytes(
            r.take(4)?
                .try_into()
                .map_err(|_| BocError::InvalidHeader("short checksum"))?,
        );
        let computed = crc32c(&data[..body_len]);
        if stored != computed {
            return Err(BocError::ChecksumMismatch { stored, computed });
        }
    }

    if r.pos != data.len() {
        return Err(BocError::TrailingData(data.len() - r.pos));
    }

    let cells = parse_cells(cells_data, cell_count, size_bytes)?;
    trace!(
        "Deserialized {} cells with {} roots from {} bytes",
        cell_count,
        root_count,
        data.len()
    );

    Ok(root_idxs.into_iter().map(|i| cells[i].clone()).collect())
}

struct RawCell<'a> {
    exotic: bool,
    level_mask: u8,
    data: &'a [u8],
    padded: bool,
    refs: Vec<usize>,
}

fn parse_cells(data: &[u8], cell_count: usize, size_bytes: usize) -> BocResult<Vec<Cell>> {
    let mut r = Reader { data, pos: 0 };
    let mut raw = Vec::with_capacity(cell_count);

    for idx in 0..cell_count {
        let d = r.take(2)?;
        let (d1, d2) = (d[0], d[1]);

        let ref_count = (d1 & 0x07) as usize;
        if ref_count > 4 {
            return Err(BocError::InvalidCellData {
                idx,
                reason: "more than four references",
            });
        }
        if d1 & D1_WITH_HASHES != 0 {
            return Err(BocError::InvalidCellData {
                idx,
                reason: "stored hashes are not supported",
            });
        }

        let data_len = (d2 as usize).div_ceil(2);
        let cell_data = r.take(data_len)?;

        let refs = (0..ref_count)
            .map(|_| r.uint(size_bytes).map(|v| v as usize))
            .collect::<BocResult<Vec<_>>>()?;
        if let Some(child) = refs.iter().find(|c| **c <= idx || **c >= cell_count) {
            return Err(BocError::InvalidReference { cell: idx, child: *child });
        }

        raw.push(RawCell {
            exotic: d1 & 0x08 != 0,
            level_mask: d1 >> 5,
            data: cell_data,
            padded: d2 % 2 == 1,
            refs,
        });
    }

    if r.pos != data.len() {
        return Err(BocError::InvalidHeader("cell data size does not match the header"));
    }

    // References always point forward, so building from the back means every
    // child exists before its parent.
    let mut built: Vec<Option<Cell>> = vec![None; cell_count];
    for (idx, rc) in raw.iter().enumerate().rev() {
        let refs = rc
            .refs
            .iter()
            .map(|c| built[*c].clone())
            .collect::<Option<Vec<_>>>()
            .ok_or(BocError::InvalidReference { cell: idx, child: idx })?;

        built[idx] = Some(build_cell(idx, rc, refs)?);
    }

    Ok(built.into_iter().flatten().collect())
}

fn build_cell(idx: usize, rc: &RawCell, refs: Vec<Cell>) -> BocResult<Cell> {
    let bit_len = match rc.padded {
        true => strip_completion_tag(rc.data).ok_or(BocError::InvalidCellData {
            idx,
            reason: "missing completion tag",
        })?,
        false => rc.data.len() * 8,
    };
    let mut data = rc.data[..bytes_for_bits(bit_len)].to_vec();
    if bit_len % 8 != 0 {
        let last = data.len() - 1;
        data[last] &= 0xff << (8 - bit_len % 8);
    }

    let cell_type = match rc.exotic {
        false => CellType::Ordinary,
        true => data
            .first()
            .and_then(|t| CellType::from_exotic_tag(*t))
            .ok_or(BocError::InvalidCellData {
                idx,
                reason: "unknown exotic cell type",
            })?,
    };

    let cell = Cell::new(cell_type, data, bit_len as u16, refs)
        .map_err(|source| BocError::InvalidCell { idx, source })?;

    if cell.level_mask() != rc.level_mask {
        return Err(BocError::InvalidCellData {
            idx,
            reason: "level mask does not match the cell",
        });
    }

    Ok(cell)
}

/// Lists the distinct cells of `roots` so that every cell comes before all
/// of the cells it references.
fn topological_order(roots: &[Cell]) -> Vec<&Cell> {
    fn visit<'a>(c: &'a Cell, seen: &mut HashSet<&'a Cell>, out: &mut Vec<&'a Cell>) {
        if !seen.insert(c) {
            return;
        }
        for r in c.refs() {
            visit(r, seen, out);
        }
        out.push(c);
    }

    let mut seen = HashSet::new();
    let mut post_order = Vec::new();
    for root in roots.iter().rev() {
        visit(root, &mut seen, &mut post_order);
    }

    post_order.reverse();
    post_order
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> BocResult<&'a [u8]> {
        let have = self.data.len() - self.pos;
        if n > have {
            return Err(BocError::UnexpectedEof { needed: n, have });
        }

        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn uint(&mut self, n: usize) -> BocResult<u64> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0, |acc, b| (acc << 8) | *b as u64))
    }
}

/// Smallest number of bytes (at least one) that holds `v`.
fn min_bytes(v: u64) -> usize {
    (((64 - v.leading_zeros()) as usize).div_ceil(8)).max(1)
}

fn write_uint(out: &mut Vec<u8>, v: u64, bytes: usize) {
    out.extend_from_slice(&v.to_be_bytes()[8 - bytes..]);
}

/// CRC-32C (Castagnoli), as used by the BOC checksum.
pub(crate) fn crc32c(data: &[u8]) -> u32 {
    const POLY: u32 = 0x82f6_3b78;

    let mut crc = !0u32;
    for b in data {
        crc ^= *b as u32;
        for _ in 0..8 {
            crc = match crc & 1 {
                1 => (crc >> 1) ^ POLY,
                _ => crc >> 1,
            };
        }
    }

    !crc
}

#[cfg(test)]
mod tests {
    use super::{
        crc32c, from_boc, from_boc_multi_root, to_boc, to_boc_multi_root, to_boc_with_options,
        BocError, BocOptions,
    };
    use crate::{
        builder::Builder,
        cell::{Cell, CellType},
        testing_utils::{common_setup, random_tree},
    };

    fn sample_tree() -> Cell {
        let shared = Builder::new().store_u32(0xcafe_babe).unwrap().build().unwrap();
        let left = Builder::new()
            .store_uint(5, 3)
            .unwrap()
            .store_ref(shared.clone())
            .unwrap()
            .build()
            .unwrap();

        Builder::new()
            .store_u8(0x42)
            .unwrap()
            .store_ref(left)
            .unwrap()
            .store_ref(shared)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn crc32c_matches_known_vector() {
        assert_eq!(crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn empty_cell_has_a_fixed_encoding() {
        common_setup();

        assert_eq!(
            hex::encode(to_boc(&Cell::empty())),
            "b5ee9c72010101010002000000"
        );
    }

    #[test]
    fn single_root_round_trips_and_dedupes() {
        common_setup();

        let root = sample_tree();
        let boc = to_boc(&root);
        let back = from_boc(&boc).unwrap();

        assert_eq!(back, root);
        assert_eq!(back.to_string(), root.to_string());
        // Four references but only three distinct cells.
        assert_eq!(boc[6], 3);
    }

    #[test]
    fn index_and_checksum_round_trip() {
        common_setup();

        let root = sample_tree();
        let opts = BocOptions {
            index: true,
            crc32c: true,
        };

        let boc = to_boc_with_options(&root, opts);
        assert_eq!(from_boc(&boc).unwrap(), root);
    }

    #[test]
    fn random_trees_round_trip() {
        common_setup();

        for seed in 0..20 {
            let root = random_tree(seed);
            assert_eq!(from_boc(&to_boc(&root)).unwrap(), root);
        }
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        common_setup();

        let mut boc = to_boc_with_options(
            &sample_tree(),
            BocOptions {
                index: false,
                crc32c: true,
            },
        );
        let mid = boc.len() / 2;
        boc[mid] ^= 0x01;

        assert!(matches!(
            from_boc(&boc),
            Err(BocError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        common_setup();

        let boc = to_boc(&sample_tree());
        for len in 0..boc.len() {
            assert!(from_boc(&boc[..len]).is_err(), "prefix of {} bytes", len);
        }

        assert!(matches!(
            from_boc(&[0xde, 0xad, 0xbe, 0xef, 0, 0]),
            Err(BocError::InvalidMagic(_))
        ));
    }

    #[test]
    fn multi_root_keeps_root_order() {
        common_setup();

        let a = Builder::new().store_u8(1).unwrap().build().unwrap();
        let b = sample_tree();

        let boc = to_boc_multi_root(&[a.clone(), b.clone()], BocOptions::default());
        assert_eq!(from_boc_multi_root(&boc).unwrap(), vec![a, b]);
        assert_eq!(from_boc(&boc).unwrap_err(), BocError::RootCount(2));
    }

    #[test]
    fn exotic_cells_survive_serialization() {
        common_setup();

        let inner = sample_tree();
        let pruned_root = Builder::new()
            .store_ref(Cell::pruned_branch(&inner, 1).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let proof = Cell::merkle_proof(pruned_root).unwrap();

        let back = from_boc(&to_boc(&proof)).unwrap();
        assert_eq!(back.cell_type(), CellType::MerkleProof);
        assert_eq!(back.hash(), proof.hash());
        assert_eq!(
            back.refs()[0].refs()[0].cell_type(),
            CellType::PrunedBranch
        );
    }

    #[test]
    fn full_and_pruned_twins_are_written_separately() {
        common_setup();

        let inner = sample_tree();
        let full = Builder::new().store_ref(inner.clone()).unwrap().build().unwrap();
        let twin = Builder::new()
            .store_ref(Cell::pruned_branch(&inner, 1).unwrap())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(full.hash(), twin.hash());

        let boc = to_boc_multi_root(&[full.clone(), twin.clone()], BocOptions::default());
        let roots = from_boc_multi_root(&boc).unwrap();

        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].refs()[0].cell_type(), CellType::Ordinary);
        assert_eq!(roots[1].refs()[0].cell_type(), CellType::PrunedBranch);
        assert_eq!(roots[0].repr_hash(), full.repr_hash());
        assert_eq!(roots[1].repr_hash(), twin.repr_hash());
    }
}
