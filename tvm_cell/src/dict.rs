//! Reading and writing `Hashmap`, `HashmapE` and `HashmapAugE` dictionaries.
//!
//! A dictionary is a binary patricia trie over fixed-length bit keys. Every
//! edge cell starts with a label holding the next run of key bits; below the
//! label an edge either ends in a leaf (the value) or forks into two
//! references, one per value of the next key bit. Augmented dictionaries
//! additionally store an "extra" value in every node, placed before the value
//! in leaves and after the references in forks.

use std::cmp::Ordering;

use log::trace;
use thiserror::Error;

use crate::{
    bits::BitString,
    builder::Builder,
    cell::{Cell, CellError, CellResult, CellType},
    slice::Slice,
};

/// The output type of dictionary operations.
pub type DictResult<T> = Result<T, DictError>;

/// Errors that may occur when reading or writing a dictionary.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum DictError {
    /// The lookup reached a pruned branch, so the dictionary (usually a
    /// proof) does not cover the key.
    #[error("Dictionary lookup for key {key} reached a pruned branch!")]
    PrunedBranch {
        /// The key being looked up.
        key: BitString,
    },

    /// A label claims more bits than the remaining key length.
    #[error("Invalid dictionary label! (length: {len}, max: {max})")]
    InvalidLabel {
        /// The label length read.
        len: usize,
        /// Key bits left at this edge.
        max: usize,
    },

    /// A key has the wrong length, or appears twice when serializing.
    #[error("Invalid dictionary key {key}! (expected {expected} bits)")]
    InvalidKey {
        /// The offending key.
        key: BitString,
        /// The dictionary's key length.
        expected: usize,
    },

    /// A cell of the dictionary could not be read or built.
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// Extra data carried by every node of an augmented dictionary.
pub trait DictExtra: Sized {
    /// The extra of a fork, given the extras of its two branches.
    fn fork(left: &Self, right: &Self) -> Self;

    /// Writes the extra into a node.
    fn store(&self, b: &mut Builder) -> CellResult<()>;
}

/// Plain dictionaries carry no extra.
impl DictExtra for () {
    fn fork(_: &Self, _: &Self) -> Self {}

    fn store(&self, _: &mut Builder) -> CellResult<()> {
        Ok(())
    }
}

/// Looks `key` up in the `Hashmap` (or `HashmapAug`) rooted at `root`, whose
/// keys are `key.len()` bits long.
///
/// On a hit, returns the slice that follows the leaf's label. For an
/// augmented dictionary that slice starts with the leaf's extra, followed by
/// the value.
pub fn lookup(root: &Cell, key: &BitString) -> DictResult<Option<Slice>> {
    let mut cell = root.clone();
    let mut pos = 0;

    loop {
        if cell.cell_type() == CellType::PrunedBranch {
            return Err(DictError::PrunedBranch { key: key.clone() });
        }

        let mut s = cell.parse()?;
        let remaining = key.len() - pos;
        let label = load_label(&mut s, remaining)?;

        if key.sub_string(pos..pos + label.len()) != label {
            trace!("Key {} not found in dictionary", key);
            return Ok(None);
        }
        pos += label.len();

        if pos == key.len() {
            return Ok(Some(s));
        }

        let branch = key.get(pos).unwrap_or_default() as usize;
        pos += 1;
        cell = s
            .cell()
            .reference(branch)
            .cloned()
            .ok_or(CellError::NotEnoughRefs)?;
    }
}

/// Looks `key` up in a `HashmapE` read from the front of `s`. Consumes the
/// presence bit and, if set, the root reference.
pub fn lookup_e(s: &mut Slice, key: &BitString) -> DictResult<Option<Slice>> {
    match s.load_maybe_ref()? {
        Some(root) => lookup(&root, key),
        None => Ok(None),
    }
}

/// Reads an `HmLabel` for an edge with `max` key bits left.
pub fn load_label(s: &mut Slice, max: usize) -> DictResult<BitString> {
    let width = label_len_width(max);

    let check = |len: usize| match len <= max {
        true => Ok(len),
        false => Err(DictError::InvalidLabel { len, max }),
    };

    if !s.load_bit()? {
        // hml_short$0
        let mut len = 0;
        while s.load_bit()? {
            len += 1;
        }
        return Ok(s.load_bits(check(len)?)?);
    }

    if !s.load_bit()? {
        // hml_long$10
        let len = check(s.load_uint(width)? as usize)?;
        return Ok(s.load_bits(len)?);
    }

    // hml_same$11
    let bit = s.load_bit()?;
    let len = check(s.load_uint(width)? as usize)?;
    Ok(BitString::repeat(bit, len))
}

/// Writes `label` as an `HmLabel` for an edge with `max` key bits left,
/// picking the shortest encoding.
pub fn store_label(b: &mut Builder, label: &BitString, max: usize) -> CellResult<()> {
    let len = label.len();
    let width = label_len_width(max);

    let short = 2 + 2 * len;
    let long = 2 + width + len;
    let same = match label.iter().all(|v| Some(v) == label.get(0)) {
        true if len > 0 => Some(3 + width),
        _ => None,
    };

    if same.is_some_and(|same| same < short && same < long) {
        b.store_uint(0b11, 2)?
            .store_bit(label.get(0).unwrap_or_default())?
            .store_uint(len as u64, width)?;
    } else if short <= long {
        b.store_bit(false)?;
        for _ in 0..len {
            b.store_bit(true)?;
        }
        b.store_bit(false)?.store_bits(label)?;
    } else {
        b.store_uint(0b10, 2)?
            .store_uint(len as u64, width)?
            .store_bits(label)?;
    }

    Ok(())
}

/// Builds a `Hashmap` of `key_len` bit keys. Returns `None` for an empty
/// dictionary, which is how `HashmapE` stores it.
pub fn serialize_dict(
    entries: Vec<(BitString, Builder)>,
    key_len: usize,
) -> DictResult<Option<Cell>> {
    let entries: Vec<(BitString, (), Builder)> =
        entries.into_iter().map(|(k, v)| (k, (), v)).collect();
    Ok(serialize_aug_dict(entries, key_len)?.map(|(cell, ())| cell))
}

/// Builds a `HashmapAug` of `key_len` bit keys. Returns the root together
/// with the root's extra, or `None` for an empty dictionary.
pub fn serialize_aug_dict<E: DictExtra>(
    mut entries: Vec<(BitString, E, Builder)>,
    key_len: usize,
) -> DictResult<Option<(Cell, E)>> {
    if let Some((key, ..)) = entries.iter().find(|(k, ..)| k.len() != key_len) {
        return Err(DictError::InvalidKey {
            key: key.clone(),
            expected: key_len,
        });
    }

    entries.sort_by(|(a, ..), (b, ..)| cmp_bits(a, b));
    if let Some(w) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(DictError::InvalidKey {
            key: w[0].0.clone(),
            expected: key_len,
        });
    }

    if entries.is_empty() {
        return Ok(None);
    }

    trace!(
        "Serializing dictionary of {} entries with {} bit keys",
        entries.len(),
        key_len
    );

    build_edge(entries, 0, key_len).map(Some)
}

/// Serializes a `HashmapE` root (presence bit plus maybe reference) into `b`.
pub fn store_dict_e(b: &mut Builder, root: Option<Cell>) -> CellResult<()> {
    b.store_maybe_ref(root)?;
    Ok(())
}

fn build_edge<E: DictExtra>(
    mut entries: Vec<(BitString, E, Builder)>,
    offset: usize,
    key_len: usize,
) -> DictResult<(Cell, E)> {
    let left_bits = key_len - offset;
    let label_len = match entries.len() {
        1 => left_bits,
        _ => {
            let first = entries[0].0.sub_string(offset..key_len);
            let last = entries[entries.len() - 1].0.sub_string(offset..key_len);
            first.common_prefix_len(&last)
        }
    };

    let mut b = Builder::new();
    store_label(
        &mut b,
        &entries[0].0.sub_string(offset..offset + label_len),
        left_bits,
    )?;

    let extra = match label_len == left_bits {
        true => {
            let (_, extra, value) = entries.remove(0);
            extra.store(&mut b)?;
            b.store_builder(&value)?;
            extra
        }
        false => {
            let split = offset + label_len;
            let right = entries.split_off(
                entries
                    .iter()
                    .position(|(k, ..)| k.get(split) == Some(true))
                    .unwrap_or(entries.len()),
            );

            let (l_cell, l_extra) = build_edge(entries, split + 1, key_len)?;
            let (r_cell, r_extra) = build_edge(right, split + 1, key_len)?;

            let extra = E::fork(&l_extra, &r_extra);
            b.store_ref(l_cell)?.store_ref(r_cell)?;
            extra.store(&mut b)?;
            extra
        }
    };

    Ok((b.build()?, extra))
}

/// Width of the `#<= max` length field of long and same labels.
fn label_len_width(max: usize) -> usize {
    (usize::BITS - max.leading_zeros()) as usize
}

fn cmp_bits(a: &BitString, b: &BitString) -> Ordering {
    a.iter().cmp(b.iter())
}
