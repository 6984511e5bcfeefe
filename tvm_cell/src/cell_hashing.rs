use sha2::{Digest, Sha256};

use crate::{
    bits::{read_uint, with_completion_tag},
    cell::{Cell, CellError, CellHash, CellResult, CellType, MAX_DEPTH},
};

/// Highest level a cell can have.
pub(crate) const MAX_LEVEL: u8 = 3;

/// Offset of the first stored hash inside pruned branch data (after the type
/// and level mask bytes).
pub(crate) const PRUNED_HASHES_OFFSET: usize = 2;

/// The level of a cell with `mask`: the position of its highest set bit.
pub(crate) const fn mask_level(mask: u8) -> u8 {
    (u8::BITS - mask.leading_zeros()) as u8
}

/// `mask` restricted to the levels below `level`.
pub(crate) const fn apply_level(mask: u8, level: u8) -> u8 {
    match level >= MAX_LEVEL {
        true => mask,
        false => mask & ((1 << level) - 1),
    }
}

/// Index into the distinct hashes of a cell with `mask` for `level`.
pub(crate) const fn hash_index(mask: u8, level: u8) -> usize {
    apply_level(mask, level).count_ones() as usize
}

/// Whether a cell with `mask` has a hash of its own at `level`.
const fn is_significant(mask: u8, level: u8) -> bool {
    level == 0 || (mask >> (level - 1)) & 1 == 1
}

/// Number of hashes (and depths) stored in a pruned branch with `mask`.
pub(crate) const fn pruned_hash_count(mask: u8) -> usize {
    mask.count_ones() as usize
}

/// The two descriptor bytes that prefix a cell both in its hashed
/// representation and in a bag of cells.
pub(crate) fn descriptors(refs: usize, exotic: bool, level_mask: u8, bit_len: u16) -> [u8; 2] {
    let d1 = refs as u8 + 8 * exotic as u8 + 32 * level_mask;
    let d2 = (bit_len / 8 + bit_len.div_ceil(8)) as u8;

    [d1, d2]
}

/// Calculates every distinct hash and depth of a cell from its parts, lowest
/// level first. The last entry is the representation hash.
///
/// A pruned branch takes its lower level hashes and depths from its data, so
/// a tree with pruned subtrees hashes the same at level `0` as the full tree
/// it was cut from. Merkle proofs and updates hash their children one level
/// up.
pub(crate) fn hashes_and_depths(
    cell_type: CellType,
    level_mask: u8,
    data: &[u8],
    bit_len: u16,
    refs: &[Cell],
) -> CellResult<(Vec<CellHash>, Vec<u16>)> {
    let level = mask_level(level_mask);
    let is_merkle = matches!(cell_type, CellType::MerkleProof | CellType::MerkleUpdate);
    let is_pruned = cell_type == CellType::PrunedBranch;

    let mut hashes = Vec::with_capacity(level as usize + 1);
    let mut depths = Vec::with_capacity(level as usize + 1);

    if is_pruned {
        let stored = pruned_hash_count(level_mask);
        let depths_offset = PRUNED_HASHES_OFFSET + 32 * stored;
        for i in 0..stored {
            let start = PRUNED_HASHES_OFFSET + 32 * i;
            let mut hash = [0; 32];
            hash.copy_from_slice(&data[start..start + 32]);
            hashes.push(hash);
            depths.push(read_uint(data, (depths_offset + 2 * i) * 8, 16) as u16);
        }
    }

    for level_i in 0..=level {
        if !is_significant(level_mask, level_i) || (is_pruned && level_i != level) {
            continue;
        }

        let child_level = match is_merkle {
            true => level_i + 1,
            false => level_i,
        };

        let mut hasher = Sha256::new();
        hasher.update(descriptors(
            refs.len(),
            cell_type.is_exotic(),
            apply_level(level_mask, level_i),
            bit_len,
        ));

        match hashes.last() {
            Some(prev) if !is_pruned => hasher.update(prev),
            _ => hasher.update(with_completion_tag(data, bit_len as usize)),
        }

        let mut depth = 0;
        for c in refs {
            let child_depth = c.depth_at(child_level);
            depth = depth.max(child_depth + 1);
            hasher.update(child_depth.to_be_bytes());
        }
        for c in refs {
            hasher.update(c.hash_at(child_level));
        }

        if depth > MAX_DEPTH {
            return Err(CellError::DepthOverflow);
        }

        hashes.push(hasher.finalize().into());
        depths.push(depth);
    }

    Ok((hashes, depths))
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    use super::{apply_level, hash_index, mask_level};
    use crate::{builder::Builder, cell::Cell, testing_utils::common_setup};

    fn sha(parts: &[&[u8]]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for p in parts {
            hasher.update(p);
        }
        hasher.finalize().into()
    }

    #[test]
    fn empty_cell_has_the_well_known_hash() {
        common_setup();

        assert_eq!(
            hex::encode(Cell::empty().hash()),
            "96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"
        );
    }

    #[test]
    fn byte_aligned_data_is_hashed_without_tag() {
        common_setup();

        let c = Builder::new().store_u8(0xab).unwrap().build().unwrap();
        let expected: [u8; 32] = Sha256::digest([0u8, 2u8, 0xab]).into();

        assert_eq!(c.hash(), &expected);
    }

    #[test]
    fn refs_contribute_depth_then_hash() {
        common_setup();

        let child = Cell::empty();
        let parent = Builder::new().store_ref(child.clone()).unwrap().build().unwrap();

        let expected = sha(&[&[1, 0], &0u16.to_be_bytes(), child.hash()]);

        assert_eq!(parent.hash(), &expected);
        assert_eq!(parent.depth(), 1);
    }

    #[test]
    fn level_mask_helpers() {
        assert_eq!(mask_level(0), 0);
        assert_eq!(mask_level(1), 1);
        assert_eq!(mask_level(2), 2);
        assert_eq!(mask_level(5), 3);

        assert_eq!(apply_level(7, 0), 0);
        assert_eq!(apply_level(7, 2), 3);
        assert_eq!(apply_level(7, 5), 7);

        assert_eq!(hash_index(2, 0), 0);
        assert_eq!(hash_index(2, 1), 0);
        assert_eq!(hash_index(2, 2), 1);
        assert_eq!(hash_index(3, 2), 2);
    }

    #[test]
    fn pruned_tree_hashes_like_the_full_tree() {
        common_setup();

        let leaf = Builder::new().store_u32(0xdead_beef).unwrap().build().unwrap();
        let mid = Builder::new().store_ref(leaf).unwrap().build().unwrap();
        let full = Builder::new()
            .store_u8(7)
            .unwrap()
            .store_ref(mid.clone())
            .unwrap()
            .build()
            .unwrap();

        let pruned = Builder::new()
            .store_u8(7)
            .unwrap()
            .store_ref(Cell::pruned_branch(&mid, 1).unwrap())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(full.hash(), pruned.hash());
        assert_eq!(full.depth(), pruned.depth());
        assert_ne!(full.level_mask(), pruned.level_mask());
        assert_ne!(full.repr_hash(), pruned.repr_hash());
    }

    #[test]
    fn pruned_branch_representation_hash() {
        common_setup();

        let inner = Builder::new().store_u8(9).unwrap().build().unwrap();
        let p = Cell::pruned_branch(&inner, 1).unwrap();

        // d1 = exotic | mask 1 << 5, d2 = 2 * 36 bytes, then the data itself.
        let mut data = vec![1u8, 1u8];
        data.extend_from_slice(inner.hash());
        data.extend_from_slice(&0u16.to_be_bytes());
        let expected = sha(&[&[8 + 32, 72], &data]);

        assert_eq!(p.hash_at(0), inner.hash());
        assert_eq!(p.hash_at(1), &expected);
        assert_eq!(p.repr_hash(), &expected);
        assert_eq!(p.depth_at(0), 0);
        assert_eq!(p.depth_at(1), 0);
    }

    #[test]
    fn merkle_update_hashes_children_one_level_up() {
        common_setup();

        let old = Builder::new().store_u8(1).unwrap().build().unwrap();
        let new = Builder::new().store_u8(2).unwrap().build().unwrap();
        let p_old = Cell::pruned_branch(&old, 1).unwrap();
        let p_new = Cell::pruned_branch(&new, 1).unwrap();
        let upd = Cell::merkle_update(p_old.clone(), p_new.clone()).unwrap();

        // Level 1 pruned children are seen at level 1 by the update: their
        // own representation hash and depth `0`.
        let mut data = vec![4u8];
        data.extend_from_slice(old.hash());
        data.extend_from_slice(new.hash());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        let expected = sha(&[
            &[2 + 8, 2 * 69],
            &data,
            &0u16.to_be_bytes(),
            &0u16.to_be_bytes(),
            p_old.repr_hash(),
            p_new.repr_hash(),
        ]);

        assert_eq!(upd.level_mask(), 0);
        assert_eq!(upd.hash(), &expected);
        assert_eq!(upd.depth(), 1);
    }

    #[test]
    fn merkle_update_over_deeper_pruning_keeps_the_full_hash() {
        common_setup();

        let old = Builder::new().store_u8(1).unwrap().build().unwrap();
        let new = Builder::new().store_u8(2).unwrap().build().unwrap();
        let full = Cell::merkle_update(old.clone(), new.clone()).unwrap();

        // Inside a merkle proof the children of an update are pruned one
        // level deeper.
        let pruned = Cell::merkle_update(
            Cell::pruned_branch(&old, 2).unwrap(),
            Cell::pruned_branch(&new, 2).unwrap(),
        )
        .unwrap();

        assert_eq!(pruned.level_mask(), 1);
        assert_eq!(pruned.hash(), full.hash());
        assert_eq!(pruned.depth(), full.depth());
    }
}
