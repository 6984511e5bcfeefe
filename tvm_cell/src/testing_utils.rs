use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{builder::Builder, cell::Cell};

/// Keeps random trees small enough to stay readable when a test fails.
const MAX_RANDOM_DEPTH: usize = 4;

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

/// A random tree whose root always has at least one reference. Subtrees are
/// sometimes reused so the result is a DAG rather than a plain tree.
pub(crate) fn random_tree(seed: u64) -> Cell {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut shared = Vec::new();

    let mut b = Builder::new();
    fill_random_bits(&mut rng, &mut b);
    for _ in 0..rng.gen_range(1..=4) {
        b.store_ref(random_subtree(&mut rng, 1, &mut shared)).unwrap();
    }

    b.build().unwrap()
}

fn random_subtree(rng: &mut StdRng, depth: usize, shared: &mut Vec<Cell>) -> Cell {
    if !shared.is_empty() && rng.gen_bool(0.2) {
        return shared[rng.gen_range(0..shared.len())].clone();
    }

    let mut b = Builder::new();
    fill_random_bits(rng, &mut b);
    if depth < MAX_RANDOM_DEPTH {
        for _ in 0..rng.gen_range(0..=3) {
            b.store_ref(random_subtree(rng, depth + 1, shared)).unwrap();
        }
    }

    let c = b.build().unwrap();
    shared.push(c.clone());
    c
}

fn fill_random_bits(rng: &mut StdRng, b: &mut Builder) {
    for _ in 0..rng.gen_range(0..=1023) {
        b.store_bit(rng.gen()).unwrap();
    }
}
