use vireo_crypto::hash::{Hash, Hasher};

/// Root of the merkle tree over the given leaves.
///
/// Adjacent nodes are paired at each level, the parent being the
/// double-SHA256 of the concatenated pair; a level of odd length
/// duplicates its last node before pairing. An empty leaf set yields the
/// all-zeros digest.
pub fn merkle_root(leaves: &[Hash<32>]) -> Hash<32> {
    if leaves.is_empty() {
        return Hash::zero();
    }

    let mut level = leaves.to_vec();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut hasher = Hasher::new();
                hasher.input(pair[0].as_ref());
                hasher.input(pair[1].as_ref());
                hasher.finalize()
            })
            .collect();
    }

    level[0]
}
