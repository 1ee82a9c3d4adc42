//! Deterministic inputs shared across test suites.

use lazy_static::lazy_static;

/// Deterministic secret scalars. Tests that need stable addresses build
/// key pairs from these instead of the CSPRNG.
pub const KEY_SEED_1: &str = "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90";
pub const KEY_SEED_2: &str = "81855ad8681d0d86d1e91e00167939cb6694d2c422acd208a0072939487f6999";
pub const KEY_SEED_3: &str = "eb9d18a44784045d87f3c67cf22746e995af5a25367951baa2ff6cd471c483f1";

lazy_static! {
    /// The seeds as raw bytes.
    pub static ref KEY_SEEDS: Vec<Vec<u8>> = vec![
        hex::decode(KEY_SEED_1).unwrap(),
        hex::decode(KEY_SEED_2).unwrap(),
        hex::decode(KEY_SEED_3).unwrap(),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_decode_to_scalars() {
        for seed in KEY_SEEDS.iter() {
            assert_eq!(seed.len(), 32);
        }
    }
}
