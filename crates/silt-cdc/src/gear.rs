//! Gear table for the rolling hash.

use std::sync::LazyLock;

/// Type alias for the gear table.
pub type GearTable = [u64; 256];

/// Pre-computed gear table (computed once at runtime).
pub static GEAR_TABLE: LazyLock<GearTable> = LazyLock::new(gear_table);

/// Generates the gear table.
///
/// For each byte value 0-255, computes BLAKE3 of that single byte and
/// takes the first 8 bytes as a little-endian u64. Deriving the table
/// from a hash keeps it free of accidental structure and reproducible
/// across builds.
pub fn gear_table() -> GearTable {
    let mut table = [0u64; 256];
    for i in 0..256 {
        let hash = blake3::hash(&[i as u8]);
        let bytes = hash.as_bytes();
        table[i] = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
    }
    table
}
