//! Z-order (Morton) addressing of the density grid.
//!
//! A Morton code interleaves the bits of `(x, y, z)` as `…z1y1x1z0y0x0`.
//! Snapshots store the density grid in Morton order; the occupancy grid
//! wants `x·r² + y·r + z`.

/// Gather every third bit of `x` into the low 10 bits.
fn compact_1_by_2(x: u32) -> u32 {
    let x = x & 0x0924_9249;
    let x = ((x >> 2) | x) & 0x030C_30C3;
    let x = ((x >> 4) | x) & 0x0300_F00F;
    let x = ((x >> 8) | x) & 0x0300_00FF;
    ((x >> 16) | x) & 0x0000_03FF
}

/// Linear grid index of Morton code `code` in a `resolution³` grid.
pub fn inv_morton(code: u32, resolution: u32) -> usize {
    let x = compact_1_by_2(code) as usize;
    let y = compact_1_by_2(code >> 1) as usize;
    let z = compact_1_by_2(code >> 2) as usize;
    let r = resolution as usize;
    x * r * r + y * r + z
}
