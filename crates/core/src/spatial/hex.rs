//! Index arithmetic for hexagonal lattices.
//!
//! Indices `(i, j)` address hexagons along two axes 60° apart. Rings count
//! outward from 1 at the center; positions within a ring count from 1,
//! counter-clockwise starting on the `+i` axis.

/// Returns the ring holding `(i, j)`.
#[must_use]
pub fn ring(i: i32, j: i32) -> u32 {
    i.unsigned_abs()
        .max(j.unsigned_abs())
        .max((i + j).unsigned_abs())
        + 1
}

/// Number of positions in `ring`.
#[must_use]
pub fn positions_in_ring(ring: u32) -> u32 {
    if ring <= 1 { 1 } else { 6 * (ring - 1) }
}

/// Converts indices to `(ring, position)`.
#[must_use]
pub fn ring_position(i: i32, j: i32) -> (u32, u32) {
    let (edge, ring, offset) = if i > 0 && j >= 0 {
        (0, i + j + 1, j)
    } else if i <= 0 && j > -i {
        (1, j + 1, -i)
    } else if i < 0 && j > 0 {
        (2, -i + 1, -j - i)
    } else if i < 0 && j <= 0 {
        (3, -i - j + 1, -j)
    } else if i >= 0 && j < -i {
        (4, -j + 1, i)
    } else {
        (5, i + 1, i + j)
    };
    let ring = ring.unsigned_abs();
    let base = 1 + edge * (ring - 1);
    (ring, base + offset.unsigned_abs())
}

/// Converts `(ring, position)` back to indices.
#[must_use]
pub fn indices(ring: u32, position: u32) -> Option<(i32, i32)> {
    if ring == 0 || position == 0 || position > positions_in_ring(ring) {
        return None;
    }
    if ring == 1 {
        return Some((0, 0));
    }
    let side = i32::try_from(ring - 1).ok()?;
    let edge = (position - 1) / (ring - 1);
    let offset = i32::try_from((position - 1) % (ring - 1)).ok()?;
    Some(match edge {
        0 => (side - offset, offset),
        1 => (-offset, side),
        2 => (-side, side - offset),
        3 => (-side + offset, -offset),
        4 => (offset, -side),
        _ => (side, offset - side),
    })
}

/// Rotates indices counter-clockwise by `steps` multiples of 120°.
#[must_use]
pub fn rotate(i: i32, j: i32, steps: u32) -> (i32, i32) {
    (0..steps % 3).fold((i, j), |(i, j), _| (-i - j, i))
}

/// Returns `true` if `(i, j)` lies in the modeled sector of a third-core lattice.
#[must_use]
pub fn in_third_core(i: i32, j: i32) -> bool {
    let (ring, position) = ring_position(i, j);
    ring == 1 || position <= 2 * (ring - 1)
}

/// The two positions equivalent to `(i, j)` under third-core symmetry.
///
/// The center has no distinct equivalents.
#[must_use]
pub fn third_core_equivalents(i: i32, j: i32) -> Vec<(i32, i32)> {
    if (i, j) == (0, 0) {
        return Vec::new();
    }
    vec![rotate(i, j, 1), rotate(i, j, 2)]
}

/// Returns `true` if `(i, j)` lies on the boundary line a third-core sector
/// starts from: the first position of each ring past the center.
#[must_use]
pub fn on_lower_third_edge(i: i32, j: i32) -> bool {
    i > 0 && j == 0
}

/// Returns `true` if `(i, j)` lies on the boundary line a third-core sector
/// ends at, just outside the modeled positions.
#[must_use]
pub fn on_upper_third_edge(i: i32, j: i32) -> bool {
    i < 0 && i + j == 0
}

/// Formats a ring-position label such as `003-007`.
#[must_use]
pub fn label(ring: u32, position: u32) -> String {
    format!("{ring:03}-{position:03}")
}

/// Centroid of `(i, j)` for a lattice with the given flat-to-flat pitch.
#[must_use]
pub fn centroid(pitch: f64, i: i32, j: i32) -> (f64, f64) {
    let side = pitch / 3.0_f64.sqrt();
    (
        1.5 * side * f64::from(i),
        0.5 * pitch * f64::from(i) + pitch * f64::from(j),
    )
}
