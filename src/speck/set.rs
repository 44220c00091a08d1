//! Coefficient sets and the partitioning geometry shared by encoder and decoder.
//!
//! Nothing here is transmitted: both sides derive the same sets from
//! `(origin, extent, level)` arithmetic alone.

use crate::utils::error::{Result, SperrError};

/// Maximum number of dyadic levels used for the initial partition.
pub const MAX_LEVELS: usize = 6;

/// Array extents `[x, y, z]`, x varying fastest. Unused dimensions are 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims(pub [usize; 3]);

impl Dims {
    pub fn new_1d(nx: usize) -> Self {
        Dims([nx, 1, 1])
    }

    pub fn new_2d(nx: usize, ny: usize) -> Self {
        Dims([nx, ny, 1])
    }

    pub fn new_3d(nx: usize, ny: usize, nz: usize) -> Self {
        Dims([nx, ny, nz])
    }

    pub fn nx(&self) -> usize {
        self.0[0]
    }

    pub fn ny(&self) -> usize {
        self.0[1]
    }

    pub fn nz(&self) -> usize {
        self.0[2]
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.0[1] + y) * self.0[0] + x
    }

    /// Rejects zero extents and element counts that overflow `usize`.
    pub fn validate(&self) -> Result<()> {
        let overflow = self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).is_none();
        if self.0.contains(&0) || overflow {
            return Err(SperrError::InvalidArg(format!("invalid dimensions {:?}", self.0)));
        }
        Ok(())
    }
}

/// Number of dyadic levels for an axis of length `len`.
/// Eight is the shortest length that gets one level.
pub fn num_of_xforms(len: usize) -> usize {
    if len < 8 {
        return 0;
    }
    (len.ilog2() as usize - 2).min(MAX_LEVELS)
}

/// Lengths of the approximation and the coarsest detail band after `lev` halvings.
pub fn calc_approx_detail_len(orig: usize, lev: usize) -> (usize, usize) {
    let mut low = orig;
    let mut high = 0;
    for _ in 0..lev {
        high = low / 2;
        low -= high;
    }
    (low, high)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    Pixel,
    TypeS,
    /// Everything inside `extent` but outside the box `[0, origin)`.
    TypeI,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefficientSet {
    pub origin: [usize; 3],
    pub extent: [usize; 3],
    pub level: u16,
    pub kind: SetKind,
}

impl CoefficientSet {
    const EMPTY: CoefficientSet = CoefficientSet {
        origin: [0; 3],
        extent: [0; 3],
        level: 0,
        kind: SetKind::TypeS,
    };

    /// A box set; single-element boxes are pixels.
    pub fn boxed(origin: [usize; 3], extent: [usize; 3], level: u16) -> Self {
        let kind = if extent == [1, 1, 1] {
            SetKind::Pixel
        } else {
            SetKind::TypeS
        };
        CoefficientSet {
            origin,
            extent,
            level,
            kind,
        }
    }

    pub fn is_pixel(&self) -> bool {
        self.kind == SetKind::Pixel
    }

    /// A `TypeI` set is empty once it has no levels left to peel.
    pub fn is_empty(&self) -> bool {
        match self.kind {
            SetKind::TypeI => self.level == 0,
            _ => self.extent.contains(&0),
        }
    }

    /// Linear index of a pixel set.
    pub fn pixel_index(&self, dims: &Dims) -> usize {
        dims.index(self.origin[0], self.origin[1], self.origin[2])
    }

    /// Visits the linear index of every element covered by the set until `f` returns true.
    /// Returns whether it did.
    pub fn any_index(&self, dims: &Dims, mut f: impl FnMut(usize) -> bool) -> bool {
        match self.kind {
            SetKind::TypeI => {
                let inner = self.origin;
                for z in 0..self.extent[2] {
                    for y in 0..self.extent[1] {
                        let x_start = if z < inner[2] && y < inner[1] { inner[0] } else { 0 };
                        let row = dims.index(0, y, z);
                        if (row + x_start..row + self.extent[0]).any(&mut f) {
                            return true;
                        }
                    }
                }
                false
            }
            _ => {
                let [ox, oy, oz] = self.origin;
                for z in oz..oz + self.extent[2] {
                    for y in oy..oy + self.extent[1] {
                        let row = dims.index(ox, y, z);
                        if (row..row + self.extent[0]).any(&mut f) {
                            return true;
                        }
                    }
                }
                false
            }
        }
    }
}

/// Offspring of one split; at most eight sets, kept inline.
#[derive(Debug, Clone, Copy)]
pub struct Offspring {
    sets: [CoefficientSet; 8],
    len: usize,
}

impl Offspring {
    fn new() -> Self {
        Offspring {
            sets: [CoefficientSet::EMPTY; 8],
            len: 0,
        }
    }

    fn push(&mut self, set: CoefficientSet) {
        self.sets[self.len] = set;
        self.len += 1;
    }

    pub fn as_slice(&self) -> &[CoefficientSet] {
        &self.sets[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[inline]
fn mask_bit(mask: usize, dim: usize) -> bool {
    (mask >> dim) & 1 == 1
}

/// Splits a `TypeS` set into up to eight octants at `level + 1`.
/// Low halves take the extra element of odd extents; empty octants are dropped.
pub fn split_set(set: &CoefficientSet) -> Offspring {
    let mut out = Offspring::new();
    let low: [usize; 3] = std::array::from_fn(|d| set.extent[d].div_ceil(2));
    let level = set.level + 1;
    for mask in 0..8 {
        let mut origin = set.origin;
        let mut extent = [0; 3];
        for d in 0..3 {
            if mask_bit(mask, d) {
                origin[d] += low[d];
                extent[d] = set.extent[d] - low[d];
            } else {
                extent[d] = low[d];
            }
        }
        if !extent.contains(&0) {
            out.push(CoefficientSet::boxed(origin, extent, level));
        }
    }
    out
}

/// Peels the coarsest remaining detail bands off a `TypeI` set.
///
/// The emitted sets carry the set's current level; afterwards the set covers
/// everything outside the enlarged box and its level drops by one.
pub fn split_type_i(set: &mut CoefficientSet, dims: &Dims) -> Offspring {
    let mut out = Offspring::new();
    if set.is_empty() {
        return out;
    }
    let level = set.level;
    let bands: [(usize, usize); 3] =
        std::array::from_fn(|d| calc_approx_detail_len(dims.0[d], level as usize));
    for mask in (1..8).rev() {
        let mut origin = [0; 3];
        let mut extent = [0; 3];
        for d in 0..3 {
            let (approx, detail) = bands[d];
            if mask_bit(mask, d) {
                origin[d] = approx;
                extent[d] = detail;
            } else {
                extent[d] = approx;
            }
        }
        if !extent.contains(&0) {
            out.push(CoefficientSet::boxed(origin, extent, level));
        }
    }
    set.origin = std::array::from_fn(|d| bands[d].0 + bands[d].1);
    set.level -= 1;
    out
}

/// The initial partition: the approximation box and the `TypeI` remainder.
pub fn initial_sets(dims: &Dims) -> (CoefficientSet, CoefficientSet) {
    let min_extent = dims.0.iter().copied().filter(|&d| d > 1).min().unwrap_or(1);
    let levels = num_of_xforms(min_extent);
    let approx: [usize; 3] = std::array::from_fn(|d| calc_approx_detail_len(dims.0[d], levels).0);
    let root = CoefficientSet::boxed([0; 3], approx, levels as u16);
    let rest = CoefficientSet {
        origin: approx,
        extent: dims.0,
        level: levels as u16,
        kind: SetKind::TypeI,
    };
    (root, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(set: &CoefficientSet, dims: &Dims) -> usize {
        let mut n = 0;
        set.any_index(dims, |_| {
            n += 1;
            false
        });
        n
    }

    #[test]
    fn test_num_of_xforms() {
        assert_eq!(num_of_xforms(1), 0);
        assert_eq!(num_of_xforms(7), 0);
        assert_eq!(num_of_xforms(8), 1);
        assert_eq!(num_of_xforms(15), 1);
        assert_eq!(num_of_xforms(16), 2);
        assert_eq!(num_of_xforms(64), 4);
        assert_eq!(num_of_xforms(512), 6);
        assert_eq!(num_of_xforms(1 << 20), 6);
    }

    #[test]
    fn test_calc_approx_detail_len() {
        assert_eq!(calc_approx_detail_len(17, 0), (17, 0));
        assert_eq!(calc_approx_detail_len(17, 1), (9, 8));
        assert_eq!(calc_approx_detail_len(17, 2), (5, 4));
        assert_eq!(calc_approx_detail_len(17, 3), (3, 2));
        assert_eq!(calc_approx_detail_len(1, 3), (1, 0));
    }

    #[test]
    fn test_split_set_odd_extents() {
        let set = CoefficientSet::boxed([2, 0, 0], [5, 3, 1], 1);
        let kids = split_set(&set);
        assert_eq!(kids.len(), 4);
        let s = kids.as_slice();
        assert_eq!(s[0].origin, [2, 0, 0]);
        assert_eq!(s[0].extent, [3, 2, 1]);
        assert_eq!(s[1].origin, [5, 0, 0]);
        assert_eq!(s[1].extent, [2, 2, 1]);
        assert_eq!(s[2].origin, [2, 2, 0]);
        assert_eq!(s[2].extent, [3, 1, 1]);
        assert_eq!(s[3].extent, [2, 1, 1]);
        assert!(s.iter().all(|k| k.level == 2));
    }

    #[test]
    fn test_split_into_pixels() {
        let set = CoefficientSet::boxed([0, 0, 0], [2, 1, 1], 0);
        let kids = split_set(&set);
        assert_eq!(kids.len(), 2);
        assert!(kids.as_slice().iter().all(|k| k.is_pixel()));
    }

    #[test]
    fn test_partition_covers_every_element_once() {
        for dims in [
            Dims::new_1d(37),
            Dims::new_2d(4, 4),
            Dims::new_2d(19, 11),
            Dims::new_3d(9, 17, 10),
        ] {
            let mut hits = vec![0u32; dims.len()];
            let (root, mut rest) = initial_sets(&dims);
            let mut pending = vec![root];
            while !rest.is_empty() {
                pending.extend_from_slice(split_type_i(&mut rest, &dims).as_slice());
            }
            while let Some(set) = pending.pop() {
                if set.is_pixel() {
                    hits[set.pixel_index(&dims)] += 1;
                } else {
                    pending.extend_from_slice(split_set(&set).as_slice());
                }
            }
            assert!(hits.iter().all(|&h| h == 1), "dims {:?}", dims);
        }
    }

    #[test]
    fn test_type_i_region_counts() {
        let dims = Dims::new_2d(16, 16);
        let (root, mut rest) = initial_sets(&dims);
        assert_eq!(root.extent, [4, 4, 1]);
        assert_eq!(root.level, 2);
        assert_eq!(count(&rest, &dims), 256 - 16);

        let bands = split_type_i(&mut rest, &dims);
        assert_eq!(bands.len(), 3);
        assert!(bands.as_slice().iter().all(|b| b.extent == [4, 4, 1]));
        assert_eq!(rest.level, 1);
        assert_eq!(rest.origin, [8, 8, 1]);
        assert_eq!(count(&rest, &dims), 256 - 64);
    }

    #[test]
    fn test_dims_validate() {
        assert!(Dims::new_2d(4, 4).validate().is_ok());
        assert!(Dims::new_3d(4, 0, 2).validate().is_err());
        assert!(Dims::new_2d(usize::MAX, 2).validate().is_err());
    }
}
