//! 二维/三维形态学基础操作.
//!
//! 所有三维操作都以 `(z, h, w)` 索引, 且只在体数据范围内取邻居 (越界邻居直接忽略).

mod closing;
mod distance;
mod watershed;

pub use closing::{binary_closing, binary_dilation, binary_erosion};
pub use distance::chamfer_distance;
pub use watershed::{extended_minima, extended_minima_watershed, h_minima, seeded_watershed};

use crate::{Idx2d, Idx3d};

/// 获得 `(h, w)` 的 4-邻居索引. 不检查越界.
#[inline]
pub(crate) fn neighbour4((h, w): Idx2d) -> [Idx2d; 4] {
    [
        (h.wrapping_sub(1), w),
        (h.saturating_add(1), w),
        (h, w.wrapping_sub(1)),
        (h, w.saturating_add(1)),
    ]
}

/// 获得 `(h, w)` 的 8-邻居索引. 不检查越界.
#[inline]
pub(crate) fn neighbour8((h, w): Idx2d) -> [Idx2d; 8] {
    [
        (h.wrapping_sub(1), w.wrapping_sub(1)),
        (h.wrapping_sub(1), w),
        (h.wrapping_sub(1), w.saturating_add(1)),
        (h, w.wrapping_sub(1)),
        (h, w.saturating_add(1)),
        (h.saturating_add(1), w.wrapping_sub(1)),
        (h.saturating_add(1), w),
        (h.saturating_add(1), w.saturating_add(1)),
    ]
}

/// 三维邻接规则.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Connectivity {
    /// 面相邻.
    #[default]
    Six,

    /// 面、边、顶点相邻.
    TwentySix,
}

/// 6-邻域偏移.
const OFFSETS_6: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// 26-邻域偏移, 按行优先排列.
const OFFSETS_26: [(isize, isize, isize); 26] = {
    let mut ans = [(0, 0, 0); 26];
    let mut i = 0;
    let mut k = 0;
    while k < 27 {
        let off = (k as isize / 9 - 1, (k as isize / 3) % 3 - 1, k as isize % 3 - 1);
        if k != 13 {
            ans[i] = off;
            i += 1;
        }
        k += 1;
    }
    ans
};

impl Connectivity {
    /// 邻域偏移集合.
    #[inline]
    pub(crate) fn offsets(&self) -> &'static [(isize, isize, isize)] {
        match self {
            Connectivity::Six => &OFFSETS_6,
            Connectivity::TwentySix => &OFFSETS_26,
        }
    }

    /// 获得 `pos` 在形状 `shape` 内的全部邻居.
    #[inline]
    pub(crate) fn neighbours(&self, pos: Idx3d, shape: Idx3d) -> impl Iterator<Item = Idx3d> {
        self.offsets()
            .iter()
            .filter_map(move |off| offset_within(pos, *off, shape))
    }
}

/// 计算 `pos + off`, 结果越界时返回 `None`.
#[inline]
pub(crate) fn offset_within(
    (z, h, w): Idx3d,
    (dz, dh, dw): (isize, isize, isize),
    (lz, lh, lw): Idx3d,
) -> Option<Idx3d> {
    let z = z.checked_add_signed(dz)?;
    let h = h.checked_add_signed(dh)?;
    let w = w.checked_add_signed(dw)?;
    (z < lz && h < lh && w < lw).then_some((z, h, w))
}

#[cfg(test)]
mod tests {
    use super::{offset_within, Connectivity, OFFSETS_26};

    #[test]
    fn test_offsets_26() {
        assert!(!OFFSETS_26.contains(&(0, 0, 0)));
        assert_eq!(OFFSETS_26[0], (-1, -1, -1));
        assert_eq!(OFFSETS_26[25], (1, 1, 1));
    }

    #[test]
    fn test_neighbours_clipped() {
        let shape = (3, 3, 3);
        assert_eq!(Connectivity::Six.neighbours((0, 0, 0), shape).count(), 3);
        assert_eq!(Connectivity::Six.neighbours((1, 1, 1), shape).count(), 6);
        assert_eq!(
            Connectivity::TwentySix.neighbours((0, 0, 0), shape).count(),
            7
        );
        assert_eq!(
            Connectivity::TwentySix.neighbours((1, 1, 1), shape).count(),
            26
        );
        assert_eq!(offset_within((2, 0, 0), (1, 0, 0), shape), None);
    }
}
