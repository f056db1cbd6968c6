//! 逐切片的分割空洞填充.

use log::info;

use crate::consts::refine::*;
use crate::data::Mask;

/// 判定背景连通区域是否为分割空洞的规则.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HoleRule {
    /// 面积小于该值的区域一律是空洞.
    pub min_area: usize,

    /// 面积小于 `min_area * circular_factor` 且圆度大于 `min_circularity` 的区域也是空洞.
    pub circular_factor: usize,

    /// 圆度下限.
    pub min_circularity: f64,
}

impl Default for HoleRule {
    fn default() -> Self {
        Self::with_min_area(MIN_HOLE_AREA)
    }
}

impl HoleRule {
    /// 以给定面积下限构建, 其余参数取默认值.
    pub fn with_min_area(min_area: usize) -> Self {
        Self {
            min_area,
            circular_factor: CIRCULAR_HOLE_FACTOR,
            min_circularity: MIN_HOLE_CIRCULARITY,
        }
    }

    /// 面积为 `area`, 圆度为 `circularity` 的背景区域是否为空洞?
    #[inline]
    pub fn is_hole(&self, area: usize, circularity: f64) -> bool {
        area < self.min_area
            || (area < self.min_area * self.circular_factor && circularity > self.min_circularity)
    }
}

/// 逐切片填充掩膜中的空洞, 返回新的掩膜. 标定不变.
///
/// 每个切片独立处理: 以 8-相邻规则标记所有背景连通区域,
/// 满足 `rule` 的区域被涂为前景.
///
/// # 注意
///
/// 填充只会整体移除背景区域, 剩余区域的面积和周长都不受影响,
/// 因此该操作是幂等的.
pub fn fill_holes(mask: &Mask, rule: &HoleRule) -> Mask {
    let mut ans = mask.clone();
    let filled: usize = ans
        .mask_slice_iter_mut()
        .map(|mut s| s.fill_holes(|area, circ| rule.is_hole(area, circ)))
        .sum();
    info!("Filled {filled} hole pixel(s) over {} slice(s)", ans.len_z());
    ans
}

/// 同 [`fill_holes`], 但借助 `rayon` 并行地处理各切片.
#[cfg(feature = "rayon")]
pub fn par_fill_holes(mask: &Mask, rule: &HoleRule) -> Mask {
    let mut ans = mask.clone();
    let filled =
        ans.par_sum_mask_slices_mut(|mut s| s.fill_holes(|area, circ| rule.is_hole(area, circ)));
    info!("Filled {filled} hole pixel(s) over {} slice(s)", ans.len_z());
    ans
}
