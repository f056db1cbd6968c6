use crate::consts::gray::*;
use crate::morph::{neighbour4, neighbour8};
use crate::{Area2d, Areas2d, Idx2d, Predicate};
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use std::collections::VecDeque;
use std::ops::Index;

/// 不可变、借用的二维水平掩膜切片.
pub struct MaskSlice<'a> {
    /// 底层数据的轻量级视图, 借用于 [`crate::data::Mask`].
    data: ArrayView2<'a, u8>,
}

impl Index<Idx2d> for MaskSlice<'_> {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

/// 可变、借用的二维水平掩膜切片.
pub struct MaskSliceMut<'a> {
    /// 底层数据的轻量级视图, 借用于 [`crate::data::Mask`].
    data: ArrayViewMut2<'a, u8>,
}

/// 可变方法集合.
impl<'a> MaskSliceMut<'a> {
    /// 将 `it` 给出的全部位置涂为 `value`.
    pub fn fill_batch<I: IntoIterator<Item = Idx2d>>(&mut self, it: I, value: u8) {
        for pos in it {
            self.data[pos] = value;
        }
    }

    /// 填充分割空洞, 返回被填充的像素个数.
    ///
    /// 以 8-相邻规则收集所有背景区域, 对每个区域以 `(面积, 圆度)` 调用 `is_hole`,
    /// 返回 `true` 的区域被涂为前景. 所有区域都在修改前收集, 因此填充顺序无关.
    pub fn fill_holes(&mut self, is_hole: impl Fn(usize, f64) -> bool) -> usize {
        let holes: Vec<Area2d> = self
            .background_areas()
            .into_iter()
            .filter(|area| is_hole(area.len(), self.circularity(area, is_background)))
            .collect();
        let mut filled = 0;
        for area in holes {
            filled += area.len();
            self.fill_batch(area, MASK_FOREGROUND);
        }
        filled
    }
}

impl Index<Idx2d> for MaskSliceMut<'_> {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

/// 掩膜切片不可变方法集合.
macro_rules! impl_mask_slice_immut {
    ($life: lifetime, $slice: ty, $array: ty) => {
        /// 不可变方法集合.
        impl<$life> $slice {
            /// 直接初始化.
            #[inline]
            pub(crate) fn new(data: $array) -> Self {
                Self { data }
            }

            /// 获取给定位置 (高, 宽) 的像素值. 越界时返回 `None`.
            #[inline]
            pub fn get(&self, pos: Idx2d) -> Option<&u8> {
                self.data.get(pos)
            }

            /// 图像的分辨率 (高, 宽).
            #[inline]
            pub fn shape(&self) -> Idx2d {
                self.data.dim()
            }

            /// 判断一个索引是否合法 (未越界).
            #[inline]
            pub fn check(&self, (h, w): Idx2d) -> bool {
                let (h_len, w_len) = self.shape();
                h < h_len && w < w_len
            }

            /// 以行优先规则, 获取能迭代图像所有索引的迭代器.
            #[inline]
            pub fn pos_iter(&self) -> super::iter::PosIter {
                super::iter::PosIter::new(self.shape())
            }

            /// 获得 `pos` 的 8-邻域像素索引. 保证返回的索引都不越界.
            pub fn n8_positions(&self, pos: Idx2d) -> Vec<Idx2d> {
                neighbour8(pos)
                    .into_iter()
                    .filter(|p| self.check(*p))
                    .collect()
            }

            /// 按照 8-相邻规则获取所有区域. 两个像素 `p1` 和 `p2` 属于同一个区域,
            /// 当且仅当存在一条从 `p1` 到 `p2` 的 8-相邻路径, 且路径上的所有像素
            /// (包括 `p1` 和 `p2`) 都满足谓词 `pred`.
            ///
            /// 区域按其首个像素的行优先顺序排列.
            #[inline]
            pub fn areas(&self, pred: Predicate) -> Areas2d {
                self.areas_from_local(self.pos_iter(), pred)
            }

            /// 按照 8-相邻原则获得图像中所有背景区域.
            #[inline]
            pub fn background_areas(&self) -> Areas2d {
                self.areas(is_background)
            }

            /// 按照 8-相邻规则获取所有区域, 但区域起点由 `it` 指定.
            pub fn areas_from_local<I: IntoIterator<Item = Idx2d>>(
                &self,
                it: I,
                pred: Predicate,
            ) -> Areas2d {
                let mut ans = Areas2d::new();
                let mut visited = Array2::<bool>::default(self.shape());
                let mut bfs_q = VecDeque::with_capacity(16);

                for pos in it {
                    if visited[pos] || !pred(self[pos]) {
                        continue;
                    }
                    visited[pos] = true;
                    bfs_q.push_back(pos);
                    let mut this_area = Area2d::with_capacity(1);
                    while let Some(cur) = bfs_q.pop_front() {
                        this_area.push(cur);
                        for next in self.n8_positions(cur) {
                            if !visited[next] && pred(self[next]) {
                                visited[next] = true;
                                bfs_q.push_back(next);
                            }
                        }
                    }
                    ans.push(this_area);
                }
                ans
            }

            /// 区域的周长, 即区域像素与区域外 (含图像外) 之间的 4-相邻边数.
            ///
            /// # 注意
            ///
            /// `area` 必须是由同一谓词 `pred` 求得的完整连通区域, 否则结果无意义.
            pub fn perimeter(&self, area: &[Idx2d], pred: Predicate) -> usize {
                area.iter()
                    .map(|pos| {
                        neighbour4(*pos)
                            .into_iter()
                            .filter(|n| !matches!(self.get(*n), Some(&v) if pred(v)))
                            .count()
                    })
                    .sum()
            }

            /// 区域的圆度 `4πA / P²`, 取值 `(0, 1]` 附近. 空区域圆度为 0.
            pub fn circularity(&self, area: &[Idx2d], pred: Predicate) -> f64 {
                let p = self.perimeter(area, pred);
                if p == 0 {
                    return 0.0;
                }
                let a = area.len() as f64;
                (4.0 * std::f64::consts::PI * a / (p * p) as f64).min(1.0)
            }
        }
    };
}

impl_mask_slice_immut!('a, MaskSlice<'a>, ArrayView2<'a, u8>);
impl_mask_slice_immut!('a, MaskSliceMut<'a>, ArrayViewMut2<'a, u8>);
