use std::ops::{Index, IndexMut};

use ndarray::{Array3, ArrayView, ArrayView2, ArrayViewMut2, Axis, Ix3};
use num::Zero;
use serde::{Deserialize, Serialize};

use crate::consts::gray::*;
use crate::error::{Error, Result};
use crate::{Idx2d, Idx3d};

pub mod lut;
pub mod raw;
pub mod save;
pub mod slice;

pub use raw::{BitDepth, RawSamples, RawVolume};
pub use slice::{MaskSlice, MaskSliceMut};

/// 体素的物理尺寸及单位.
///
/// 除非显式地重采样 (见 [`crate::coords::make_isotropic`]), 所有操作都保持标定不变.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    sx: f64,
    sy: f64,
    sz: f64,
    unit: String,

    /// 各向同性重采样时记录下的原始各向异性系数 `sz / sx`.
    anisotropy: Option<f64>,
}

impl Calibration {
    /// 构建标定. 此处不检查合法性, 合法性由 [`Self::validate`] 负责.
    pub fn new(sx: f64, sy: f64, sz: f64, unit: impl Into<String>) -> Self {
        Self {
            sx,
            sy,
            sz,
            unit: unit.into(),
            anisotropy: None,
        }
    }

    /// 三个方向体素尺寸均为 `size` 的标定.
    #[inline]
    pub fn isotropic(size: f64, unit: impl Into<String>) -> Self {
        Self::new(size, size, size, unit)
    }

    /// 未标定 (单位为像素) 的标定.
    #[inline]
    pub fn uncalibrated() -> Self {
        Self::isotropic(1.0, "pixel")
    }

    /// 检查标定是否退化. 任一方向体素尺寸非有限或不为正时返回 `Err`.
    pub fn validate(&self) -> Result<()> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if ok(self.sx) && ok(self.sy) && ok(self.sz) {
            Ok(())
        } else {
            Err(Error::config(format!(
                "degenerate calibration ({}, {}, {}) {}",
                self.sx, self.sy, self.sz, self.unit
            )))
        }
    }

    /// 宽方向 (自然图像的水平方向, 物理 X) 体素尺寸.
    #[inline]
    pub fn sx(&self) -> f64 {
        self.sx
    }

    /// 高方向 (自然图像的垂直方向, 物理 Y) 体素尺寸.
    #[inline]
    pub fn sy(&self) -> f64 {
        self.sy
    }

    /// 空间方向 (相邻切片方向, 物理 Z) 体素尺寸.
    #[inline]
    pub fn sz(&self) -> f64 {
        self.sz
    }

    /// 物理单位.
    #[inline]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// 由当前体素尺寸计算的各向异性系数 `sz / sx`.
    #[inline]
    pub fn anisotropy_factor(&self) -> f64 {
        self.sz / self.sx
    }

    /// 重采样时记录下的各向异性系数. 未记录时返回 [`Error::Configuration`].
    pub fn recorded_anisotropy(&self) -> Result<f64> {
        self.anisotropy
            .ok_or_else(|| Error::config("anisotropy factor metadata is absent"))
    }

    /// 附加各向异性元信息.
    #[inline]
    pub fn with_anisotropy(mut self, factor: f64) -> Self {
        self.anisotropy = Some(factor);
        self
    }

    /// 三个方向的体素尺寸是否 (在浮点容差内) 相等?
    pub fn is_isotropic(&self) -> bool {
        let tol = 1e-9 * self.sx.abs().max(1.0);
        (self.sx - self.sy).abs() <= tol && (self.sx - self.sz).abs() <= tol
    }
}

/// 标定的三维单通道体数据, 以 `(z, h, w)` 索引.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Volume<T> {
    calib: Calibration,
    data: Array3<T>,
}

/// 规范化后的 16-bit 强度体数据.
pub type ScanVolume = Volume<u16>;

/// 二值掩膜. 前景为 [`MASK_FOREGROUND`], 背景为 [`MASK_BACKGROUND`].
pub type Mask = Volume<u8>;

/// 物理单位距离体数据.
pub type DistanceVolume = Volume<f32>;

/// 整数标签体数据 (分类器输出, 分水岭碎片).
pub type LabelVolume = Volume<u32>;

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl<T> Volume<T> {
    /// 由数据和标定直接构建.
    #[inline]
    pub fn new(data: Array3<T>, calib: Calibration) -> Self {
        Self { calib, data }
    }

    /// 获取标定.
    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calib
    }

    /// 替换标定, 数据不变.
    #[inline]
    pub fn with_calibration(mut self, calib: Calibration) -> Self {
        self.calib = calib;
        self
    }

    /// 获取数据形状 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取数据水平切片形状大小.
    #[inline]
    pub fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取给定位置的体素值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx3d) -> Option<&T> {
        self.data.get(pos)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, T, Ix3> {
        self.data.view()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<T> {
        self.data
    }

    /// 获取 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, T> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取能按升序迭代水平可变切片的迭代器.
    #[inline]
    pub fn slice_iter_mut(&mut self) -> impl ExactSizeIterator<Item = ArrayViewMut2<'_, T>> {
        self.data.axis_iter_mut(Axis(0))
    }

    /// 逐体素映射为新的体数据, 标定不变.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Volume<U> {
        Volume {
            calib: self.calib.clone(),
            data: self.data.map(f),
        }
    }
}

impl<T: Clone + Zero> Volume<T> {
    /// 全零体数据.
    #[inline]
    pub fn zeros(shape: Idx3d, calib: Calibration) -> Self {
        Self::new(Array3::zeros(shape), calib)
    }

    /// 在 z 方向首尾各添加一层全零切片, 返回新的体数据. 标定不变.
    ///
    /// 填充后第 `k` 层 (`1 <= k <= len_z`) 等于原数据第 `k - 1` 层.
    pub fn pad_z(&self) -> Self {
        let (z, h, w) = self.shape();
        let mut data = Array3::zeros((z + 2, h, w));
        data.slice_mut(ndarray::s![1..z + 1, .., ..])
            .assign(&self.data);
        Self::new(data, self.calib.clone())
    }
}

/// 掩膜方法集合.
impl Volume<u8> {
    /// 以谓词 `pred` 从任意体数据生成二值掩膜.
    pub fn mask_from<T, F: Fn(&T) -> bool>(source: &Volume<T>, pred: F) -> Self {
        source.map(|v| {
            if pred(v) {
                MASK_FOREGROUND
            } else {
                MASK_BACKGROUND
            }
        })
    }

    /// 前景体素个数.
    #[inline]
    pub fn count_foreground(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 给定位置是否是前景. 越界时返回 `false`.
    #[inline]
    pub fn is_foreground_at(&self, pos: Idx3d) -> bool {
        self.data.get(pos).is_some_and(|p| is_foreground(*p))
    }

    /// 获取能按升序迭代可变掩膜切片的迭代器.
    #[inline]
    pub fn mask_slice_iter_mut(&mut self) -> impl ExactSizeIterator<Item = MaskSliceMut<'_>> {
        self.slice_iter_mut().map(MaskSliceMut::new)
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl<T: Send + Sync> Volume<T> {
    /// 借助 `rayon`, 并行地对每个水平可变切片实施 `op` 操作.
    pub fn par_for_each_slice_mut<F>(&mut self, op: F)
    where
        F: Fn(ArrayViewMut2<T>) + Sync + Send,
    {
        self.data
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(op);
    }
}

#[cfg(feature = "rayon")]
impl Volume<u8> {
    /// 借助 `rayon`, 并行地对每个水平可变掩膜切片实施 `op` 操作, 返回各切片结果之和.
    pub fn par_sum_mask_slices_mut<F>(&mut self, op: F) -> usize
    where
        F: Fn(MaskSliceMut) -> usize + Sync + Send,
    {
        self.data
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .map(|v| op(MaskSliceMut::new(v)))
            .sum()
    }
}
