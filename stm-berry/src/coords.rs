//! 物理坐标与 (填充、重采样后的) 像素网格之间的换算.
//!
//! spot 文件从相反的边缘度量 Y 与 Z, 并且目标网格在重采样前首尾各填充了一层切片.
//! 所有轴翻转和填充偏移的算术都集中在本模块, 调用方不应自行计算偏移.

use log::debug;
use ndarray::Array3;

use crate::data::{Calibration, Volume};
use crate::error::{Error, Result};
use crate::Idx3d;

/// 物理坐标 `[x, y, z]`.
pub type Point3 = [f64; 3];

/// 像素坐标 `[x, y, z]`, 即 `[w, h, z]`. 允许为负以表达越界.
pub type Pixel3 = [i64; 3];

/// 向下取整前的容差. 标定常以十进制给出, `0.3 / 0.1` 之类的商略小于整数.
const FLOOR_TOLERANCE: f64 = 1e-9;

/// 容忍浮点误差的向下取整: 与上方整数相差不超过 [`FLOOR_TOLERANCE`] 时取该整数.
#[inline]
fn floor_tolerant(v: f64) -> f64 {
    (v + FLOOR_TOLERANCE).floor()
}

/// 以最近邻采样将 z 方向重采样为各向同性网格. 消费原体数据.
///
/// 各向异性系数 `factor = sz / sx`, 新深度为 `floor(D * factor)`.
/// 结果的三个方向体素尺寸均为 `sx`, 并记录 `factor` 元信息.
///
/// 标定退化时返回 [`Error::Configuration`], 新深度为零时返回 [`Error::DataInconsistency`].
pub fn make_isotropic<T: Clone>(volume: Volume<T>) -> Result<(Volume<T>, f64)> {
    let calib = volume.calibration().clone();
    calib.validate()?;
    let factor = calib.anisotropy_factor();
    let (d, h, w) = volume.shape();
    let depth = isotropic_depth(d, factor);
    if depth == 0 {
        return Err(Error::inconsistent(format!(
            "resampling {d} slices by {factor} leaves an empty volume"
        )));
    }
    debug!("Resampling Z: {d} -> {depth} slices (factor {factor:.4})");

    let data = volume.into_raw();
    let resampled = Array3::from_shape_fn((depth, h, w), |(k, i, j)| {
        data[((k * d) / depth, i, j)].clone()
    });
    let new_calib = Calibration::isotropic(calib.sx(), calib.unit()).with_anisotropy(factor);
    Ok((Volume::new(resampled, new_calib), factor))
}

/// 重采样后的深度 `floor(d * factor)`.
#[inline]
pub fn isotropic_depth(d: usize, factor: f64) -> usize {
    floor_tolerant(d as f64 * factor) as usize
}

/// 物理坐标转换为像素坐标: 各轴除以体素尺寸并向下取整.
pub fn to_pixel_space(point: Point3, calib: &Calibration) -> Result<Pixel3> {
    calib.validate()?;
    let [x, y, z] = point;
    Ok([
        floor_tolerant(x / calib.sx()) as i64,
        floor_tolerant(y / calib.sy()) as i64,
        floor_tolerant(z / calib.sz()) as i64,
    ])
}

/// 像素坐标转换为物理坐标 (体素角点).
#[inline]
pub fn to_physical_space(pixel: Pixel3, calib: &Calibration) -> Point3 {
    let [x, y, z] = pixel;
    [
        x as f64 * calib.sx(),
        y as f64 * calib.sy(),
        z as f64 * calib.sz(),
    ]
}

/// 以总长 `total` 翻转坐标轴.
#[inline]
pub fn invert_axis(value: f64, total: f64) -> f64 {
    total - value
}

/// 补偿重采样前插入的一层填充切片: `z + sz / factor`.
///
/// `factor` 非有限或不为正时返回 [`Error::Configuration`].
pub fn pad_correction(z: f64, sz: f64, factor: f64) -> Result<f64> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(Error::config(format!("invalid anisotropy factor {factor}")));
    }
    Ok(z + sz / factor)
}

/// 像素坐标转换为体数据索引 `(z, h, w)`. 越界时返回 `None`.
pub fn pixel_to_index([x, y, z]: Pixel3, (lz, lh, lw): Idx3d) -> Option<Idx3d> {
    let z = usize::try_from(z).ok()?;
    let h = usize::try_from(y).ok()?;
    let w = usize::try_from(x).ok()?;
    (z < lz && h < lh && w < lw).then_some((z, h, w))
}

/// 各向同性、已填充的目标网格的几何信息.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TargetGeometry {
    calib: Calibration,
    factor: f64,
    shape: Idx3d,
}

impl TargetGeometry {
    /// 由已存在的目标体数据 (控制图像) 构建. 标定必须带有各向异性元信息.
    pub fn of_volume<T>(volume: &Volume<T>) -> Result<Self> {
        let calib = volume.calibration().clone();
        calib.validate()?;
        let factor = calib.recorded_anisotropy()?;
        Ok(Self {
            calib,
            factor,
            shape: volume.shape(),
        })
    }

    /// 由源标定和源形状 `(d, h, w)` 预测 "先填充、再各向同性重采样" 后的网格.
    pub fn predict(source: &Calibration, (d, h, w): Idx3d) -> Result<Self> {
        source.validate()?;
        let factor = source.anisotropy_factor();
        let depth = isotropic_depth(d + 2, factor);
        Ok(Self {
            calib: Calibration::isotropic(source.sx(), source.unit()).with_anisotropy(factor),
            factor,
            shape: (depth, h, w),
        })
    }

    /// 网格标定.
    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calib
    }

    /// 各向异性系数.
    #[inline]
    pub fn anisotropy_factor(&self) -> f64 {
        self.factor
    }

    /// 网格形状 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 网格的物理总高 `H * sy` 与总深 `Z * sz`.
    #[inline]
    pub fn extent(&self) -> (f64, f64) {
        let (z, h, w) = self.shape;
        let [_, total_y, total_z] = to_physical_space([w as i64, h as i64, z as i64], &self.calib);
        (total_y, total_z)
    }

    /// 将 spot 文件中的物理坐标映射到本网格.
    ///
    /// 依次执行 Y 轴翻转, Z 轴翻转, 填充偏移补偿, 像素化.
    /// 返回修正后的物理坐标和像素坐标.
    pub fn spot_to_grid(&self, [x, y, z]: Point3) -> Result<(Point3, Pixel3)> {
        let (total_y, total_z) = self.extent();
        let y = invert_axis(y, total_y);
        let z = pad_correction(invert_axis(z, total_z), self.calib.sz(), self.factor)?;
        let corrected = [x, y, z];
        Ok((corrected, to_pixel_space(corrected, &self.calib)?))
    }

    /// 像素坐标对应的体数据索引, 越界时返回 `None`.
    #[inline]
    pub fn index_of(&self, pixel: Pixel3) -> Option<Idx3d> {
        pixel_to_index(pixel, self.shape)
    }
}
