//! 逐通道的预处理流程.
//!
//! 从多通道原始体数据中提取 spot 通道和细胞膜通道, 依次执行:
//!
//! 1. 通道提取 ([`RawVolume::extract_channel`]);
//! 2. 位深度规范化 ([`normalize_bit_depth`]);
//! 3. 滚球背景扣除 ([`subtract_background`]);
//! 4. 直方图拉伸 ([`stretch_histogram`]);
//! 5. 高斯平滑 ([`smooth`]);
//! 6. gamma 校正 ([`gamma`]);
//! 7. 背景底噪扣除 ([`remove_background_floor`]), 需要操作员给出背景区域;
//! 8. z 方向首尾填充 ([`Volume::pad_z`]).
//!
//! 每个阶段都产生新的体数据.

mod gaussian;
mod rolling_ball;
mod stages;

pub use stages::{
    gamma, normalize_bit_depth, remove_background_floor, smooth, stretch_histogram,
    subtract_background,
};

use std::ops::Range;

use log::info;
use ndarray::Zip;

use crate::consts::preprocess::*;
use crate::data::{RawVolume, ScanVolume, Volume};
use crate::dump::Dump;
use crate::error::{Error, Result};
use crate::Idx2d;

/// 通道在流程中的角色.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelRole {
    /// spot 通道.
    Spot,

    /// 细胞膜通道.
    Membrane,
}

impl ChannelRole {
    /// 用于日志与导出文件名的短名称.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelRole::Spot => "spots",
            ChannelRole::Membrane => "membrane",
        }
    }
}

/// 切片上的矩形区域, 以 `(h, w)` 坐标表示.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    top: usize,
    left: usize,
    height: usize,
    width: usize,
}

impl Region {
    /// 左上角为 `(top, left)`, 大小为 `height * width` 的矩形.
    pub fn new(top: usize, left: usize, height: usize, width: usize) -> Self {
        Self {
            top,
            left,
            height,
            width,
        }
    }

    /// 行范围.
    #[inline]
    pub fn rows(&self) -> Range<usize> {
        self.top..self.top + self.height
    }

    /// 列范围.
    #[inline]
    pub fn cols(&self) -> Range<usize> {
        self.left..self.left + self.width
    }

    /// 区域是否非空且完全落在形状为 `(h, w)` 的切片内?
    #[inline]
    pub fn fits(&self, (h, w): Idx2d) -> bool {
        self.height > 0 && self.width > 0 && self.rows().end <= h && self.cols().end <= w
    }
}

/// 背景区域的提供者 (通常是操作员在界面上绘制的矩形).
///
/// 调用是阻塞的. 返回 `None` 表示操作员取消.
pub trait RegionProvider {
    /// 为 `role` 通道的体数据 `volume` 提供一个背景区域.
    fn background_region(&mut self, role: ChannelRole, volume: &ScanVolume) -> Option<Region>;
}

/// 总是返回同一个区域的提供者.
#[derive(Copy, Clone, Debug)]
pub struct FixedRegion(pub Region);

impl RegionProvider for FixedRegion {
    fn background_region(&mut self, _: ChannelRole, _: &ScanVolume) -> Option<Region> {
        Some(self.0)
    }
}

/// 背景底噪的统计方式.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum FloorStat {
    /// 区域内最大值.
    #[default]
    Max,

    /// 区域内均值加 `k` 倍标准差.
    MeanPlusStd(f64),
}

impl FloorStat {
    /// 对样本求底噪. 空样本底噪为 0.
    pub fn eval<I: Iterator<Item = f64>>(&self, samples: I) -> f64 {
        match self {
            FloorStat::Max => samples.fold(0.0, f64::max),
            FloorStat::MeanPlusStd(k) => {
                let (n, sum, sq) = samples.fold((0usize, 0.0, 0.0), |(n, s, q), v| {
                    (n + 1, s + v, q + v * v)
                });
                if n == 0 {
                    return 0.0;
                }
                let mean = sum / n as f64;
                let var = (sq / n as f64 - mean * mean).max(0.0);
                mean + k * var.sqrt()
            }
        }
    }
}

/// 预处理参数.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessConfig {
    /// 滚球半径, 以物理单位计.
    pub rolling_ball_radius: f64,

    /// 直方图拉伸时每侧丢弃的百分比.
    pub saturation: f64,

    /// 是否做直方图均衡化.
    pub equalize: bool,

    /// 平面方向高斯标准差, 以像素计.
    pub sigma_xy: f64,

    /// spot 通道 gamma.
    pub spot_gamma: f64,

    /// 细胞膜通道 gamma.
    pub membrane_gamma: f64,

    /// 背景底噪统计方式.
    pub floor: FloorStat,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            rolling_ball_radius: ROLLING_BALL_RADIUS,
            saturation: SATURATION_PERCENT,
            equalize: false,
            sigma_xy: SIGMA_XY,
            spot_gamma: SPOT_GAMMA,
            membrane_gamma: MEMBRANE_GAMMA,
            floor: FloorStat::Max,
        }
    }
}

impl PreprocessConfig {
    /// 通道对应的 gamma.
    #[inline]
    pub fn gamma_of(&self, role: ChannelRole) -> f64 {
        match role {
            ChannelRole::Spot => self.spot_gamma,
            ChannelRole::Membrane => self.membrane_gamma,
        }
    }
}

/// 预处理结果: 两个已填充、规范化、去噪的通道.
#[derive(Clone, Debug)]
pub struct Preprocessed {
    /// spot 通道.
    pub spots: ScanVolume,

    /// 细胞膜通道.
    pub membrane: ScanVolume,
}

impl Preprocessed {
    /// 两个通道的逐体素乘积, 线性映射回 16-bit 后再做直方图拉伸.
    /// 常用作分类器的输入.
    pub fn combined(&self, saturation: f64) -> ScanVolume {
        let mut product = ndarray::Array3::<f64>::zeros(self.spots.shape());
        Zip::from(&mut product)
            .and(self.spots.data())
            .and(self.membrane.data())
            .for_each(|p, a, b| *p = *a as f64 * *b as f64);
        let max = product.iter().copied().fold(0.0, f64::max);
        let scaled = product.mapv(|p| {
            if max > 0.0 {
                (p / max * U16_MAX_F).round() as u16
            } else {
                0
            }
        });
        let v = Volume::new(scaled, self.spots.calibration().clone());
        stretch_histogram(&v, saturation, false)
    }
}

/// 预处理流程.
#[derive(Clone, Debug, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
    dump: Dump,
}

impl Preprocessor {
    /// 以给定参数构建.
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            dump: Dump::default(),
        }
    }

    /// 设置中间结果导出.
    pub fn with_dump(mut self, dump: Dump) -> Self {
        self.dump = dump;
        self
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// 运行完整流程. `spot_channel`, `membrane_channel` 从 1 开始计数.
    ///
    /// 两个通道都在任何计算之前提取, 通道不存在时立即返回 [`Error::DataInconsistency`].
    /// 操作员取消背景区域时返回 [`Error::UserCancellation`].
    pub fn run(
        &self,
        raw: &RawVolume,
        spot_channel: usize,
        membrane_channel: usize,
        provider: &mut dyn RegionProvider,
    ) -> Result<Preprocessed> {
        raw.calibration().validate()?;
        let spots = raw.extract_channel(spot_channel)?;
        let membrane = raw.extract_channel(membrane_channel)?;
        Ok(Preprocessed {
            spots: self.process_channel(&spots, ChannelRole::Spot, provider)?,
            membrane: self.process_channel(&membrane, ChannelRole::Membrane, provider)?,
        })
    }

    /// 对单个已提取的通道执行阶段 2 至 8.
    pub fn process_channel(
        &self,
        channel: &RawVolume,
        role: ChannelRole,
        provider: &mut dyn RegionProvider,
    ) -> Result<ScanVolume> {
        let name = role.name();
        let cfg = &self.config;

        info!("[{name}] Normalizing bit depth ({:?})", channel.bit_depth());
        let v = normalize_bit_depth(channel)?;

        info!("[{name}] Subtracting background (radius {})", cfg.rolling_ball_radius);
        let v = subtract_background(&v, cfg.rolling_ball_radius)?;

        info!("[{name}] Stretching histogram (saturation {}%)", cfg.saturation);
        let v = stretch_histogram(&v, cfg.saturation, cfg.equalize);

        let factor = v.calibration().anisotropy_factor();
        info!("[{name}] Smoothing");
        let v = smooth(&v, cfg.sigma_xy, factor);

        info!("[{name}] Gamma correction ({})", cfg.gamma_of(role));
        let v = gamma(&v, cfg.gamma_of(role));
        self.dump.volume(&format!("{name}-gamma"), &v)?;

        let region = provider
            .background_region(role, &v)
            .ok_or_else(|| Error::UserCancellation(format!("no background region for {name}")))?;
        info!("[{name}] Removing background floor in {region:?}");
        let v = remove_background_floor(&v, &region, cfg.floor)?;

        let v = v.pad_z();
        self.dump.volume(&format!("{name}-preprocessed"), &v)?;
        Ok(v)
    }
}
