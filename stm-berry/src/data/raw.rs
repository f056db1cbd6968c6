//! 多通道原始体数据.

use std::path::Path;

use log::debug;
use ndarray::{Array4, Axis};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, NiftiType, NiftiVolume, ReaderOptions};

use super::Calibration;
use crate::error::{Error, Result};
use crate::Idx3d;

/// 原始样本的位表示.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BitDepth {
    /// 8-bit 无符号整数.
    Gray8,

    /// 16-bit 无符号整数.
    Gray16,

    /// 32-bit 浮点.
    Float32,

    /// 打包的多字节颜色 (如 RGB24). 不被流程接受.
    Rgb,
}

/// 按 `(c, z, h, w)` 组织的原始样本.
#[derive(Clone, Debug)]
pub enum RawSamples {
    /// 8-bit 灰度.
    Gray8(Array4<u8>),

    /// 16-bit 灰度.
    Gray16(Array4<u16>),

    /// 浮点灰度.
    Float32(Array4<f32>),

    /// 打包颜色, 每个样本为 `0x00RRGGBB`.
    Rgb(Array4<u32>),
}

macro_rules! on_samples {
    ($samples: expr, $arr: ident => $body: expr) => {
        match $samples {
            RawSamples::Gray8($arr) => $body,
            RawSamples::Gray16($arr) => $body,
            RawSamples::Float32($arr) => $body,
            RawSamples::Rgb($arr) => $body,
        }
    };
}

impl RawSamples {
    /// 样本的位表示.
    pub fn bit_depth(&self) -> BitDepth {
        match self {
            RawSamples::Gray8(_) => BitDepth::Gray8,
            RawSamples::Gray16(_) => BitDepth::Gray16,
            RawSamples::Float32(_) => BitDepth::Float32,
            RawSamples::Rgb(_) => BitDepth::Rgb,
        }
    }

    /// `(c, z, h, w)` 形状.
    fn dim(&self) -> (usize, usize, usize, usize) {
        on_samples!(self, a => a.dim())
    }
}

/// 多通道三维原始显微体数据, 即流程的输入.
#[derive(Clone, Debug)]
pub struct RawVolume {
    calib: Calibration,
    samples: RawSamples,
}

/// 将 nifti `xyzt_units` 转换成单位名称.
fn unit_from_header(header: &NiftiHeader) -> &'static str {
    match header.xyzt_units & 0x07 {
        1 => "m",
        2 => "mm",
        3 => "µm",
        _ => "pixel",
    }
}

impl RawVolume {
    /// 由样本和标定直接构建.
    ///
    /// 如果任一维度为零, 则返回 [`Error::DataInconsistency`].
    pub fn new(samples: RawSamples, calib: Calibration) -> Result<Self> {
        let (c, z, h, w) = samples.dim();
        if c * z * h * w == 0 {
            return Err(Error::inconsistent(format!(
                "empty raw volume ({c}, {z}, {h}, {w})"
            )));
        }
        Ok(Self { calib, samples })
    }

    /// 打开 nifti 文件格式 (`.nii`, `.nii.gz`) 的显微体数据.
    ///
    /// 前三个轴依次为 W, H, Z, 若存在第四个轴则将其视为通道轴.
    /// 标定取自 `pixdim`, 单位取自 `xyzt_units`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ResourceNotFound(path.to_owned()));
        }
        let obj = ReaderOptions::new().read_file(path)?;
        let header = obj.header().clone();
        let ndim = header.dim[0] as usize;
        let channels = match ndim {
            3 => 1,
            4 => header.dim[4] as usize,
            _ => {
                return Err(Error::inconsistent(format!(
                    "expected a 3D or 4D volume, got {ndim} dimensions"
                )))
            }
        };
        // [W, H, z] -> [z, H, W].
        let (z, h, w) = (
            header.dim[3] as usize,
            header.dim[2] as usize,
            header.dim[1] as usize,
        );
        let [_, sx, sy, sz, ..] = header.pixdim;
        let calib = Calibration::new(sx as f64, sy as f64, sz as f64, unit_from_header(&header));

        let volume = obj.into_volume();
        let dtype = volume.data_type();
        debug!("Opening {} as {dtype:?} ({channels}, {z}, {h}, {w})", path.display());

        macro_rules! load_as {
            ($t: ty) => {{
                let data = volume.into_ndarray::<$t>()?;
                let rev: Vec<usize> = (0..data.ndim()).rev().collect();
                data.permuted_axes(rev.as_slice())
                    .as_standard_layout()
                    .into_owned()
                    .into_shape((channels, z, h, w))
                    .map_err(|e| Error::inconsistent(e.to_string()))?
            }};
        }

        let samples = match dtype {
            NiftiType::Uint8 => RawSamples::Gray8(load_as!(u8)),
            NiftiType::Uint16 => RawSamples::Gray16(load_as!(u16)),
            NiftiType::Rgb24 | NiftiType::Rgba32 => {
                return Err(Error::config(format!(
                    "packed color representation {dtype:?} is not supported"
                )))
            }
            _ => RawSamples::Float32(load_as!(f32)),
        };
        Self::new(samples, calib)
    }

    /// 获取标定.
    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calib
    }

    /// 获取底层样本.
    #[inline]
    pub fn samples(&self) -> &RawSamples {
        &self.samples
    }

    /// 样本的位表示.
    #[inline]
    pub fn bit_depth(&self) -> BitDepth {
        self.samples.bit_depth()
    }

    /// 通道个数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.dim().0
    }

    /// 单个通道的形状 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let (_, z, h, w) = self.samples.dim();
        (z, h, w)
    }

    /// 提取第 `channel` 个通道 (从 1 开始计数) 为单通道原始体数据. 原数据不变.
    ///
    /// 通道不存在时返回 [`Error::DataInconsistency`].
    pub fn extract_channel(&self, channel: usize) -> Result<RawVolume> {
        let n = self.channels();
        if channel == 0 || channel > n {
            return Err(Error::inconsistent(format!(
                "channel {channel} requested but the volume has {n} channel(s)"
            )));
        }
        let index = channel - 1;
        macro_rules! pick {
            ($variant: ident, $arr: expr) => {
                RawSamples::$variant(
                    $arr.index_axis(Axis(0), index)
                        .insert_axis(Axis(0))
                        .to_owned(),
                )
            };
        }
        let samples = match &self.samples {
            RawSamples::Gray8(a) => pick!(Gray8, a),
            RawSamples::Gray16(a) => pick!(Gray16, a),
            RawSamples::Float32(a) => pick!(Float32, a),
            RawSamples::Rgb(a) => pick!(Rgb, a),
        };
        Ok(Self {
            calib: self.calib.clone(),
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{BitDepth, RawSamples, RawVolume};
    use crate::data::Calibration;
    use crate::error::ErrorKind;
    use ndarray::Array4;

    fn three_channels() -> RawVolume {
        let data = Array4::from_shape_fn((3, 2, 4, 4), |(c, z, _, _)| (c * 10 + z) as u16);
        RawVolume::new(
            RawSamples::Gray16(data),
            Calibration::new(0.1, 0.1, 0.3, "µm"),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_channel() {
        let raw = three_channels();
        assert_eq!(raw.channels(), 3);
        assert_eq!(raw.shape(), (2, 4, 4));

        let ch3 = raw.extract_channel(3).unwrap();
        assert_eq!(ch3.channels(), 1);
        assert_eq!(ch3.bit_depth(), BitDepth::Gray16);
        let RawSamples::Gray16(a) = ch3.samples() else {
            unreachable!()
        };
        assert_eq!(a[(0, 1, 2, 2)], 21);
        assert_eq!(ch3.calibration(), raw.calibration());
    }

    #[test]
    fn test_missing_channel_fails_fast() {
        let raw = three_channels();
        assert_eq!(
            raw.extract_channel(4).unwrap_err().kind(),
            ErrorKind::DataInconsistency
        );
        assert!(raw.extract_channel(0).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let e = RawVolume::open("/definitely/not/here.nii").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::ResourceNotFound);
    }
}
