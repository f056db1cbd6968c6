//! 预处理的各个阶段. 每个阶段都返回新的体数据, 输入保持不变.

use log::debug;
use ndarray::{Array3, ArrayViewMut2, Zip};

use super::{gaussian, rolling_ball, FloorStat, Region};
use crate::consts::preprocess::U16_MAX_F;
use crate::data::{RawSamples, RawVolume, ScanVolume, Volume};
use crate::error::{Error, Result};

/// 将单通道原始体数据规范化为 16-bit 表示.
///
/// - 8-bit 数据乘以 257 (即 `0xff -> 0xffff`);
/// - 16-bit 数据保持不变;
/// - 浮点数据从 `[min, max]` 线性映射到 `[0, 65535]` 后截断, 常量体映射为 0, NaN 映射为 0;
/// - 打包颜色数据被拒绝, 返回 [`Error::Configuration`].
///
/// 多通道输入返回 [`Error::DataInconsistency`].
pub fn normalize_bit_depth(raw: &RawVolume) -> Result<ScanVolume> {
    if raw.channels() != 1 {
        return Err(Error::inconsistent(format!(
            "expected a single channel, got {}",
            raw.channels()
        )));
    }
    let calib = raw.calibration().clone();
    let shape = raw.shape();
    let data: Array3<u16> = match raw.samples() {
        RawSamples::Gray8(a) => a.map(|v| *v as u16 * 257),
        RawSamples::Gray16(a) => a.to_owned(),
        RawSamples::Float32(a) => {
            let (lo, hi) = a
                .iter()
                .filter(|v| !v.is_nan())
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(*v), hi.max(*v))
                });
            let span = (hi - lo) as f64;
            debug!("Rescaling float samples from [{lo}, {hi}]");
            a.map(|v| {
                if v.is_nan() || !(span > 0.0) || !span.is_finite() {
                    0
                } else {
                    ((*v - lo) as f64 / span * U16_MAX_F) as u16
                }
            })
        }
        RawSamples::Rgb(_) => {
            return Err(Error::config(
                "packed color volumes must be split into channels first",
            ))
        }
    }
    .into_shape(shape)
    .map_err(|e| Error::inconsistent(e.to_string()))?;
    Ok(Volume::new(data, calib))
}

/// 对每一层切片做滚球背景扣除. `radius` 以物理单位计, 以 `sx` 换算为像素.
pub fn subtract_background(volume: &ScanVolume, radius: f64) -> Result<ScanVolume> {
    volume.calibration().validate()?;
    let radius_px = radius / volume.calibration().sx();
    debug!("Rolling ball radius: {radius_px:.2} px");

    let op = |mut s: ArrayViewMut2<u16>| {
        let img = s.map(|p| *p as f64);
        let bg = rolling_ball::background(img.view(), radius_px);
        Zip::from(&mut s)
            .and(&img)
            .and(&bg)
            .for_each(|o, i, b| *o = (i - b).clamp(0.0, U16_MAX_F).round() as u16);
    };

    let mut out = volume.clone();
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            out.par_for_each_slice_mut(op);
        } else {
            out.slice_iter_mut().for_each(op);
        }
    }
    Ok(out)
}

/// 整体直方图的下/上截断点, 每一侧丢弃 `saturation` 百分比的体素.
fn stretch_bounds(hist: &[usize], total: usize, saturation: f64) -> (usize, usize) {
    let drop = (total as f64 * saturation / 100.0) as usize;
    let mut acc = 0;
    let lo = hist
        .iter()
        .position(|c| {
            acc += c;
            acc > drop
        })
        .unwrap_or(0);
    acc = 0;
    let hi = hist
        .iter()
        .rposition(|c| {
            acc += c;
            acc > drop
        })
        .unwrap_or(hist.len() - 1);
    (lo, hi)
}

/// 整体直方图拉伸, 每一侧丢弃 `saturation` 百分比的体素. 可选直方图均衡化.
///
/// 截断点重合 (如常量体) 时, 拉伸不做任何事.
pub fn stretch_histogram(volume: &ScanVolume, saturation: f64, equalize: bool) -> ScanVolume {
    let mut hist = vec![0usize; u16::MAX as usize + 1];
    volume.data().iter().for_each(|v| hist[*v as usize] += 1);
    let total = volume.size();

    if equalize {
        let mut cdf = Vec::with_capacity(hist.len());
        let mut acc = 0usize;
        for c in hist.iter() {
            acc += c;
            cdf.push(acc);
        }
        let first = cdf.iter().copied().find(|c| *c > 0).unwrap_or(0);
        let span = total.saturating_sub(first);
        return volume.map(|v| {
            if span == 0 {
                *v
            } else {
                ((cdf[*v as usize] - first) as f64 / span as f64 * U16_MAX_F).round() as u16
            }
        });
    }

    let (lo, hi) = stretch_bounds(&hist, total, saturation);
    debug!("Stretching histogram [{lo}, {hi}] -> [0, 65535]");
    if hi <= lo {
        return volume.clone();
    }
    let scale = U16_MAX_F / (hi - lo) as f64;
    volume.map(|v| ((*v as f64 - lo as f64) * scale).clamp(0.0, U16_MAX_F).round() as u16)
}

/// 可分离高斯平滑, `sigma_z = sigma_xy * factor`. 边界取最近的边缘值.
pub fn smooth(volume: &ScanVolume, sigma_xy: f64, factor: f64) -> ScanVolume {
    let sigma_z = sigma_xy * factor;
    debug!("Gaussian sigma: xy = {sigma_xy}, z = {sigma_z}");
    let data = volume.data().map(|v| *v as f64);
    let blurred = gaussian::blur_3d(data, sigma_xy, sigma_z);
    Volume::new(
        blurred.mapv(|v| v.clamp(0.0, U16_MAX_F).round() as u16),
        volume.calibration().clone(),
    )
}

/// gamma 校正: `65535 * (v / 65535) ^ gamma`.
pub fn gamma(volume: &ScanVolume, gamma: f64) -> ScanVolume {
    volume.map(|v| (U16_MAX_F * (*v as f64 / U16_MAX_F).powf(gamma)).round() as u16)
}

/// 逐层扣除背景底噪: 在 `region` 内取最大值 (或均值加 `k` 倍标准差) 作为底噪, 扣除并截断到 0.
///
/// `region` 超出切片范围或为空时返回 [`Error::DataInconsistency`].
pub fn remove_background_floor(
    volume: &ScanVolume,
    region: &Region,
    stat: FloorStat,
) -> Result<ScanVolume> {
    if !region.fits(volume.slice_shape()) {
        return Err(Error::inconsistent(format!(
            "background region {region:?} does not fit slices of shape {:?}",
            volume.slice_shape()
        )));
    }
    let mut out = volume.clone();
    for (z, mut s) in out.slice_iter_mut().enumerate() {
        let patch = s.slice(ndarray::s![region.rows(), region.cols()]);
        let floor = stat.eval(patch.iter().map(|v| *v as f64));
        debug!("Slice {z}: background floor {floor:.1}");
        s.mapv_inplace(|v| (v as f64 - floor).max(0.0).round() as u16);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Calibration;
    use crate::error::ErrorKind;
    use ndarray::Array4;

    fn single(samples: RawSamples) -> RawVolume {
        RawVolume::new(samples, Calibration::new(0.5, 0.5, 1.0, "µm")).unwrap()
    }

    #[test]
    fn test_normalize_bit_depth() {
        let g8 = single(RawSamples::Gray8(Array4::from_elem((1, 1, 2, 2), 255)));
        assert!(normalize_bit_depth(&g8)
            .unwrap()
            .data()
            .iter()
            .all(|v| *v == 65535));

        let f = Array4::from_shape_fn((1, 1, 1, 3), |(_, _, _, w)| w as f32 * 0.5 - 1.0);
        let f = normalize_bit_depth(&single(RawSamples::Float32(f))).unwrap();
        let col: Vec<u16> = f.data().iter().copied().collect();
        assert_eq!(col, vec![0, 32767, 65535]);

        let flat = single(RawSamples::Float32(Array4::from_elem((1, 1, 2, 2), 3.0)));
        assert!(normalize_bit_depth(&flat)
            .unwrap()
            .data()
            .iter()
            .all(|v| *v == 0));

        let rgb = single(RawSamples::Rgb(Array4::zeros((1, 1, 2, 2))));
        assert_eq!(
            normalize_bit_depth(&rgb).unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_stretch_histogram() {
        let data = Array3::from_shape_fn((1, 10, 100), |(_, h, w)| (1000 + h * 100 + w) as u16);
        let v = Volume::new(data, Calibration::uncalibrated());
        let s = stretch_histogram(&v, 1.0, false);
        // 每侧丢弃 10 个体素.
        assert_eq!(s[(0, 0, 10)], 0);
        assert_eq!(s[(0, 9, 89)], 65535);
        assert_eq!(s[(0, 0, 0)], 0);
        assert_eq!(s[(0, 9, 99)], 65535);

        let flat = Volume::new(
            Array3::from_elem((1, 2, 2), 9u16),
            Calibration::uncalibrated(),
        );
        assert_eq!(stretch_histogram(&flat, 0.1, false).data(), flat.data());
    }

    #[test]
    fn test_gamma() {
        let v = Volume::new(
            Array3::from_shape_vec((1, 1, 3), vec![0u16, 16384, 65535]).unwrap(),
            Calibration::uncalibrated(),
        );
        let g = gamma(&v, 0.5);
        assert_eq!(g[(0, 0, 0)], 0);
        assert_eq!(g[(0, 0, 2)], 65535);
        assert!(g[(0, 0, 1)] > 32000 && g[(0, 0, 1)] < 33000);
    }

    #[test]
    fn test_background_floor() {
        let data = Array3::from_shape_fn((2, 4, 4), |(z, h, w)| (z * 10 + h + w) as u16);
        let v = Volume::new(data, Calibration::uncalibrated());
        let r = Region::new(0, 0, 2, 2);
        let out = remove_background_floor(&v, &r, FloorStat::Max).unwrap();
        // 第 0 层底噪为 2, 第 1 层为 12.
        assert_eq!(out[(0, 3, 3)], 4);
        assert_eq!(out[(1, 3, 3)], 4);
        assert_eq!(out[(1, 0, 0)], 0);

        let outside = Region::new(3, 3, 2, 2);
        let e = remove_background_floor(&v, &outside, FloorStat::Max).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DataInconsistency);
    }

    #[test]
    fn test_subtract_background_flat() {
        let v = Volume::new(
            Array3::from_elem((2, 12, 12), 500u16),
            Calibration::new(1.0, 1.0, 2.0, "µm"),
        );
        let out = subtract_background(&v, 4.0).unwrap();
        assert!(out.data().iter().all(|p| *p == 0));
        assert_eq!(out.calibration(), v.calibration());
    }
}
