//! 以 spot 为向导的粘连区域分离.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use ndarray::ArrayView3;

use crate::consts::gray::*;
use crate::consts::refine::*;
use crate::data::{LabelVolume, Mask, Volume};
use crate::error::{Error, Result};
use crate::morph::{binary_closing, chamfer_distance, extended_minima_watershed, Connectivity};
use crate::spots::SpotStore;
use crate::Idx3d;

/// 分水岭分离的参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WatershedConfig {
    /// 扩展极小值的动态阈值, 以体素计.
    pub dynamic: f32,

    /// 泛洪使用的邻接规则.
    pub connectivity: Connectivity,

    /// 融合保留碎片时闭运算立方体结构元素的半径.
    pub closing_radius: usize,
}

impl Default for WatershedConfig {
    fn default() -> Self {
        Self {
            dynamic: WATERSHED_DYNAMIC,
            connectivity: Connectivity::Six,
            closing_radius: CLOSING_RADIUS,
        }
    }
}

/// 将掩膜前景切分为碎片, 返回标签体 (0 为背景或坝) 和碎片个数.
///
/// 以前景体素到背景的 chamfer 距离取负作为地形, 在前景内做扩展极小值分水岭.
/// 每个足够 "厚" 的部分成为一个盆地, 细窄的连接处成为坝.
pub fn fragment(mask: &Mask, config: &WatershedConfig) -> (LabelVolume, u32) {
    let relief = chamfer_distance(mask.data(), is_background).mapv(|d| -d);
    let domain = mask.data().map(|p| is_foreground(*p));
    let (labels, n) = extended_minima_watershed(
        relief.view(),
        domain.view(),
        config.dynamic,
        config.connectivity,
    );
    (Volume::new(labels, mask.calibration().clone()), n)
}

/// 在 `seeds` 处采样碎片标签. 越界的种子以及落在背景或坝上的种子被忽略.
pub fn kept_labels(labels: ArrayView3<u32>, seeds: &[Idx3d]) -> BTreeSet<u32> {
    seeds
        .iter()
        .filter_map(|pos| labels.get(*pos).copied())
        .filter(|l| *l != 0)
        .collect()
}

/// 只保留标签属于 `keep` 的碎片, 返回二值掩膜. 标签 0 从不保留.
pub fn keep_labels(labels: &LabelVolume, keep: &BTreeSet<u32>) -> Mask {
    Mask::mask_from(labels, |l| *l != 0 && keep.contains(l))
}

/// 分离粘连的区域, 只保留含有 spot 的部分.
///
/// 依次为: 分水岭切分 ([`fragment`]), 在 spot 像素处采样要保留的碎片,
/// 保留这些碎片, 最后以立方体闭运算把它们重新融合为一个区域.
///
/// `spots` 必须已映射到 `mask` 所在的网格. 未提供时返回 [`Error::Configuration`];
/// 没有任何 spot 落在碎片上时返回 [`Error::DataInconsistency`].
pub fn separate_touching(
    mask: &Mask,
    spots: Option<&SpotStore>,
    config: &WatershedConfig,
) -> Result<Mask> {
    let spots = spots.ok_or_else(|| Error::config("touch separation requires spots"))?;
    let (labels, n) = fragment(mask, config);
    info!("Watershed split the mask into {n} fragment(s)");

    let seeds = spots.seeds(mask.shape());
    if seeds.len() < spots.len() {
        warn!("{} spot(s) lie outside the grid", spots.len() - seeds.len());
    }
    let keep = kept_labels(labels.data(), &seeds);
    if keep.is_empty() {
        return Err(Error::inconsistent("no spot lies on a mask fragment"));
    }
    debug!("Keeping fragments {keep:?}");

    let kept = keep_labels(&labels, &keep);
    let closed = binary_closing(kept.data(), config.closing_radius);
    Ok(Volume::new(closed, mask.calibration().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Pixel3;
    use crate::data::Calibration;
    use crate::error::ErrorKind;
    use crate::spots::Spot;
    use ndarray::Array3;

    /// 两个半径为 5 的球, 中心在 `(6, 6, 6)` 与 `(19, 6, 6)`, 由一根细杆相连.
    fn dumbbell() -> Mask {
        let data = Array3::from_shape_fn((26, 13, 13), |(z, h, w)| {
            let (z, h, w) = (z as i64, h as i64, w as i64);
            let ball = |c: i64| (z - c).pow(2) + (h - 6).pow(2) + (w - 6).pow(2) <= 25;
            let bar = (6..=19).contains(&z) && (h - 6).pow(2) + (w - 6).pow(2) <= 1;
            if ball(6) || ball(19) || bar {
                MASK_FOREGROUND
            } else {
                MASK_BACKGROUND
            }
        });
        Volume::new(data, Calibration::uncalibrated())
    }

    fn spots_at(pixels: &[Pixel3]) -> SpotStore {
        SpotStore::from_spots(
            pixels
                .iter()
                .enumerate()
                .map(|(i, p)| Spot {
                    id: format!("{:04}-{:04}", p[2], i + 1),
                    physical: [p[0] as f64, p[1] as f64, p[2] as f64],
                    pixel: *p,
                })
                .collect(),
        )
    }

    /// 前景的 26-连通分量个数.
    fn components(mask: &Mask) -> usize {
        let shape = mask.shape();
        let mut seen = Array3::<bool>::default(shape);
        let mut n = 0;
        for (start, p) in mask.data().indexed_iter() {
            if seen[start] || !is_foreground(*p) {
                continue;
            }
            n += 1;
            seen[start] = true;
            let mut stack = vec![start];
            while let Some(cur) = stack.pop() {
                for next in Connectivity::TwentySix.neighbours(cur, shape) {
                    if !seen[next] && is_foreground(mask[next]) {
                        seen[next] = true;
                        stack.push(next);
                    }
                }
            }
        }
        n
    }

    fn shallow() -> WatershedConfig {
        WatershedConfig {
            dynamic: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_kept_labels() {
        let labels = Array3::from_shape_vec((1, 2, 3), vec![0u32, 1, 1, 2, 0, 3]).unwrap();
        let keep = kept_labels(
            labels.view(),
            &[(0, 0, 0), (0, 0, 1), (0, 0, 2), (0, 1, 2), (5, 5, 5)],
        );
        assert_eq!(keep, BTreeSet::from([1, 3]));
        assert!(kept_labels(labels.view(), &[]).is_empty());
    }

    #[test]
    fn test_fragment_dumbbell() {
        let mask = dumbbell();
        let (labels, n) = fragment(&mask, &shallow());
        assert_eq!(n, 2);
        let (a, b) = (labels[(6, 6, 6)], labels[(19, 6, 6)]);
        assert!(a != 0 && b != 0 && a != b);
        let keep = kept_labels(labels.data(), &[(6, 6, 6), (19, 6, 6)]);
        assert_eq!(keep, BTreeSet::from([a, b]));

        // 默认动态下细杆不足以分开两个球.
        let (labels, _) = fragment(&mask, &WatershedConfig::default());
        assert_eq!(labels[(6, 6, 6)], labels[(19, 6, 6)]);
    }

    #[test]
    fn test_separate_keeps_seeded_ball() {
        let mask = dumbbell();
        let spots = spots_at(&[[6, 6, 6]]);
        let out = separate_touching(&mask, Some(&spots), &shallow()).unwrap();
        assert_eq!(out[(6, 6, 6)], MASK_FOREGROUND);
        assert_eq!(out[(19, 6, 6)], MASK_BACKGROUND);
        assert!(out.count_foreground() < mask.count_foreground());
        assert_eq!(out.calibration(), mask.calibration());

        let spots = spots_at(&[[6, 6, 6], [6, 6, 19]]);
        let out = separate_touching(&mask, Some(&spots), &shallow()).unwrap();
        assert_eq!(out[(6, 6, 6)], MASK_FOREGROUND);
        assert_eq!(out[(19, 6, 6)], MASK_FOREGROUND);
        assert_eq!(components(&mask), 1);
        assert_eq!(components(&out), 1);
    }

    #[test]
    fn test_separate_errors() {
        let mask = dumbbell();
        let e = separate_touching(&mask, None, &shallow()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);

        let spots = spots_at(&[[0, 0, 0], [100, 100, 100]]);
        let e = separate_touching(&mask, Some(&spots), &shallow()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DataInconsistency);
    }
}
