use crate::consts::measure::QUASI_EUCLIDEAN;
use crate::Predicate;
use itertools::iproduct;
use ndarray::{Array3, ArrayView3};

/// 前向扫描使用的半邻域 (按行优先位于当前体素之前的 13 个邻居) 及其权重.
fn forward_half() -> Vec<((isize, isize, isize), f32)> {
    iproduct!(-1..=0isize, -1..=1isize, -1..=1isize)
        .filter(|&(dz, dh, dw)| dz < 0 || (dz == 0 && (dh < 0 || (dh == 0 && dw < 0))))
        .map(|(dz, dh, dw)| {
            let order = (dz != 0) as usize + (dh != 0) as usize + (dw != 0) as usize;
            ((dz, dh, dw), QUASI_EUCLIDEAN[order - 1])
        })
        .collect()
}

/// 类欧氏 chamfer 距离变换, 单位为体素.
///
/// 对每个体素, 计算其到最近的 "源" 体素 (满足 `is_source` 的体素) 的 chamfer 距离,
/// 源体素自身为 0. 26-邻域权重分别为 1, √2, √3, 以前向/后向两次光栅扫描完成.
/// 若不存在任何源体素, 则全部为 `+∞`.
pub fn chamfer_distance(volume: ArrayView3<u8>, is_source: Predicate) -> Array3<f32> {
    let (lz, lh, lw) = volume.dim();
    let mut dist = volume.map(|p| if is_source(*p) { 0.0 } else { f32::INFINITY });
    let forward = forward_half();

    // 前向扫描.
    for z in 0..lz {
        for h in 0..lh {
            for w in 0..lw {
                let mut best = dist[(z, h, w)];
                if best == 0.0 {
                    continue;
                }
                for &((dz, dh, dw), weight) in forward.iter() {
                    if let Some(n) = super::offset_within((z, h, w), (dz, dh, dw), (lz, lh, lw)) {
                        best = best.min(dist[n] + weight);
                    }
                }
                dist[(z, h, w)] = best;
            }
        }
    }

    // 后向扫描, 使用镜像半邻域.
    for z in (0..lz).rev() {
        for h in (0..lh).rev() {
            for w in (0..lw).rev() {
                let mut best = dist[(z, h, w)];
                if best == 0.0 {
                    continue;
                }
                for &((dz, dh, dw), weight) in forward.iter() {
                    if let Some(n) = super::offset_within((z, h, w), (-dz, -dh, -dw), (lz, lh, lw))
                    {
                        best = best.min(dist[n] + weight);
                    }
                }
                dist[(z, h, w)] = best;
            }
        }
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::{chamfer_distance, forward_half};
    use crate::consts::gray::*;
    use ndarray::Array3;

    #[test]
    fn test_forward_half() {
        let half = forward_half();
        assert_eq!(half.len(), 13);
        assert_eq!(half.iter().filter(|(_, w)| *w == 1.0).count(), 3);
    }

    #[test]
    fn test_single_source() {
        let mut v = Array3::<u8>::zeros((5, 5, 5));
        v[(2, 2, 2)] = MASK_FOREGROUND;
        let d = chamfer_distance(v.view(), is_foreground);
        assert_eq!(d[(2, 2, 2)], 0.0);
        assert_eq!(d[(2, 2, 4)], 2.0);
        assert!((d[(3, 3, 2)] - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert!((d[(0, 0, 0)] - 2.0 * 1.732_050_8).abs() < 1e-5);
    }

    #[test]
    fn test_no_source() {
        let v = Array3::<u8>::zeros((2, 3, 4));
        let d = chamfer_distance(v.view(), is_foreground);
        assert!(d.iter().all(|x| x.is_infinite()));
    }

    /// 距离沿远离源的方向单调不减.
    #[test]
    fn test_monotonic_growth() {
        let v = Array3::from_shape_fn((3, 4, 12), |(_, _, w)| {
            if w == 0 {
                MASK_FOREGROUND
            } else {
                MASK_BACKGROUND
            }
        });
        let d = chamfer_distance(v.view(), is_foreground);
        for w in 1..12 {
            assert!(d[(1, 2, w)] >= d[(1, 2, w - 1)]);
            assert_eq!(d[(1, 2, w)], w as f32);
        }
    }
}
