use crate::consts::gray::*;
use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis};

/// 沿 `axis` 对每一条 lane 执行 1D 窗口滤波. 窗口为 `[i - r, i + r]` 与边界之交.
fn filter_lanes(
    src: ArrayView3<u8>,
    axis: Axis,
    radius: usize,
    pick: fn(ArrayView1<u8>) -> u8,
) -> Array3<u8> {
    let mut dst = Array3::<u8>::zeros(src.raw_dim());
    for (lane, mut out) in src.lanes(axis).into_iter().zip(dst.lanes_mut(axis)) {
        window_1d(lane, &mut out, radius, pick);
    }
    dst
}

#[inline]
fn window_1d(
    lane: ArrayView1<u8>,
    out: &mut ArrayViewMut1<u8>,
    radius: usize,
    pick: fn(ArrayView1<u8>) -> u8,
) {
    let n = lane.len();
    for i in 0..n {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius + 1).min(n);
        out[i] = pick(lane.slice(ndarray::s![lo..hi]));
    }
}

fn any_foreground(window: ArrayView1<u8>) -> u8 {
    if window.iter().copied().any(is_foreground) {
        MASK_FOREGROUND
    } else {
        MASK_BACKGROUND
    }
}

fn all_foreground(window: ArrayView1<u8>) -> u8 {
    if window.iter().copied().all(is_foreground) {
        MASK_FOREGROUND
    } else {
        MASK_BACKGROUND
    }
}

/// 以边长 `2 * radius + 1` 的立方体结构元素做二值膨胀. 立方体可分解为三次 1D 滤波.
pub fn binary_dilation(mask: ArrayView3<u8>, radius: usize) -> Array3<u8> {
    let a = filter_lanes(mask, Axis(2), radius, any_foreground);
    let b = filter_lanes(a.view(), Axis(1), radius, any_foreground);
    filter_lanes(b.view(), Axis(0), radius, any_foreground)
}

/// 以边长 `2 * radius + 1` 的立方体结构元素做二值腐蚀. 体数据外部不参与计算.
pub fn binary_erosion(mask: ArrayView3<u8>, radius: usize) -> Array3<u8> {
    let a = filter_lanes(mask, Axis(2), radius, all_foreground);
    let b = filter_lanes(a.view(), Axis(1), radius, all_foreground);
    filter_lanes(b.view(), Axis(0), radius, all_foreground)
}

/// 立方体结构元素的二值闭运算 (先膨胀后腐蚀).
///
/// 由于腐蚀忽略体数据外部, 结果总是包含输入的全部前景.
pub fn binary_closing(mask: ArrayView3<u8>, radius: usize) -> Array3<u8> {
    let dilated = binary_dilation(mask, radius);
    binary_erosion(dilated.view(), radius)
}
