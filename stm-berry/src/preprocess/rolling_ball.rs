//! 滚球背景估计.
//!
//! 背景为图像以半球结构元素做的灰度开运算. 为了控制开销, 开运算在按块取最小值
//! 缩小后的图像上进行, 再以双线性插值放大回原尺寸.

use ndarray::{Array2, ArrayView2};

/// 根据半径选择缩小倍数.
#[inline]
pub(crate) fn shrink_factor(radius: f64) -> usize {
    match radius {
        r if r <= 10.0 => 1,
        r if r <= 30.0 => 2,
        r if r <= 100.0 => 4,
        _ => 8,
    }
}

/// 半径为 `radius` 的半球, 以 `((dh, dw), 高度)` 列表表示.
struct Ball {
    cells: Vec<((isize, isize), f64)>,
}

impl Ball {
    fn new(radius: f64) -> Self {
        let r = radius.max(1.0);
        let reach = r.floor() as isize;
        let mut cells = Vec::with_capacity(((2 * reach + 1) * (2 * reach + 1)) as usize);
        for dh in -reach..=reach {
            for dw in -reach..=reach {
                let d2 = (dh * dh + dw * dw) as f64;
                if d2 <= r * r {
                    cells.push(((dh, dw), (r * r - d2).sqrt()));
                }
            }
        }
        Self { cells }
    }
}

/// 按 `s * s` 块取最小值缩小图像.
fn shrink(img: ArrayView2<f64>, s: usize) -> Array2<f64> {
    let (h, w) = img.dim();
    let (sh, sw) = ((h + s - 1) / s, (w + s - 1) / s);
    Array2::from_shape_fn((sh, sw), |(i, j)| {
        let block = img.slice(ndarray::s![
            i * s..((i + 1) * s).min(h),
            j * s..((j + 1) * s).min(w)
        ]);
        block.iter().copied().fold(f64::INFINITY, f64::min)
    })
}

#[inline]
fn shifted(
    (h, w): (usize, usize),
    (dh, dw): (isize, isize),
    (lh, lw): (usize, usize),
) -> Option<(usize, usize)> {
    let h = h.checked_add_signed(dh)?;
    let w = w.checked_add_signed(dw)?;
    (h < lh && w < lw).then_some((h, w))
}

/// 以半球结构元素做灰度开运算 (先腐蚀后膨胀). 图像外部不参与计算.
fn open_with_ball(img: ArrayView2<f64>, ball: &Ball) -> Array2<f64> {
    let shape = img.dim();
    let mut eroded = Array2::<f64>::zeros(shape);
    for (pos, out) in eroded.indexed_iter_mut() {
        *out = ball
            .cells
            .iter()
            .filter_map(|(off, z)| shifted(pos, *off, shape).map(|n| img[n] - z))
            .fold(f64::INFINITY, f64::min);
    }
    let mut opened = Array2::<f64>::zeros(shape);
    for (pos, out) in opened.indexed_iter_mut() {
        *out = ball
            .cells
            .iter()
            .filter_map(|((dh, dw), z)| shifted(pos, (-dh, -dw), shape).map(|n| eroded[n] + z))
            .fold(f64::NEG_INFINITY, f64::max);
    }
    opened
}

/// 将缩小的图像以双线性插值放大到 `(h, w)`.
fn enlarge(small: ArrayView2<f64>, s: usize, (h, w): (usize, usize)) -> Array2<f64> {
    if s == 1 {
        return small.to_owned();
    }
    let (sh, sw) = small.dim();
    let coord = |i: usize, len: usize| -> (usize, usize, f64) {
        // 缩小像素 k 的中心位于原图 k * s + (s - 1) / 2.
        let x = ((i as f64 - (s as f64 - 1.0) / 2.0) / s as f64).clamp(0.0, (len - 1) as f64);
        let lo = x.floor() as usize;
        let hi = (lo + 1).min(len - 1);
        (lo, hi, x - lo as f64)
    };
    Array2::from_shape_fn((h, w), |(i, j)| {
        let (h0, h1, fh) = coord(i, sh);
        let (w0, w1, fw) = coord(j, sw);
        let top = small[(h0, w0)] * (1.0 - fw) + small[(h0, w1)] * fw;
        let bottom = small[(h1, w0)] * (1.0 - fw) + small[(h1, w1)] * fw;
        top * (1.0 - fh) + bottom * fh
    })
}

/// 估计单张切片的滚球背景. `radius` 以像素计.
pub(crate) fn background(img: ArrayView2<f64>, radius: f64) -> Array2<f64> {
    let s = shrink_factor(radius);
    let small = shrink(img, s);
    let ball = Ball::new(radius / s as f64);
    let opened = open_with_ball(small.view(), &ball);
    enlarge(opened.view(), s, img.dim())
}
