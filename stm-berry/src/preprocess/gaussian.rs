use image::{ImageBuffer, Luma};
use ndarray::{Array3, Axis};

/// 截断到 `ceil(3σ)` 的归一化一维高斯核.
fn kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as usize;
    let mut k: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= sum);
    k
}

#[inline]
fn skipped(sigma: f64) -> bool {
    sigma.is_nan() || sigma <= 0.0
}

/// 沿 `axis` 做一维高斯卷积, 边界取最近的边缘值. `sigma <= 0` 时原样返回.
pub(crate) fn blur_axis(src: Array3<f64>, axis: Axis, sigma: f64) -> Array3<f64> {
    if skipped(sigma) {
        return src;
    }
    let k = kernel(sigma);
    let radius = (k.len() / 2) as isize;
    let mut dst = Array3::<f64>::zeros(src.raw_dim());
    for (lane, mut out) in src.lanes(axis).into_iter().zip(dst.lanes_mut(axis)) {
        let n = lane.len() as isize;
        for i in 0..n {
            out[i as usize] = k
                .iter()
                .enumerate()
                .map(|(j, w)| {
                    let at = (i + j as isize - radius).clamp(0, n - 1);
                    w * lane[at as usize]
                })
                .sum();
        }
    }
    dst
}

/// 逐切片的二维高斯平滑, 由 `imageproc` 完成. `sigma <= 0` 时原样返回.
pub(crate) fn blur_xy(mut src: Array3<f64>, sigma: f64) -> Array3<f64> {
    if skipped(sigma) {
        return src;
    }
    let (_, h, w) = src.dim();
    for mut slice in src.axis_iter_mut(Axis(0)) {
        let img = ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
            Luma([slice[(y as usize, x as usize)] as f32])
        });
        let blurred = imageproc::filter::gaussian_blur_f32(&img, sigma as f32);
        for ((y, x), v) in slice.indexed_iter_mut() {
            *v = f64::from(blurred.get_pixel(x as u32, y as u32)[0]);
        }
    }
    src
}

/// 可分离三维高斯平滑: 水平面整体平滑, 再沿 z 做一维卷积.
pub(crate) fn blur_3d(src: Array3<f64>, sigma_xy: f64, sigma_z: f64) -> Array3<f64> {
    blur_axis(blur_xy(src, sigma_xy), Axis(0), sigma_z)
}
