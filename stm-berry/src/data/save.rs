//! 质控图像的持久化存储.

use image::ImageResult;
use ndarray::ArrayView3;
use std::path::Path;

/// 保存形状为 `(h, w, 3)` 的 RGB 图像.
pub fn save_rgb<P: AsRef<Path>>(rgb: ArrayView3<u8>, path: P) -> ImageResult<()> {
    let (height, width, _) = rgb.dim();
    let mut buf = image::RgbImage::new(width as u32, height as u32);
    for (w, h, pixel) in buf.enumerate_pixels_mut() {
        let (h, w) = (h as usize, w as usize);
        *pixel = image::Rgb([rgb[(h, w, 0)], rgb[(h, w, 1)], rgb[(h, w, 2)]]);
    }
    buf.save(path)
}

#[cfg(test)]
mod tests {
    use super::save_rgb;
    use ndarray::Array3;

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = Array3::<u8>::from_shape_fn((4, 6, 3), |(h, w, c)| (h * 10 + w + c) as u8);
        let path = dir.path().join("rgb.png");
        save_rgb(rgb.view(), &path).unwrap();
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (6, 4));
        assert_eq!(img.get_pixel(5, 3).0, [35, 36, 37]);
    }
}
