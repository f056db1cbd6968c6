//! 伪彩色查找表.

use once_cell::sync::Lazy;

/// viridis 多项式近似系数, 每行依次为 R, G, B.
const VIRIDIS_COEFF: [[f64; 3]; 7] = [
    [0.277_727_327_223_417_7, 0.005_407_344_544_966_578, 0.334_099_805_335_306_1],
    [0.105_093_043_108_577_4, 1.404_613_529_898_575, 1.384_590_162_594_685],
    [-0.330_861_828_725_556_3, 0.214_847_559_468_213, 0.095_095_163_028_236_59],
    [-4.634_230_498_983_486, -5.799_100_973_351_585, -19.332_440_956_279_87],
    [6.228_269_936_347_081, 14.179_933_366_805_09, 56.690_552_600_681_05],
    [4.776_384_997_670_288, -13.745_145_377_746_01, -65.353_032_633_372_34],
    [-5.435_455_855_934_631, 4.645_852_612_178_535, 26.312_435_249_583_2],
];

/// 256 级 viridis 查找表.
static VIRIDIS: Lazy<[[u8; 3]; 256]> = Lazy::new(|| {
    let mut table = [[0u8; 3]; 256];
    for (i, rgb) in table.iter_mut().enumerate() {
        let t = i as f64 / 255.0;
        for (c, out) in rgb.iter_mut().enumerate() {
            // Horner.
            let v = VIRIDIS_COEFF
                .iter()
                .rev()
                .fold(0.0, |acc, row| acc * t + row[c]);
            *out = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    table
});

/// viridis 颜色表. `t` 会被截断到 `[0, 1]`, 非有限值映射为 0 处的颜色.
#[inline]
pub fn viridis(t: f64) -> [u8; 3] {
    let t = if t.is_finite() {
        t.clamp(0.0, 1.0)
    } else {
        0.0
    };
    VIRIDIS[(t * 255.0).round() as usize]
}
