//! 距离测量: 距离变换, 剔除无效 spot, 按门限提取距离, 质控合成图.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::{Array3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::consts::gray::*;
use crate::consts::measure::*;
use crate::data::{lut, save, Calibration, DistanceVolume, Volume};
use crate::error::{Error, Result};
use crate::exclusion::ExclusionList;
use crate::morph::chamfer_distance;
use crate::refine::ControlImage;
use crate::spots::{Spot, SpotStore};

/// 测量参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeasureConfig {
    /// 距离门限, 以物理单位计. 大于该值的 spot 不进入结果表.
    pub threshold: f32,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// 以类欧氏 chamfer 距离计算每个体素到最近掩膜体素的物理距离.
///
/// 掩膜体素为 0, 掩膜为空时全部为 `+∞`. 结果以体素尺寸换算为物理单位,
/// 因此质控图像的标定必须是各向同性的, 否则返回 [`Error::Configuration`].
pub fn distance_transform(control: &ControlImage) -> Result<DistanceVolume> {
    let calib = control.calibration();
    calib.validate()?;
    if !calib.is_isotropic() {
        return Err(Error::config(format!(
            "distance transform needs an isotropic grid, got ({}, {}, {})",
            calib.sx(),
            calib.sy(),
            calib.sz()
        )));
    }
    let scale = calib.sx() as f32;
    let mut dist = chamfer_distance(control.mask().data(), is_foreground);
    dist.mapv_inplace(|d| d * scale);
    debug!("Distance map {:?} scaled by {scale} {}", dist.dim(), calib.unit());
    Ok(Volume::new(dist, calib.clone()))
}

/// 从 `store` 中剔除被操作员标记的 spot, 返回剔除个数. 没有匹配时什么也不做.
pub fn remove_invalid_spots(store: &mut SpotStore, exclusion: &ExclusionList) -> usize {
    let removed = store.remove_ids(exclusion.ids());
    if removed > 0 {
        info!("Removed {removed} invalid spot(s)");
    }
    removed
}

/// 结果表中的一行. 坐标为目标网格中的像素坐标.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceRow {
    /// spot 标识符.
    #[serde(rename = "ID")]
    pub id: String,

    /// 到掩膜的物理距离.
    #[serde(rename = "Distance")]
    pub distance: f32,

    /// 像素 X.
    #[serde(rename = "X")]
    pub x: i64,

    /// 像素 Y.
    #[serde(rename = "Y")]
    pub y: i64,

    /// 像素 Z.
    #[serde(rename = "Z")]
    pub z: i64,
}

impl DistanceRow {
    /// 在 `spot` 的像素处采得距离 `distance`.
    pub fn at(spot: &Spot, distance: f32) -> Self {
        let [x, y, z] = spot.pixel;
        Self {
            id: spot.id.clone(),
            distance,
            x,
            y,
            z,
        }
    }
}

/// 有序的距离结果表, 只追加.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultsTable {
    rows: Vec<DistanceRow>,
}

impl ResultsTable {
    /// 追加一行.
    #[inline]
    pub fn push(&mut self, row: DistanceRow) {
        self.rows.push(row);
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 按追加顺序迭代.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, DistanceRow> {
        self.rows.iter()
    }

    /// 以 `ID, Distance, X, Y, Z` 表头写出 csv.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        if self.rows.is_empty() {
            wtr.write_record(["ID", "Distance", "X", "Y", "Z"])?;
        }
        for row in self.rows.iter() {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// 写出到 csv 文件.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_to(fs::File::create(path)?)?;
        info!("Wrote {} distance(s) to {}", self.len(), path.display());
        Ok(())
    }
}

/// [`extract_distances`] 的结果.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    /// 门限内的距离.
    pub table: ResultsTable,

    /// 恰好落在掩膜上的 spot, 仅供诊断.
    pub on_mask: Vec<Spot>,

    /// 超出网格而被跳过的 spot 标识符.
    pub outside: Vec<String>,
}

impl Extraction {
    /// 落在掩膜上的 spot 组成的诊断表, 距离一律记为 0.
    pub fn on_mask_table(&self) -> ResultsTable {
        let mut table = ResultsTable::default();
        self.on_mask
            .iter()
            .for_each(|spot| table.push(DistanceRow::at(spot, 0.0)));
        table
    }
}

/// 按 `spots` 的顺序在各自的像素处采样距离.
///
/// 大于 `threshold` 的 spot 被丢弃; 小于 [`ON_MASK_EPSILON`] 的 spot 落在掩膜上,
/// 记入 [`Extraction::on_mask`] 而不进入结果表; 超出网格的 spot 被跳过并告警.
pub fn extract_distances(
    distance: &DistanceVolume,
    spots: &SpotStore,
    threshold: f32,
) -> Extraction {
    let shape = distance.shape();
    let mut ans = Extraction::default();
    for spot in spots.iter() {
        let Some(pos) = crate::coords::pixel_to_index(spot.pixel, shape) else {
            warn!("Spot {} at {:?} lies outside the grid {shape:?}", spot.id, spot.pixel);
            ans.outside.push(spot.id.clone());
            continue;
        };
        let d = distance[pos];
        if d > threshold {
            continue;
        }
        if d < ON_MASK_EPSILON {
            ans.on_mask.push(spot.clone());
            continue;
        }
        ans.table.push(DistanceRow::at(spot, d));
    }
    info!(
        "Extracted {} distance(s), {} on the mask, {} outside",
        ans.table.len(),
        ans.on_mask.len(),
        ans.outside.len()
    );
    ans
}

/// 质控合成图: 掩膜 (浮点) 与距离两个通道.
#[derive(Clone, Debug)]
pub struct QaComposite {
    calib: Calibration,
    mask: Array3<f32>,
    distance: Array3<f32>,
}

/// 以距离图更新质控图像. 两者形状不一致时返回 [`Error::DataInconsistency`].
pub fn update_control(control: &ControlImage, distance: &DistanceVolume) -> Result<QaComposite> {
    if control.shape() != distance.shape() {
        return Err(Error::inconsistent(format!(
            "control {:?} and distance {:?} differ in shape",
            control.shape(),
            distance.shape()
        )));
    }
    Ok(QaComposite {
        calib: control.calibration().clone(),
        mask: control.mask().data().mapv(|p| p as f32),
        distance: distance.data().to_owned(),
    })
}

impl QaComposite {
    /// 标定.
    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calib
    }

    /// 掩膜通道.
    #[inline]
    pub fn mask(&self) -> &Array3<f32> {
        &self.mask
    }

    /// 距离通道.
    #[inline]
    pub fn distance(&self) -> &Array3<f32> {
        &self.distance
    }

    /// 距离通道的显示上限: 最大的有限距离, 不存在或为零时取 1.
    fn display_max(&self) -> f32 {
        let max = self
            .distance
            .iter()
            .copied()
            .filter(|d| d.is_finite())
            .fold(0.0, f32::max);
        if max > 0.0 {
            max
        } else {
            1.0
        }
    }

    /// 第 `z` 层的 RGB 渲染 `(h, w, 3)`: 掩膜为白色, 其余位置以 viridis 着色距离.
    ///
    /// 当 `z` 越界时 panic.
    pub fn render_slice(&self, z: usize) -> Array3<u8> {
        let max = self.display_max() as f64;
        let mask = self.mask.index_axis(Axis(0), z);
        let dist = self.distance.index_axis(Axis(0), z);
        let (h, w) = mask.dim();
        let mut rgb = Array3::<u8>::zeros((h, w, 3));
        Zip::from(rgb.lanes_mut(Axis(2)))
            .and(&mask)
            .and(&dist)
            .for_each(|mut px, m, d| {
                let color = if *m > 0.0 {
                    [WHITE; 3]
                } else {
                    lut::viridis((*d as f64 / max).min(1.0))
                };
                px.iter_mut().zip(color).for_each(|(o, c)| *o = c);
            });
        rgb
    }

    /// 将每一层渲染为 `<dir>/z<NNNN>.png`, 返回写出的路径.
    pub fn save_png_slices<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut paths = Vec::with_capacity(self.mask.len_of(Axis(0)));
        for z in 0..self.mask.len_of(Axis(0)) {
            let path = dir.join(format!("z{z:04}.png"));
            save::save_rgb(self.render_slice(z).view(), &path)?;
            paths.push(path);
        }
        debug!("Saved {} QA slice(s) to {}", paths.len(), dir.display());
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Pixel3;
    use crate::error::ErrorKind;

    const VOXEL: f64 = 0.5;
    const RADIUS: f64 = 4.0;

    /// 10^3 的空心球壳: 到 `(5, 5, 5)` 的距离与 4 相差不超过 0.5 的体素.
    fn hollow_sphere() -> ControlImage {
        let mask = Array3::from_shape_fn((10, 10, 10), |(z, h, w)| {
            let r = [z, h, w]
                .iter()
                .map(|c| (*c as f64 - 5.0).powi(2))
                .sum::<f64>()
                .sqrt();
            if (r - RADIUS).abs() <= 0.5 {
                MASK_FOREGROUND
            } else {
                MASK_BACKGROUND
            }
        });
        let calib = Calibration::isotropic(VOXEL, "µm").with_anisotropy(1.0);
        let membrane = Volume::new(Array3::<u16>::zeros((10, 10, 10)), calib.clone());
        ControlImage::assemble(Volume::new(mask, calib), membrane).unwrap()
    }

    fn spots_at(pixels: &[Pixel3]) -> SpotStore {
        SpotStore::from_spots(
            pixels
                .iter()
                .enumerate()
                .map(|(i, p)| Spot {
                    id: format!("{:04}-{:04}", p[2], i + 1),
                    physical: [0.0; 3],
                    pixel: *p,
                })
                .collect(),
        )
    }

    #[test]
    fn test_distance_transform() {
        let control = hollow_sphere();
        let dist = distance_transform(&control).unwrap();
        assert_eq!(dist.calibration(), control.calibration());
        assert!(dist.data().iter().all(|d| *d >= 0.0));
        Zip::from(control.mask().data())
            .and(dist.data())
            .for_each(|m, d| assert_eq!(is_foreground(*m), *d == 0.0));

        // 球心的 chamfer 距离在真实半径附近.
        let center = dist[(5, 5, 5)] as f64;
        let expected = (RADIUS - 0.5) * VOXEL;
        assert!(center >= expected * 0.95 && center <= RADIUS * VOXEL * 1.05);
    }

    #[test]
    fn test_distance_transform_errors() {
        let mask = Volume::new(
            Array3::<u8>::zeros((2, 3, 3)),
            Calibration::new(1.0, 1.0, 2.0, "µm"),
        );
        let membrane = Volume::new(Array3::<u16>::zeros((2, 3, 3)), Calibration::uncalibrated());
        let control = ControlImage::assemble(mask, membrane).unwrap();
        let e = distance_transform(&control).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);

        let mask = Volume::new(
            Array3::<u8>::zeros((2, 3, 3)),
            Calibration::isotropic(0.2, "µm"),
        );
        let membrane = Volume::new(Array3::<u16>::zeros((2, 3, 3)), Calibration::uncalibrated());
        let control = ControlImage::assemble(mask, membrane).unwrap();
        let dist = distance_transform(&control).unwrap();
        assert!(dist.data().iter().all(|d| d.is_infinite()));
    }

    #[test]
    fn test_extract_hollow_sphere() {
        let control = hollow_sphere();
        let dist = distance_transform(&control).unwrap();
        // 第 5 个 spot 的切片号超出网格深度.
        let spots = spots_at(&[[5, 5, 5], [0, 0, 0], [5, 5, 1], [20, 0, 0], [5, 5, 99]]);
        let threshold = (1.1 * RADIUS * VOXEL) as f32;
        let ex = extract_distances(&dist, &spots, threshold);

        // 球心在门限内, 角落超出门限, 球壳上的 spot 只用于诊断.
        assert_eq!(ex.table.len(), 1);
        let row = ex.table.iter().next().unwrap();
        assert_eq!((row.x, row.y, row.z), (5, 5, 5));
        assert!(row.distance > 0.0 && row.distance <= threshold);
        assert_eq!(ex.on_mask.len(), 1);
        assert_eq!(ex.on_mask[0].pixel, [5, 5, 1]);
        assert_eq!(
            ex.outside,
            vec!["0000-0004".to_owned(), "0099-0005".to_owned()]
        );

        let diag = ex.on_mask_table();
        let row = diag.iter().next().unwrap();
        assert_eq!(diag.len(), 1);
        assert_eq!((row.id.as_str(), row.distance), ("0001-0003", 0.0));
        assert_eq!((row.x, row.y, row.z), (5, 5, 1));
    }

    #[test]
    fn test_threshold_acceptance() {
        let control = hollow_sphere();
        let dist = distance_transform(&control).unwrap();
        let spots = spots_at(&[[5, 5, 5], [0, 0, 0], [9, 9, 9]]);
        let all = extract_distances(&dist, &spots, DEFAULT_THRESHOLD);
        assert_eq!(all.table.len(), 3);
        for t in [0.5f32, 1.6, 2.0, 2.5] {
            let ex = extract_distances(&dist, &spots, t);
            assert!(ex.table.iter().all(|r| r.distance <= t));
            let expected = all.table.iter().filter(|r| r.distance <= t).count();
            assert_eq!(ex.table.len(), expected);
        }
    }

    #[test]
    fn test_remove_invalid_spots() {
        let mut store = spots_at(&[[1, 1, 1], [2, 2, 2], [3, 3, 3]]);
        let exclusion = ExclusionList::parse("0001-0001\n0003-0003\n9999-0001\n");
        assert_eq!(remove_invalid_spots(&mut store, &exclusion), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(
            remove_invalid_spots(&mut store, &ExclusionList::default()),
            0
        );
    }

    #[test]
    fn test_results_csv() {
        let mut table = ResultsTable::default();
        table.push(DistanceRow {
            id: "0003-0001".to_owned(),
            distance: 1.5,
            x: 4,
            y: 5,
            z: 3,
        });
        let mut buf = Vec::new();
        table.write_to(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "ID,Distance,X,Y,Z\n0003-0001,1.5,4,5,3\n"
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("distances.csv");
        table.write_csv(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_qa_composite() {
        let control = hollow_sphere();
        let dist = distance_transform(&control).unwrap();
        let qa = update_control(&control, &dist).unwrap();
        assert_eq!(qa.mask()[(5, 5, 1)], 255.0);

        let rgb = qa.render_slice(5);
        assert_eq!(rgb.dim(), (10, 10, 3));
        assert_eq!(rgb[(5, 1, 0)], WHITE);
        assert_ne!([rgb[(5, 5, 0)], rgb[(5, 5, 1)], rgb[(5, 5, 2)]], [WHITE; 3]);

        let dir = tempfile::tempdir().unwrap();
        let paths = qa.save_png_slices(dir.path()).unwrap();
        assert_eq!(paths.len(), 10);
        assert!(paths.iter().all(|p| p.is_file()));

        let small = Volume::new(Array3::<f32>::zeros((1, 1, 1)), Calibration::uncalibrated());
        assert!(update_control(&control, &small).is_err());
    }
}
