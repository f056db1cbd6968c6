//! spot 的读取与存储.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::consts::files::SPOT_HEADER_LINES;
use crate::coords::{Pixel3, Point3, TargetGeometry};
use crate::error::{Error, Result};
use crate::Idx3d;

/// 单个 spot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// 标识符 `"<切片>-<序号>"`, 两段均补零到 4 位.
    pub id: String,

    /// 修正 (轴翻转与填充补偿) 后的物理坐标 `[x, y, z]`.
    pub physical: Point3,

    /// 目标网格中的像素坐标 `[x, y, z]`.
    pub pixel: Pixel3,
}

/// 由像素 z 坐标和排序后的序号 (从 1 开始) 生成标识符.
#[inline]
pub fn spot_id(pixel_z: i64, sequence: usize) -> String {
    format!("{pixel_z:04}-{sequence:04}")
}

/// 一张图像的全部 spot, 按修正后的 z 升序排列.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotStore {
    spots: Vec<Spot>,
}

impl SpotStore {
    /// 直接由 spot 构建, 顺序不变.
    pub fn from_spots(spots: Vec<Spot>) -> Self {
        Self { spots }
    }

    /// 由 spot 文件中的原始物理坐标构建: 映射到目标网格, 按 z 升序稳定排序, 再编号.
    pub fn from_points(points: &[Point3], geometry: &TargetGeometry) -> Result<Self> {
        let mut mapped = points
            .iter()
            .map(|p| geometry.spot_to_grid(*p))
            .collect::<Result<Vec<_>>>()?;
        mapped.sort_by(|a, b| a.0[2].total_cmp(&b.0[2]));
        let spots = mapped
            .into_iter()
            .enumerate()
            .map(|(i, (physical, pixel))| Spot {
                id: spot_id(pixel[2], i + 1),
                physical,
                pixel,
            })
            .collect();
        Ok(Self { spots })
    }

    /// 读取 spot 文件并映射到 `geometry` 描述的网格.
    ///
    /// 文件开头 4 行为元信息, 跳过; 其余每行以逗号分隔, 前三个字段为物理 X, Y, Z,
    /// 多余字段忽略, 空行忽略. 文件不存在返回 [`Error::ResourceNotFound`],
    /// 字段缺失或无法解析返回 [`Error::DataInconsistency`].
    pub fn load<P: AsRef<Path>>(path: P, geometry: &TargetGeometry) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ResourceNotFound(path.to_owned()));
        }
        let text = fs::read_to_string(path)?;
        let points = parse_points(&text)?;
        info!("Found {} spots in {}", points.len(), path.display());
        let store = Self::from_points(&points, geometry)?;
        if let Some(first) = store.spots.first() {
            debug!("Starting Z: {}", first.physical[2]);
        }
        Ok(store)
    }

    /// spot 个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.spots.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// 按顺序迭代全部 spot.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Spot> {
        self.spots.iter()
    }

    /// 按标识符查找.
    pub fn get(&self, id: &str) -> Option<&Spot> {
        self.spots.iter().find(|s| s.id == id)
    }

    /// 移除标识符属于 `ids` 的全部 spot, 返回移除个数.
    pub fn remove_ids(&mut self, ids: &BTreeSet<String>) -> usize {
        let before = self.spots.len();
        self.spots.retain(|s| !ids.contains(&s.id));
        before - self.spots.len()
    }

    /// 落在形状 `shape` 内的 spot 的体数据索引, 作为种子.
    pub fn seeds(&self, shape: Idx3d) -> Vec<Idx3d> {
        self.spots
            .iter()
            .filter_map(|s| crate::coords::pixel_to_index(s.pixel, shape))
            .collect()
    }
}

/// 解析 spot 文件内容为原始物理坐标. 错误信息中的行号为文件行号 (从 1 开始).
fn parse_points(text: &str) -> Result<Vec<Point3>> {
    // 每个非空行恰好对应一条记录, 因此第 i 条记录来自 `line_numbers[i]` 行.
    let (line_numbers, lines): (Vec<usize>, Vec<&str>) = text
        .lines()
        .enumerate()
        .skip(SPOT_HEADER_LINES)
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(n, l)| (n + 1, l))
        .unzip();
    let body = lines.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut points = Vec::with_capacity(line_numbers.len());
    for (record, line) in reader.records().zip(line_numbers) {
        let record = record?;
        let mut coord = [0.0; 3];
        for (i, c) in coord.iter_mut().enumerate() {
            let field = record.get(i).ok_or_else(|| {
                Error::inconsistent(format!("spot line {line}: missing field {}", i + 1))
            })?;
            *c = field.parse().map_err(|_| {
                Error::inconsistent(format!("spot line {line}: cannot parse `{field}`"))
            })?;
        }
        points.push(coord);
    }
    Ok(points)
}

/// 查找图像对应的 spot 文件.
///
/// 若图像所在目录有名称以 `spots` 开头 (不区分大小写) 的子目录, 则在第一个这样的子目录中查找,
/// 否则在图像所在目录中查找. 文件名须以图像去掉扩展名后的名称开头, 并以 `.csv` 结尾.
pub fn find_spots_file<P: AsRef<Path>>(image: P) -> Option<PathBuf> {
    let image = image.as_ref();
    let dir = image.parent()?;
    let stem = image.file_name()?.to_str()?;
    let stem = stem.strip_suffix(".gz").unwrap_or(stem);
    let stem = stem.rsplit_once('.').map_or(stem, |(s, _)| s);

    let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.to_lowercase().starts_with("spots"))
        })
        .collect();
    subdirs.sort();
    let spots_dir = subdirs.into_iter().next().unwrap_or_else(|| dir.to_owned());

    let mut candidates: Vec<PathBuf> = fs::read_dir(&spots_dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                n.starts_with(stem) && n.to_lowercase().ends_with(".csv")
            })
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Calibration;
    use crate::error::ErrorKind;

    fn geometry() -> TargetGeometry {
        TargetGeometry::predict(&Calibration::new(0.5, 0.5, 1.0, "µm"), (4, 10, 10)).unwrap()
    }

    const FILE: &str = "Imaris export\n==========\n\nPosition X,Position Y,Position Z,Unit\n\
                        1.2, 1.0, 1.0, um, 0\n\n0.1,4.9,3.9\n2.0,2.0,2.0,extra\n";

    #[test]
    fn test_parse_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.csv");
        fs::write(&path, FILE).unwrap();
        let store = SpotStore::load(&path, &geometry()).unwrap();
        assert_eq!(store.len(), 3);

        // 修正后 z 为 6 - z + 0.25, 升序即原始 z 降序.
        let zs: Vec<f64> = store.iter().map(|s| s.physical[2]).collect();
        assert_eq!(zs, vec![2.35, 4.25, 5.25]);
        let ids: Vec<&str> = store.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["0004-0001", "0008-0002", "0010-0003"]);
        assert_eq!(store.get("0010-0003").unwrap().pixel, [2, 8, 10]);
    }

    #[test]
    fn test_bad_number() {
        let text = "a\nb\nc\nd\n1.0,oops,2.0\n";
        let e = parse_points(text).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DataInconsistency);
        let e = parse_points("a\nb\nc\nd\n1.0,2.0\n").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DataInconsistency);
    }

    #[test]
    fn test_error_reports_file_line() {
        // 第 6 行为空行, 第 8 行出错.
        let text = "a\nb\nc\nd\n1,2,3\n\n4,5,6\n7,x,9\n";
        let e = parse_points(text).unwrap_err();
        assert!(e.to_string().contains("spot line 8:"), "{e}");
        let e = parse_points("a\n\nc\nd\n\n  \n1\n").unwrap_err();
        assert!(e.to_string().contains("spot line 7:"), "{e}");
        assert_eq!(parse_points(FILE).unwrap().len(), 3);
    }

    #[test]
    fn test_missing_file() {
        let e = SpotStore::load("/no/such/spots.csv", &geometry()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::ResourceNotFound);
    }

    #[test]
    fn test_remove_ids() {
        let mut store = SpotStore::from_points(
            &[[0.0, 0.0, 0.5], [0.0, 0.0, 1.5], [0.0, 0.0, 2.5]],
            &geometry(),
        )
        .unwrap();
        let first = store.iter().next().unwrap().id.clone();
        let ids = BTreeSet::from([first.clone(), "9999-9999".to_owned()]);
        assert_eq!(store.remove_ids(&ids), 1);
        assert_eq!(store.len(), 2);
        assert!(store.get(&first).is_none());
        assert_eq!(store.remove_ids(&BTreeSet::new()), 0);
    }

    #[test]
    fn test_find_spots_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("cell-01.nii.gz");
        fs::write(&image, b"").unwrap();
        fs::write(dir.path().join("cell-01_spots.csv"), b"").unwrap();
        assert_eq!(
            find_spots_file(&image).unwrap(),
            dir.path().join("cell-01_spots.csv")
        );

        fs::create_dir(dir.path().join("Spots")).unwrap();
        fs::write(dir.path().join("Spots").join("cell-01.CSV"), b"").unwrap();
        assert_eq!(
            find_spots_file(&image).unwrap(),
            dir.path().join("Spots").join("cell-01.CSV")
        );
    }
}
