//! 单张图像的处理会话.
//!
//! 会话显式地持有当前图像及其阶段, 各阶段必须按
//! `Registered -> Preprocessed -> Segmented -> Refined -> Measured` 的顺序调用.
//! 每个阶段结束时释放上一阶段的中间结果.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::classifier::{classify_with_fallback, labels_to_mask, PixelClassifier};
use crate::consts::preprocess::SATURATION_PERCENT;
use crate::consts::refine::FOREGROUND_LABELS;
use crate::coords::TargetGeometry;
use crate::data::{Mask, RawVolume, ScanVolume};
use crate::error::{Error, Result};
use crate::measure::{
    distance_transform, extract_distances, remove_invalid_spots, update_control, Extraction,
    MeasureConfig, QaComposite,
};
use crate::preprocess::{Preprocessed, Preprocessor, RegionProvider};
use crate::refine::{ControlImage, Refiner};
use crate::spots::{find_spots_file, SpotStore};
use crate::workspace::{Options, Workspace};

/// 会话阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// 已登记源图像.
    Registered,

    /// 已预处理.
    Preprocessed,

    /// 已分类并转换为掩膜.
    Segmented,

    /// 已精化, 质控图像可用.
    Refined,

    /// 已测量.
    Measured,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 一次测量的输出.
#[derive(Clone, Debug)]
pub struct Measurement {
    /// 距离与诊断信息.
    pub extraction: Extraction,

    /// 质控合成图.
    pub qa: QaComposite,

    /// 被剔除的无效 spot 个数.
    pub excluded: usize,
}

/// 精化后可跨进程恢复的状态.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    source: PathBuf,
    options: Options,
    geometry: TargetGeometry,
    control: ControlImage,
    spots: Option<SpotStore>,
}

/// 单张图像的处理会话.
pub struct Session {
    source: PathBuf,
    workspace: Workspace,
    options: Options,
    geometry: TargetGeometry,
    stage: Stage,
    spots: Option<SpotStore>,

    raw: Option<RawVolume>,
    preprocessed: Option<Preprocessed>,
    segmented: Option<(Mask, ScanVolume)>,
    control: Option<ControlImage>,
}

impl Session {
    /// 打开 `source` 并登记为当前目标.
    pub fn register<P: AsRef<Path>>(source: P, workspace: Workspace) -> Result<Self> {
        let source = source.as_ref();
        let raw = RawVolume::open(source)?;
        Self::register_volume(source, raw, workspace)
    }

    /// 以已载入的 `raw` 登记 `source`.
    ///
    /// 覆盖目标记录并清空该图像的排除列表. 选项中的通道超出通道数时返回
    /// [`Error::DataInconsistency`].
    pub fn register_volume(source: &Path, raw: RawVolume, workspace: Workspace) -> Result<Self> {
        let options = workspace.load_options()?;
        let needed = options.spot_channel.max(options.membrane_channel);
        if raw.channels() < needed {
            return Err(Error::inconsistent(format!(
                "{} has {} channel(s), channel {needed} is required",
                source.display(),
                raw.channels()
            )));
        }
        let geometry = TargetGeometry::predict(raw.calibration(), raw.shape())?;
        let source = workspace.write_target(source)?;
        let exclusion = workspace.reset_exclusion(&source)?;
        info!("Registered {} (exclusions in {})", source.display(), exclusion.display());
        debug!("Target grid {:?}", geometry.shape());

        Ok(Self {
            source,
            workspace,
            options,
            geometry,
            stage: Stage::Registered,
            spots: None,
            raw: Some(raw),
            preprocessed: None,
            segmented: None,
            control: None,
        })
    }

    /// 当前阶段.
    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 源图像路径.
    #[inline]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// 生效的选项.
    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// 目标网格.
    #[inline]
    pub fn geometry(&self) -> &TargetGeometry {
        &self.geometry
    }

    /// 已载入的 spot.
    #[inline]
    pub fn spots(&self) -> Option<&SpotStore> {
        self.spots.as_ref()
    }

    /// 精化后的质控图像.
    #[inline]
    pub fn control(&self) -> Option<&ControlImage> {
        self.control.as_ref()
    }

    fn expect_stage(&self, allowed: &[Stage], op: &str) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(Error::config(format!(
                "cannot {op} at stage {}",
                self.stage
            )))
        }
    }

    fn missing(what: &str) -> Error {
        Error::config(format!("{what} has already been released"))
    }

    /// 预处理两个通道.
    pub fn preprocess(
        &mut self,
        preprocessor: &Preprocessor,
        provider: &mut dyn RegionProvider,
    ) -> Result<()> {
        self.expect_stage(&[Stage::Registered], "preprocess")?;
        let raw = self
            .raw
            .as_ref()
            .ok_or_else(|| Self::missing("raw volume"))?;
        let pre = preprocessor.run(
            raw,
            self.options.spot_channel,
            self.options.membrane_channel,
            provider,
        )?;
        self.raw = None;
        self.preprocessed = Some(pre);
        self.stage = Stage::Preprocessed;
        Ok(())
    }

    /// 以两个通道的乘积为输入执行像素分类, 并转换为掩膜.
    pub fn segment<C: PixelClassifier + ?Sized>(
        &mut self,
        classifier: &mut C,
        model: &Path,
    ) -> Result<()> {
        self.expect_stage(&[Stage::Preprocessed], "segment")?;
        let pre = self
            .preprocessed
            .as_ref()
            .ok_or_else(|| Self::missing("preprocessed volume"))?;
        let input = pre.combined(SATURATION_PERCENT);
        let labels = classify_with_fallback(classifier, &input, model)?;
        let mask = labels_to_mask(&labels, &FOREGROUND_LABELS);
        info!("Segmented {} foreground voxel(s)", mask.count_foreground());

        let Some(pre) = self.preprocessed.take() else {
            return Err(Self::missing("preprocessed volume"));
        };
        self.segmented = Some((mask, pre.membrane));
        self.stage = Stage::Segmented;
        Ok(())
    }

    /// 载入 spot 文件并映射到目标网格. `path` 为 `None` 时在源图像旁查找.
    ///
    /// 测量之前的任意阶段都可以调用. 返回 spot 个数.
    pub fn attach_spots(&mut self, path: Option<&Path>) -> Result<usize> {
        self.expect_stage(
            &[Stage::Registered, Stage::Preprocessed, Stage::Segmented, Stage::Refined],
            "attach spots",
        )?;
        let path = match path {
            Some(p) => p.to_owned(),
            None => find_spots_file(&self.source)
                .ok_or_else(|| Error::ResourceNotFound(self.source.with_extension("csv")))?,
        };
        let store = SpotStore::load(&path, &self.geometry)?;
        let n = store.len();
        self.spots = Some(store);
        Ok(n)
    }

    /// 直接附加已映射到目标网格的 spot.
    pub fn attach_spot_store(&mut self, store: SpotStore) -> Result<usize> {
        self.expect_stage(
            &[Stage::Registered, Stage::Preprocessed, Stage::Segmented, Stage::Refined],
            "attach spots",
        )?;
        let n = store.len();
        self.spots = Some(store);
        Ok(n)
    }

    /// 精化分割结果, 组装质控图像.
    ///
    /// 质控图像的形状与预测的目标网格不一致时返回 [`Error::DataInconsistency`].
    pub fn refine(&mut self, refiner: &Refiner) -> Result<()> {
        self.expect_stage(&[Stage::Segmented], "refine")?;
        let (mask, membrane) = self
            .segmented
            .as_ref()
            .ok_or_else(|| Self::missing("segmentation"))?;
        let control = refiner.run(mask, membrane, self.spots.as_ref())?;
        let geometry = TargetGeometry::of_volume(control.mask())?;
        if geometry.shape() != self.geometry.shape() {
            return Err(Error::inconsistent(format!(
                "refined grid {:?} differs from the predicted {:?}",
                geometry.shape(),
                self.geometry.shape()
            )));
        }
        self.geometry = geometry;
        self.segmented = None;
        self.control = Some(control);
        self.stage = Stage::Refined;
        Ok(())
    }

    /// 剔除被标记的 spot 并测量距离. 可以在测量后重复调用, 以便应用新的标记.
    ///
    /// 未载入 spot 时返回 [`Error::Configuration`].
    pub fn measure(&mut self, config: &MeasureConfig) -> Result<Measurement> {
        self.expect_stage(&[Stage::Refined, Stage::Measured], "measure")?;
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| Self::missing("control image"))?;
        let spots = self
            .spots
            .as_mut()
            .ok_or_else(|| Error::config("no spots attached"))?;

        let exclusion = self.workspace.load_exclusion(&self.source)?;
        let excluded = remove_invalid_spots(spots, &exclusion);
        let distance = distance_transform(control)?;
        let extraction = extract_distances(&distance, spots, config.threshold);
        let qa = update_control(control, &distance)?;
        self.stage = Stage::Measured;
        Ok(Measurement {
            extraction,
            qa,
            excluded,
        })
    }

    /// 将精化后的状态写出为 zlib 压缩的 bincode 快照.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.expect_stage(&[Stage::Refined, Stage::Measured], "save a snapshot")?;
        let path = path.as_ref();
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| Self::missing("control image"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = SnapshotRef {
            source: &self.source,
            options: &self.options,
            geometry: &self.geometry,
            control,
            spots: self.spots.as_ref(),
        };
        let mut e = ZlibEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        bincode::serialize_into(&mut e, &snapshot)?;
        e.finish()?.flush()?;
        info!("Saved snapshot {}", path.display());
        Ok(())
    }

    /// 从快照恢复会话, 阶段为 [`Stage::Refined`]. 文件不存在时返回 [`Error::ResourceNotFound`].
    pub fn load_snapshot<P: AsRef<Path>>(path: P, workspace: Workspace) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ResourceNotFound(path.to_owned()));
        }
        let d = ZlibDecoder::new(BufReader::new(File::open(path)?));
        let Snapshot {
            source,
            options,
            geometry,
            control,
            spots,
        } = bincode::deserialize_from(d)?;
        info!("Resumed {} from {}", source.display(), path.display());
        Ok(Self {
            source,
            workspace,
            options,
            geometry,
            stage: Stage::Refined,
            spots,
            raw: None,
            preprocessed: None,
            segmented: None,
            control: Some(control),
        })
    }
}

/// [`Snapshot`] 的借用版本, 序列化格式与之相同.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    source: &'a Path,
    options: &'a Options,
    geometry: &'a TargetGeometry,
    control: &'a ControlImage,
    spots: Option<&'a SpotStore>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Threshold, ThresholdClassifier};
    use crate::data::{Calibration, RawSamples};
    use crate::error::ErrorKind;
    use crate::preprocess::{FixedRegion, PreprocessConfig, Region};
    use ndarray::Array4;

    const SPOTS: &str = "Imaris\n\n\nX,Y,Z\n3.0,4.0,2.0\n5.0,5.0,5.0\n100.0,1.0,1.0\n";

    fn raw() -> RawVolume {
        let data = Array4::from_shape_fn((2, 3, 16, 16), |(c, z, h, w)| {
            ((c + 1) * 1000 + z * 10 + (h * w) % 50) as u16
        });
        RawVolume::new(
            RawSamples::Gray16(data),
            Calibration::new(1.0, 1.0, 2.0, "µm"),
        )
        .unwrap()
    }

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(PreprocessConfig {
            rolling_ball_radius: 5.0,
            sigma_xy: 1.0,
            ..Default::default()
        })
    }

    /// 登记并推进到精化阶段. 默认空洞规则会填满这些小切片, 因此掩膜为全前景.
    fn refined(dir: &Path) -> Session {
        let ws = Workspace::new(dir.join("ws"));
        ws.save_options(&Options {
            spot_channel: 1,
            membrane_channel: 2,
            ..Default::default()
        })
        .unwrap();
        let source = dir.join("cell.nii.gz");
        fs::write(dir.join("cell_spots.csv"), SPOTS).unwrap();

        let mut s = Session::register_volume(&source, raw(), ws).unwrap();
        assert_eq!(s.geometry().shape(), (10, 16, 16));
        assert_eq!(s.attach_spots(None).unwrap(), 3);

        let mut provider = FixedRegion(Region::new(0, 0, 4, 4));
        s.preprocess(&preprocessor(), &mut provider).unwrap();
        s.segment(
            &mut ThresholdClassifier::new(Threshold::Otsu),
            Path::new("v001.classifier"),
        )
        .unwrap();
        s.refine(&Refiner::default()).unwrap();
        assert_eq!(s.stage(), Stage::Refined);
        s
    }

    #[test]
    fn test_full_session() {
        let _ = simple_logger::init_with_level(log::Level::Debug);
        let dir = tempfile::tempdir().unwrap();
        let mut s = refined(dir.path());
        let control = s.control().unwrap();
        assert_eq!(control.shape(), (10, 16, 16));
        assert_eq!(control.mask().count_foreground(), 10 * 16 * 16);

        let ws = Workspace::new(dir.path().join("ws"));
        assert_eq!(ws.read_target().unwrap(), dir.path().join("cell.nii.gz"));
        ws.flag_spot(s.source(), "0005-0001").unwrap();

        let m = s.measure(&MeasureConfig::default()).unwrap();
        assert_eq!(m.excluded, 1);
        assert!(m.extraction.table.is_empty());
        assert_eq!(m.extraction.on_mask.len(), 1);
        assert_eq!(m.extraction.on_mask[0].id, "0008-0002");
        assert_eq!(m.extraction.outside, vec!["0009-0003".to_owned()]);
        assert_eq!(s.stage(), Stage::Measured);

        // 重复测量不再剔除.
        assert_eq!(s.measure(&MeasureConfig::default()).unwrap().excluded, 0);
    }

    #[test]
    fn test_stage_order() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.save_options(&Options {
            spot_channel: 1,
            membrane_channel: 2,
            ..Default::default()
        })
        .unwrap();
        let mut s = Session::register_volume(&dir.path().join("x.nii"), raw(), ws).unwrap();
        let e = s.refine(&Refiner::default()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
        let e = s.measure(&MeasureConfig::default()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
        let e = s
            .segment(
                &mut ThresholdClassifier::new(Threshold::Fixed(1)),
                Path::new("m"),
            )
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert_eq!(s.stage(), Stage::Registered);
        assert_eq!(s.attach_spot_store(SpotStore::default()).unwrap(), 0);
        assert_eq!(s.spots(), Some(&SpotStore::default()));
    }

    #[test]
    fn test_register_checks_channels() {
        let dir = tempfile::tempdir().unwrap();
        // 默认选项需要第 3 个通道.
        let ws = Workspace::new(dir.path());
        let e = Session::register_volume(&dir.path().join("x.nii"), raw(), ws)
            .err()
            .unwrap();
        assert_eq!(e.kind(), ErrorKind::DataInconsistency);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = refined(dir.path());
        let path = dir.path().join("snap").join("cell.stm");
        s.save_snapshot(&path).unwrap();

        let mut back =
            Session::load_snapshot(&path, Workspace::new(dir.path().join("ws"))).unwrap();
        assert_eq!(back.stage(), Stage::Refined);
        assert_eq!(back.source(), s.source());
        assert_eq!(back.geometry(), s.geometry());
        assert_eq!(back.spots(), s.spots());
        assert_eq!(
            back.control().unwrap().mask().data(),
            s.control().unwrap().mask().data()
        );
        assert_eq!(
            back.measure(&MeasureConfig::default())
                .unwrap()
                .extraction
                .on_mask
                .len(),
            2
        );

        let e = Session::load_snapshot(dir.path().join("none"), Workspace::new(dir.path()))
            .err()
            .unwrap();
        assert_eq!(e.kind(), ErrorKind::ResourceNotFound);
    }
}
