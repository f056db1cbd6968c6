//! 程序运行函数.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use stm_berry::prelude::*;
use stm_berry::preprocess::ChannelRole;
use stm_berry::refine::{HoleRule, WatershedConfig};
use stm_berry::session::Measurement;

use crate::result::Report;
use crate::{FlagArgs, MeasureArgs, OptionsArgs, OutputArgs, RunArgs};

/// 未指定背景区域时, 取平面左上角边长为短边 `1 / CORNER_DIVISOR` 的正方形.
const CORNER_DIVISOR: usize = 8;

/// 总是返回左上角正方形的提供者.
struct CornerRegion;

impl RegionProvider for CornerRegion {
    fn background_region(&mut self, role: ChannelRole, volume: &ScanVolume) -> Option<Region> {
        let (_, h, w) = volume.shape();
        let side = (h.min(w) / CORNER_DIVISOR).max(1);
        debug!("[{}] Background region {side}x{side} at the corner", role.name());
        Some(Region::new(0, 0, side, side))
    }
}

/// 对一张图像执行完整流程.
pub fn run(args: &RunArgs) -> Result<()> {
    let ws = Workspace::locate()?;
    info!("Workspace {} ({} cpu(s))", ws.root().display(), utils::cpus());
    let mut session = Session::register(&args.image, ws.clone())?;
    let dump = args.dump.as_ref().map_or_else(Dump::disabled, Dump::to_dir);

    let n = session.attach_spots(args.spots.as_deref())?;
    info!("Attached {n} spot(s)");

    let preprocessor = Preprocessor::new(PreprocessConfig::default()).with_dump(dump.clone());
    match args.background {
        Some(region) => session.preprocess(&preprocessor, &mut FixedRegion(region))?,
        None => session.preprocess(&preprocessor, &mut CornerRegion)?,
    }

    let model = ws.latest_model().unwrap_or_else(|e| {
        debug!("{e}, the built-in classifier needs no model");
        ws.root().to_owned()
    });
    let threshold = args.threshold.map_or(Threshold::Otsu, Threshold::Fixed);
    session.segment(&mut ThresholdClassifier::new(threshold), &model)?;

    let config = RefineConfig {
        holes: HoleRule::with_min_area(session.options().min_hole_area),
        watershed: WatershedConfig {
            dynamic: args.dynamic,
            ..Default::default()
        },
        separate: args.separate,
    };
    session.refine(&Refiner::new(config).with_dump(dump))?;
    if let Some(path) = &args.snapshot {
        session.save_snapshot(path)?;
    }

    let m = session.measure(&MeasureConfig {
        threshold: args.output.max_distance,
    })?;
    write_outputs(session.source(), &m, &args.output)?;
    Ok(())
}

/// 标记一个 spot 为无效. 未指定图像时使用目标记录.
pub fn flag(args: &FlagArgs) -> Result<()> {
    let ws = Workspace::locate()?;
    let image = match &args.image {
        Some(p) => p.clone(),
        None => ws.read_target()?,
    };
    ws.flag_spot(&image, &args.id)?;
    info!("Flagged {} in {}", args.id, image.display());
    Ok(())
}

/// 从快照恢复并按当前的排除列表重新测量.
pub fn measure(args: &MeasureArgs) -> Result<()> {
    let ws = Workspace::locate()?;
    let mut session = Session::load_snapshot(&args.snapshot, ws)?;
    let m = session.measure(&MeasureConfig {
        threshold: args.output.max_distance,
    })?;
    write_outputs(session.source(), &m, &args.output)?;
    Ok(())
}

/// 修改并打印持久化选项.
pub fn options(args: &OptionsArgs) -> Result<()> {
    let ws = Workspace::locate()?;
    let mut o = ws.load_options()?;
    let before = o;
    if let Some(c) = args.spot_channel {
        o.spot_channel = c;
    }
    if let Some(c) = args.membrane_channel {
        o.membrane_channel = c;
    }
    if let Some(a) = args.min_hole_area {
        o.min_hole_area = a;
    }
    if o != before {
        ws.save_options(&o)?;
        info!("Saved {}", ws.options_path().display());
    }
    println!(
        "spot channel {}, membrane channel {}, min hole area {}",
        o.spot_channel, o.membrane_channel, o.min_hole_area
    );
    Ok(())
}

/// `path` 旁的 `<文件名去掉扩展名><suffix>.csv`.
fn sibling_csv(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("image");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let stem = name.rsplit_once('.').map_or(name, |(s, _)| s);
    path.with_file_name(format!("{stem}{suffix}.csv"))
}

/// 写出结果表, 落在掩膜上的 spot 表 (非空时) 和质控切片. 返回写出的表路径.
fn write_outputs(image: &Path, m: &Measurement, out: &OutputArgs) -> Result<Vec<PathBuf>> {
    let (csv, on_mask) = match &out.csv {
        Some(csv) => (csv.clone(), sibling_csv(csv, "_on_mask")),
        None => (
            sibling_csv(image, "_distances"),
            sibling_csv(image, "_on_mask"),
        ),
    };
    m.extraction.table.write_csv(&csv)?;
    let mut written = vec![csv];
    if !m.extraction.on_mask.is_empty() {
        m.extraction.on_mask_table().write_csv(&on_mask)?;
        written.push(on_mask);
    }
    if let Some(dir) = &out.qa {
        let slices = m.qa.save_png_slices(dir)?;
        info!("Wrote {} QA slice(s) to {}", slices.len(), dir.display());
    }
    if m.extraction.table.is_empty() {
        warn!("No spot within {} of the membrane", out.max_distance);
    }
    Report::new(image, m).print();
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use stm_berry::consts::gray::MASK_FOREGROUND;
    use stm_berry::measure::{distance_transform, extract_distances, update_control};
    use stm_berry::spots::{Spot, SpotStore};

    #[test]
    fn test_sibling_csv() {
        assert_eq!(
            sibling_csv(Path::new("/data/cell-07.nii.gz"), "_distances"),
            PathBuf::from("/data/cell-07_distances.csv")
        );
        assert_eq!(
            sibling_csv(Path::new("cell.nii"), "_on_mask"),
            PathBuf::from("cell_on_mask.csv")
        );
    }

    /// 一个前景体素, 一个 spot 落在其上, 另一个相距 3 个体素.
    fn measurement() -> Measurement {
        let calib = Calibration::isotropic(1.0, "µm").with_anisotropy(1.0);
        let mut mask = Array3::<u8>::zeros((1, 4, 4));
        mask[(0, 0, 0)] = MASK_FOREGROUND;
        let membrane = Volume::new(Array3::<u16>::zeros((1, 4, 4)), calib.clone());
        let control = ControlImage::assemble(Volume::new(mask, calib), membrane).unwrap();
        let spots = SpotStore::from_spots(
            [("0000-0001", [0, 0, 0]), ("0000-0002", [3, 0, 0])]
                .into_iter()
                .map(|(id, pixel)| Spot {
                    id: id.to_owned(),
                    physical: [0.0; 3],
                    pixel,
                })
                .collect(),
        );
        let distance = distance_transform(&control).unwrap();
        Measurement {
            extraction: extract_distances(&distance, &spots, 99.9),
            qa: update_control(&control, &distance).unwrap(),
            excluded: 0,
        }
    }

    #[test]
    fn test_write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("cell.nii.gz");
        let out = OutputArgs {
            max_distance: 99.9,
            csv: None,
            qa: None,
        };
        let written = write_outputs(&image, &measurement(), &out).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("cell_distances.csv"),
                dir.path().join("cell_on_mask.csv"),
            ]
        );
        let distances = std::fs::read_to_string(&written[0]).unwrap();
        assert_eq!(distances, "ID,Distance,X,Y,Z\n0000-0002,3.0,3,0,0\n");
        let on_mask = std::fs::read_to_string(&written[1]).unwrap();
        assert_eq!(on_mask, "ID,Distance,X,Y,Z\n0000-0001,0.0,0,0,0\n");
    }
}
