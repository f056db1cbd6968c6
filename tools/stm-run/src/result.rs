//! 测量结果摘要.

use std::io::{self, Write};
use std::path::Path;

use stm_berry::session::Measurement;

/// 将 `m` 的摘要写进 `w` 中.
fn describe_into<W: Write>(name: &str, m: &Measurement, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f32_to_display(f: Option<f32>) -> String {
        match f {
            Some(f) => format!("{f:.4}"),
            None => "/".to_string(),
        }
    }

    let e = &m.extraction;
    let distances = e.table.iter().map(|r| r.distance);
    let min = distances.clone().reduce(f32::min);
    let max = distances.clone().reduce(f32::max);
    let mean = (!e.table.is_empty()).then(|| distances.sum::<f32>() / e.table.len() as f32);
    let unit = m.qa.calibration().unit();

    writeln!(w, "Image `{name}`:")?;
    writeln!(w, "{S4}Flagged as invalid: {}", m.excluded)?;
    writeln!(w, "{S4}Measured spots: {}", e.table.len())?;
    writeln!(w, "{S4}Spots on the mask: {}", e.on_mask.len())?;
    writeln!(w, "{S4}Spots outside the grid: {}", e.outside.len())?;
    writeln!(w, "{S4}Shortest distance: {} {unit}", f32_to_display(min))?;
    writeln!(w, "{S4}Longest distance: {} {unit}", f32_to_display(max))?;
    write!(w, "{S4}Average distance: {} {unit}", f32_to_display(mean))?;
    Ok(())
}

/// 一次测量的报告.
pub struct Report<'a> {
    name: String,
    measurement: &'a Measurement,
}

impl<'a> Report<'a> {
    pub fn new(image: &Path, measurement: &'a Measurement) -> Self {
        let name = image
            .file_name()
            .map_or_else(
                || image.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            );
        Self { name, measurement }
    }

    /// 打印报告.
    pub fn print(&self) {
        let mut buf = Vec::with_capacity(512);
        utils::sep();
        match describe_into(&self.name, self.measurement, &mut buf) {
            Ok(()) => println!("{}", String::from_utf8_lossy(&buf)),
            Err(e) => log::error!("Cannot describe the measurement: {e}"),
        }
        utils::sep();
    }
}
