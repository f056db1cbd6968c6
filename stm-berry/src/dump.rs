//! 中间结果导出. 未设置导出目录时所有操作都是空操作.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use ndarray_npy::WritableElement;

use crate::data::Volume;
use crate::error::Result;

/// 将中间体数据以 `.npy` 格式导出到可选目录.
#[derive(Clone, Debug, Default)]
pub struct Dump {
    dir: Option<PathBuf>,
}

impl Dump {
    /// 不导出.
    #[inline]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 导出到 `dir`. 目录在首次写出时创建.
    #[inline]
    pub fn to_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: Some(dir.as_ref().to_owned()),
        }
    }

    /// 导出体数据为 `<dir>/<name>.npy`, 返回写出的路径 (未启用时为 `None`).
    pub fn volume<T: WritableElement>(
        &self,
        name: &str,
        volume: &Volume<T>,
    ) -> Result<Option<PathBuf>> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(None);
        };
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.npy"));
        ndarray_npy::write_npy(&path, &volume.data())?;
        debug!("Dumped {} {:?}", path.display(), volume.shape());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::Dump;
    use crate::data::{Calibration, Volume};
    use ndarray::Array3;

    #[test]
    fn test_dump_npy() {
        let dir = tempfile::tempdir().unwrap();
        let v = Volume::new(
            Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 12 + h * 4 + w) as u16),
            Calibration::uncalibrated(),
        );
        assert_eq!(Dump::disabled().volume("x", &v).unwrap(), None);

        let path = Dump::to_dir(dir.path().join("dump"))
            .volume("x", &v)
            .unwrap()
            .unwrap();
        let back: Array3<u16> = ndarray_npy::read_npy(&path).unwrap();
        assert_eq!(back, v.into_raw());
    }
}
