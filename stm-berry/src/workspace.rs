//! 跨进程持久化的记录: 目标记录, 选项, 排除列表, 分类器模型.
//!
//! 所有记录都位于同一个工作目录中. 工作目录取自环境变量 `STM_WORKSPACE_DIR`,
//! 未设置时为 `{home}/.spots-to-membrane`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::classifier::latest_model;
use crate::consts::files::*;
use crate::error::{Error, Result};
use crate::exclusion::ExclusionList;

/// 指定工作目录的环境变量.
pub const WORKSPACE_ENV: &str = "STM_WORKSPACE_DIR";

/// 未指定时, 家目录下的工作目录名.
const DEFAULT_DIR_NAME: &str = ".spots-to-membrane";

/// 用户持久化的选项.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// spot 通道, 从 1 开始.
    #[serde(rename = "chSpots")]
    pub spot_channel: usize,

    /// 细胞膜通道, 从 1 开始.
    #[serde(rename = "chMembrane")]
    pub membrane_channel: usize,

    /// 空洞面积下限.
    #[serde(rename = "sizeHoles")]
    pub min_hole_area: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            spot_channel: 1,
            membrane_channel: 3,
            min_hole_area: crate::consts::refine::MIN_HOLE_AREA,
        }
    }
}

impl Options {
    /// 检查选项. 通道编号为 0 时返回 [`Error::Configuration`].
    pub fn validate(&self) -> Result<()> {
        if self.spot_channel == 0 || self.membrane_channel == 0 {
            return Err(Error::config(format!(
                "channels are 1-based, got spots {} and membrane {}",
                self.spot_channel, self.membrane_channel
            )));
        }
        Ok(())
    }
}

/// 工作目录.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// 以 `root` 为工作目录. 目录在首次写出时创建.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    /// 按环境变量或家目录定位工作目录. 两者都不可用时返回 [`Error::Configuration`].
    pub fn locate() -> Result<Self> {
        if let Some(dir) = env::var_os(WORKSPACE_ENV).filter(|d| !d.is_empty()) {
            return Ok(Self::new(dir));
        }
        dirs::home_dir()
            .map(|home| Self::new(home.join(DEFAULT_DIR_NAME)))
            .ok_or_else(|| {
                Error::config(format!(
                    "neither {WORKSPACE_ENV} nor a home directory is set"
                ))
            })
    }

    /// 工作目录路径.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// 目标记录文件路径.
    #[inline]
    pub fn target_record_path(&self) -> PathBuf {
        self.root.join(TARGET_RECORD)
    }

    /// 以 `image` 的绝对路径覆盖目标记录.
    pub fn write_target(&self, image: &Path) -> Result<PathBuf> {
        self.ensure()?;
        let image = if image.is_absolute() {
            image.to_owned()
        } else {
            env::current_dir()?.join(image)
        };
        fs::write(
            self.target_record_path(),
            image.to_string_lossy().as_bytes(),
        )?;
        debug!("Target record -> {}", image.display());
        Ok(image)
    }

    /// 读取目标记录. 记录不存在时返回 [`Error::ResourceNotFound`], 为空时返回 [`Error::Configuration`].
    pub fn read_target(&self) -> Result<PathBuf> {
        let record = self.target_record_path();
        if !record.is_file() {
            return Err(Error::ResourceNotFound(record));
        }
        let text = fs::read_to_string(&record)?;
        let line = text.lines().next().map(str::trim).unwrap_or_default();
        if line.is_empty() {
            return Err(Error::config("the target record is empty"));
        }
        Ok(PathBuf::from(line))
    }

    /// 选项文件路径.
    #[inline]
    pub fn options_path(&self) -> PathBuf {
        self.root.join(OPTIONS_RECORD)
    }

    /// 读取选项. 文件不存在时使用默认值; 内容非法时返回 [`Error::Configuration`].
    pub fn load_options(&self) -> Result<Options> {
        let path = self.options_path();
        if !path.is_file() {
            info!("No options file found. Using default values.");
            return Ok(Options::default());
        }
        let options: Options = serde_json::from_str(&fs::read_to_string(&path)?)?;
        options.validate()?;
        Ok(options)
    }

    /// 写出选项.
    pub fn save_options(&self, options: &Options) -> Result<()> {
        options.validate()?;
        self.ensure()?;
        fs::write(self.options_path(), serde_json::to_string_pretty(options)?)?;
        Ok(())
    }

    /// 图像对应的排除列表文件 `<root>/<图像名去掉扩展名>.txt`.
    pub fn exclusion_path(&self, image: &Path) -> Result<PathBuf> {
        let name = image
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::config(format!("no file name in {}", image.display())))?;
        let name = name.strip_suffix(".gz").unwrap_or(name);
        let stem = name.rsplit_once('.').map_or(name, |(s, _)| s);
        Ok(self.root.join(format!("{stem}.txt")))
    }

    /// 清空 (或创建) 图像对应的排除列表, 返回其路径.
    pub fn reset_exclusion(&self, image: &Path) -> Result<PathBuf> {
        let path = self.exclusion_path(image)?;
        ExclusionList::reset(&path)?;
        Ok(path)
    }

    /// 读取图像对应的排除列表.
    pub fn load_exclusion(&self, image: &Path) -> Result<ExclusionList> {
        ExclusionList::load(self.exclusion_path(image)?)
    }

    /// 标记图像中的一个 spot 为无效.
    pub fn flag_spot(&self, image: &Path, id: &str) -> Result<()> {
        ExclusionList::flag(self.exclusion_path(image)?, id)
    }

    /// 版本号最大的分类器模型.
    pub fn latest_model(&self) -> Result<PathBuf> {
        latest_model(&self.root, MODEL_EXTENSION)
    }
}
