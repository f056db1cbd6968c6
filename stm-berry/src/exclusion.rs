//! 操作员标记为无效的 spot 列表.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use log::{debug, info};

use crate::error::{Error, Result};

/// 每张图像一份的排除列表. 文件格式为每行一个标识符, 空行和以 `#` 开头的行被忽略.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionList {
    ids: BTreeSet<String>,
}

impl ExclusionList {
    /// 解析文本. 重复的标识符只计一次.
    pub fn parse(text: &str) -> Self {
        let ids = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_owned)
            .collect();
        Self { ids }
    }

    /// 读取排除列表文件. 文件不存在时返回 [`Error::ResourceNotFound`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ResourceNotFound(path.to_owned()));
        }
        let list = Self::parse(&fs::read_to_string(path)?);
        debug!("Loaded {} exclusion(s) from {}", list.len(), path.display());
        Ok(list)
    }

    /// 清空 (或创建) 排除列表文件.
    pub fn reset<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, "")?;
        Ok(())
    }

    /// 向排除列表文件追加一个标识符.
    pub fn flag<P: AsRef<Path>>(path: P, id: &str) -> Result<()> {
        let id = id.trim();
        if id.is_empty() || id.starts_with('#') || id.contains('\n') {
            return Err(Error::config(format!("invalid spot identifier `{id}`")));
        }
        let path = path.as_ref();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{id}")?;
        info!("Flagged spot {id} in {}", path.display());
        Ok(())
    }

    /// 标识符个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 是否包含 `id`?
    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// 全部标识符.
    #[inline]
    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }
}
