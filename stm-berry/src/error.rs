//! 运行时错误.

use std::path::PathBuf;

/// 本 crate 的通用 `Result`.
pub type Result<T> = std::result::Result<T, Error>;

/// 错误的五种基本类别. 每个 [`Error`] 都归属其中之一.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// 选项缺失/非法, 或标定、各向异性元信息缺失. 对当前阶段致命, 无部分输出.
    Configuration,

    /// 目标/spot/分类器文件缺失. 对本次运行致命.
    ResourceNotFound,

    /// 外部能力 (分类器) 执行失败.
    ExternalCapability,

    /// 数据不一致 (通道数、形状、索引不符). 在操作前检测, 操作被跳过.
    DataInconsistency,

    /// 用户取消 (对话框关闭, 未绘制所需区域).
    UserCancellation,
}

/// 流程中所有可能的错误.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 配置错误.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 资源不存在.
    #[error("resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    /// 外部能力执行失败.
    #[error("external capability failure: {0}")]
    ExternalCapability(String),

    /// 数据不一致.
    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    /// 用户取消.
    #[error("cancelled by user: {0}")]
    UserCancellation(String),

    /// 底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 读取 nifti 文件错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 读写 csv 错误.
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// 读写 json 错误.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// 快照 (反) 序列化错误.
    #[error(transparent)]
    Snapshot(#[from] bincode::Error),

    /// 写出 npy 错误.
    #[error(transparent)]
    Npy(#[from] ndarray_npy::WriteNpyError),

    /// 写出图像错误.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    /// 该错误所属的基本类别.
    ///
    /// 底层 I/O 错误中 `NotFound` 归为 [`ErrorKind::ResourceNotFound`],
    /// 内容格式错误归为 [`ErrorKind::DataInconsistency`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) | Error::Json(_) => ErrorKind::Configuration,
            Error::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            Error::ExternalCapability(_) => ErrorKind::ExternalCapability,
            Error::UserCancellation(_) => ErrorKind::UserCancellation,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::ResourceNotFound
            }
            Error::DataInconsistency(_)
            | Error::Io(_)
            | Error::Nifti(_)
            | Error::Csv(_)
            | Error::Snapshot(_)
            | Error::Npy(_)
            | Error::Image(_) => ErrorKind::DataInconsistency,
        }
    }

    /// 便捷构造 [`Error::Configuration`].
    #[inline]
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 便捷构造 [`Error::DataInconsistency`].
    #[inline]
    pub(crate) fn inconsistent(msg: impl Into<String>) -> Self {
        Self::DataInconsistency(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};
    use std::io;

    #[test]
    fn test_io_not_found_is_resource() {
        let e = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(e.kind(), ErrorKind::ResourceNotFound);

        let e = Error::from(io::Error::new(io::ErrorKind::InvalidData, "bad"));
        assert_eq!(e.kind(), ErrorKind::DataInconsistency);
    }

    #[test]
    fn test_kind_of_taxonomy() {
        assert_eq!(Error::config("x").kind(), ErrorKind::Configuration);
        assert_eq!(
            Error::inconsistent("x").kind(),
            ErrorKind::DataInconsistency
        );
        assert_eq!(
            Error::UserCancellation("roi".into()).kind(),
            ErrorKind::UserCancellation
        );
    }
}
