//! 像素分类器适配层.
//!
//! 分类器本身是外部能力, 本 crate 只消费其逐体素的整数标签输出.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::consts::gray::*;
use crate::data::{LabelVolume, Mask, ScanVolume};
use crate::error::{Error, Result};

/// 分类器的执行方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExecutionMode {
    /// 加速执行 (如 GPU).
    Accelerated,

    /// 标准 (降级) 执行.
    Standard,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Accelerated => write!(f, "accelerated"),
            ExecutionMode::Standard => write!(f, "standard"),
        }
    }
}

/// 逐体素分类器.
pub trait PixelClassifier {
    /// 以模型 `model` 对 `volume` 分类, 返回同形状的标签体.
    ///
    /// 执行失败时应返回 [`Error::ExternalCapability`].
    fn classify(
        &mut self,
        volume: &ScanVolume,
        model: &Path,
        mode: ExecutionMode,
    ) -> Result<LabelVolume>;
}

/// 先以加速方式执行分类; 若外部能力失败, 以标准方式重试一次.
///
/// 第二次失败时返回该错误. 非 [`Error::ExternalCapability`] 的错误不重试.
/// 输出形状与输入不符时返回 [`Error::DataInconsistency`].
pub fn classify_with_fallback<C: PixelClassifier + ?Sized>(
    classifier: &mut C,
    volume: &ScanVolume,
    model: &Path,
) -> Result<LabelVolume> {
    info!("Classifying {:?} with {}", volume.shape(), model.display());
    let labels = match classifier.classify(volume, model, ExecutionMode::Accelerated) {
        Err(Error::ExternalCapability(msg)) => {
            warn!("Accelerated classification failed ({msg}), retrying in standard mode");
            classifier.classify(volume, model, ExecutionMode::Standard)?
        }
        other => other?,
    };
    if labels.shape() != volume.shape() {
        return Err(Error::inconsistent(format!(
            "classifier returned {:?} for an input of {:?}",
            labels.shape(),
            volume.shape()
        )));
    }
    Ok(labels)
}

/// 将标签体中属于 `foreground` 的标签转换为前景, 其余为背景. 标定不变.
pub fn labels_to_mask(labels: &LabelVolume, foreground: &[u32]) -> Mask {
    labels.map(|l| {
        if foreground.contains(l) {
            MASK_FOREGROUND
        } else {
            MASK_BACKGROUND
        }
    })
}

/// 解析 `vNNN.<ext>` 形式的模型文件名, 返回版本号.
fn model_version(file_name: &str, ext: &str) -> Option<u32> {
    let stem = file_name
        .strip_prefix('v')?
        .strip_suffix(ext)?
        .strip_suffix('.')?;
    (stem.len() == 3 && stem.bytes().all(|b| b.is_ascii_digit()))
        .then(|| stem.parse().ok())
        .flatten()
}

/// 在 `dir` 中选择版本号最大的 `vNNN.<ext>` 模型文件.
///
/// 目录不存在或没有匹配文件时返回 [`Error::ResourceNotFound`].
pub fn latest_model<P: AsRef<Path>>(dir: P, ext: &str) -> Result<PathBuf> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::ResourceNotFound(dir.to_owned()));
    }
    let mut best: Option<(u32, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(version) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| model_version(n, ext))
        else {
            continue;
        };
        if path.is_file() && best.as_ref().map_or(true, |(v, _)| version > *v) {
            best = Some((version, path));
        }
    }
    best.map(|(_, p)| p)
        .ok_or_else(|| Error::ResourceNotFound(dir.join(format!("vNNN.{ext}"))))
}

/// 阈值的来源.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Threshold {
    /// 固定阈值.
    Fixed(u16),

    /// 由 Otsu 方法从整体直方图中求得.
    Otsu,
}

/// 大津法阈值. 返回使类间方差最大的灰度值 `t`, 前景为 `>= t` 的体素.
pub fn otsu_threshold(volume: &ScanVolume) -> u16 {
    let mut hist = vec![0u64; u16::MAX as usize + 1];
    volume.data().iter().for_each(|v| hist[*v as usize] += 1);
    let total = volume.size() as f64;
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, c)| i as f64 * *c as f64)
        .sum();

    let (mut w_bg, mut sum_bg) = (0.0, 0.0);
    let (mut best, mut best_var) = (0usize, -1.0);
    for (t, c) in hist.iter().enumerate() {
        // 背景为 `< t + 1` 的体素.
        w_bg += *c as f64;
        sum_bg += t as f64 * *c as f64;
        let w_fg = total - w_bg;
        if w_bg == 0.0 || w_fg == 0.0 {
            continue;
        }
        let m_bg = sum_bg / w_bg;
        let m_fg = (sum_all - sum_bg) / w_fg;
        let var = w_bg * w_fg * (m_bg - m_fg).powi(2);
        if var > best_var {
            best_var = var;
            best = t;
        }
    }
    (best + 1).min(u16::MAX as usize) as u16
}

/// 内置的确定性分类器: 不低于阈值的体素标为 `2`, 其余标为 `1`.
///
/// 不读取模型文件, 也从不失败. 供命令行驱动和测试使用.
#[derive(Copy, Clone, Debug)]
pub struct ThresholdClassifier {
    threshold: Threshold,
}

impl ThresholdClassifier {
    /// 以给定阈值来源构建.
    pub fn new(threshold: Threshold) -> Self {
        Self { threshold }
    }
}

impl PixelClassifier for ThresholdClassifier {
    fn classify(
        &mut self,
        volume: &ScanVolume,
        _: &Path,
        mode: ExecutionMode,
    ) -> Result<LabelVolume> {
        let t = match self.threshold {
            Threshold::Fixed(t) => t,
            Threshold::Otsu => otsu_threshold(volume),
        };
        info!("Thresholding at {t} ({mode})");
        Ok(volume.map(|v| if *v >= t { 2 } else { 1 }))
    }
}
