//! 分割结果的精化.
//!
//! 分类器输出的掩膜依次经过:
//!
//! 1. 逐切片填充空洞 ([`fill_holes`]);
//! 2. 各向同性重采样 ([`make_isotropic`]);
//! 3. (可选) 以 spot 为向导分离粘连区域 ([`separate_touching`]);
//! 4. 与细胞膜通道组装为质控图像 ([`ControlImage::assemble`]).

mod control;
mod holes;
mod separate;

pub use control::ControlImage;
#[cfg(feature = "rayon")]
pub use holes::par_fill_holes;
pub use holes::{fill_holes, HoleRule};
pub use separate::{fragment, keep_labels, kept_labels, separate_touching, WatershedConfig};

use log::info;

use crate::coords::make_isotropic;
use crate::data::{Mask, ScanVolume};
use crate::dump::Dump;
use crate::error::Result;
use crate::spots::SpotStore;

/// 精化参数.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefineConfig {
    /// 空洞判定规则.
    pub holes: HoleRule,

    /// 分水岭分离参数.
    pub watershed: WatershedConfig,

    /// 是否分离粘连区域. 开启时需要提供 spot.
    pub separate: bool,
}

/// 分割精化流程.
#[derive(Clone, Debug, Default)]
pub struct Refiner {
    config: RefineConfig,
    dump: Dump,
}

impl Refiner {
    /// 以给定参数构建.
    pub fn new(config: RefineConfig) -> Self {
        Self {
            config,
            dump: Dump::default(),
        }
    }

    /// 设置中间结果导出.
    pub fn with_dump(mut self, dump: Dump) -> Self {
        self.dump = dump;
        self
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// 运行精化流程.
    ///
    /// `mask` 与 `membrane` 均为已填充 z 方向的原始网格体数据, 形状须一致.
    /// `spots` 须已映射到目标 (各向同性) 网格, 仅在开启分离时使用.
    pub fn run(
        &self,
        mask: &Mask,
        membrane: &ScanVolume,
        spots: Option<&SpotStore>,
    ) -> Result<ControlImage> {
        info!("Filling holes (min area {})", self.config.holes.min_area);
        #[cfg(feature = "rayon")]
        let filled = par_fill_holes(mask, &self.config.holes);
        #[cfg(not(feature = "rayon"))]
        let filled = fill_holes(mask, &self.config.holes);
        self.dump.volume("mask-filled", &filled)?;

        let (iso, factor) = make_isotropic(filled)?;
        info!("Resampled mask to {:?} (factor {factor:.4})", iso.shape());

        let refined = if self.config.separate {
            info!("Separating touching regions");
            separate_touching(&iso, spots, &self.config.watershed)?
        } else {
            iso
        };
        self.dump.volume("mask-refined", &refined)?;

        let (membrane, _) = make_isotropic(membrane.clone())?;
        ControlImage::assemble(refined, membrane)
    }
}
