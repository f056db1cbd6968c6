use serde::{Deserialize, Serialize};

use crate::data::{Calibration, Mask, ScanVolume};
use crate::error::{Error, Result};
use crate::Idx3d;

/// 双通道质控图像: 第一通道为二值掩膜, 第二通道为 (填充并各向同性重采样后的) 细胞膜通道.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlImage {
    mask: Mask,
    membrane: ScanVolume,
}

impl ControlImage {
    /// 组装质控图像. 标定取自掩膜; 两者形状不一致时返回 [`Error::DataInconsistency`].
    pub fn assemble(mask: Mask, membrane: ScanVolume) -> Result<Self> {
        if mask.shape() != membrane.shape() {
            return Err(Error::inconsistent(format!(
                "mask {:?} and membrane {:?} differ in shape",
                mask.shape(),
                membrane.shape()
            )));
        }
        let membrane = membrane.with_calibration(mask.calibration().clone());
        Ok(Self { mask, membrane })
    }

    /// 掩膜通道.
    #[inline]
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// 细胞膜通道.
    #[inline]
    pub fn membrane(&self) -> &ScanVolume {
        &self.membrane
    }

    /// 标定.
    #[inline]
    pub fn calibration(&self) -> &Calibration {
        self.mask.calibration()
    }

    /// 形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.mask.shape()
    }
}
