#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 测量三维多通道显微图像中 spot 到细胞膜表面的物理距离.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体数据一律以 `(z, h, w)` 索引; spot 文件中的物理坐标以 `[x, y, z]` 表示,
//!   且 Y 与 Z 从相反的边缘度量. 两者之间的换算只在 [`coords`] 中进行.
//! 2. 像素分类器和 "操作员绘制背景区域" 都是外部能力, 分别以
//!   [`classifier::PixelClassifier`] 和 [`preprocess::RegionProvider`] 表示.
//! 3. 在非期望情况下 (如越界索引), 程序会直接 panic, 而不会导致内存错误.
//!
//! # 开发计划
//!
//! ### 坐标换算 ✅
//!
//! 物理坐标与 "先填充、再各向同性重采样" 的像素网格之间的换算,
//! 包括轴翻转和填充偏移补偿.
//!
//! 实现位于 `stm-berry/src/coords.rs`.
//!
//! ### 逐通道预处理 ✅
//!
//! 位深度规范化, 滚球背景扣除, 直方图拉伸, 高斯平滑, gamma 校正,
//! 背景底噪扣除, z 方向填充.
//!
//! 实现位于 `stm-berry/src/preprocess`.
//!
//! ### 三维形态学操作 ✅
//!
//! 1. 类欧氏 chamfer 距离变换. ✅
//! 2. 立方体结构元素的二值膨胀/腐蚀/闭运算. ✅
//! 3. h-极小值, 扩展极小值与带坝的分水岭. ✅
//!
//! 实现位于 `stm-berry/src/morph`.
//!
//! ### 分割精化 ✅
//!
//! 逐切片填充空洞, 以 spot 为向导分离粘连区域, 组装质控图像.
//!
//! 实现位于 `stm-berry/src/refine`.
//!
//! ### 距离测量 ✅
//!
//! 实现位于 `stm-berry/src/measure.rs`.
//!
//! ### 会话与快照 ✅
//!
//! 显式的阶段状态机代替 "当前图像" 的隐式全局状态;
//! 精化后的状态可以写出为快照, 在操作员审阅后于另一进程中恢复测量.
//!
//! 实现位于 `stm-berry/src/session.rs`.
//!
//! ### 精确欧氏距离 ❌
//!
//! 不做. chamfer 距离的误差在可接受范围内.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

type Predicate = fn(u8) -> bool;

type Area2d = Vec<Idx2d>;
type Areas2d = Vec<Area2d>;

/// 体数据, 标定, 切片等基础数据结构.
pub mod data;

pub use data::{
    BitDepth, Calibration, DistanceVolume, LabelVolume, Mask, MaskSlice, MaskSliceMut,
    RawSamples, RawVolume, ScanVolume, Volume,
};

pub mod consts;
pub mod error;

pub use error::{Error, ErrorKind, Result};

pub mod classifier;
pub mod coords;
pub mod dump;
pub mod exclusion;
pub mod measure;
pub mod morph;
pub mod preprocess;
pub mod refine;
pub mod session;
pub mod spots;
pub mod workspace;

pub mod prelude;
