//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{
    Calibration, DistanceVolume, LabelVolume, Mask, MaskSlice, MaskSliceMut, RawVolume,
    ScanVolume, Volume,
};
pub use crate::error::{Error, ErrorKind, Result};

pub use crate::consts::gray::{MASK_BACKGROUND, MASK_FOREGROUND};

pub use crate::classifier::{PixelClassifier, Threshold, ThresholdClassifier};
pub use crate::coords::TargetGeometry;
pub use crate::dump::Dump;
pub use crate::exclusion::ExclusionList;
pub use crate::measure::{MeasureConfig, ResultsTable};
pub use crate::preprocess::{FixedRegion, PreprocessConfig, Preprocessor, Region, RegionProvider};
pub use crate::refine::{ControlImage, RefineConfig, Refiner};
pub use crate::session::{Session, Stage};
pub use crate::spots::SpotStore;
pub use crate::workspace::{Options, Workspace};
