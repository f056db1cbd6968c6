//! 二维水平掩膜切片的操作.

mod core;
mod iter;

pub use core::{MaskSlice, MaskSliceMut};
pub use iter::PosIter;
