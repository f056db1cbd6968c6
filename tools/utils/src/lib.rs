//! 命令行工具依赖的通用组件.

use std::io::{self, Write};
use std::num::ParseIntError;

use stm_berry::preprocess::Region;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 简单分隔线.
#[inline]
pub fn sep_to<W: Write>(mut w: W) -> io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 解析 `top,left,height,width` 形式的背景区域.
///
/// # 注意
///
/// 不检查区域是否落在图像内, 这一检查在预处理时进行.
pub fn parse_region(s: &str) -> Result<Region, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<usize>())
        .collect::<Result<Vec<_>, ParseIntError>>()
        .map_err(|e| format!("invalid region `{s}`: {e}"))?;
    match parts[..] {
        [top, left, height, width] if height > 0 && width > 0 => {
            Ok(Region::new(top, left, height, width))
        }
        [_, _, _, _] => Err(format!("empty region `{s}`")),
        _ => Err(format!("expected `top,left,height,width`, got `{s}`")),
    }
}
