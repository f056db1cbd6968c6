//! 通用常量.

/// 单通道颜色 (二值掩膜).
pub mod gray {
    /// 掩膜中背景的像素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 掩膜中前景 (细胞膜) 的像素值.
    pub const MASK_FOREGROUND: u8 = 255;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 像素是否是前景?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        p != MASK_BACKGROUND
    }

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        p == MASK_BACKGROUND
    }
}

/// 预处理阶段的固定参数.
pub mod preprocess {
    /// 滚球背景估计的半径, 以物理单位计.
    pub const ROLLING_BALL_RADIUS: f64 = 20.0;

    /// 直方图拉伸时, 每一侧尾部丢弃的饱和百分比.
    pub const SATURATION_PERCENT: f64 = 0.1;

    /// 平面方向的高斯平滑标准差, 以像素计.
    pub const SIGMA_XY: f64 = 7.0;

    /// spot 通道的 gamma 指数.
    pub const SPOT_GAMMA: f64 = 0.25;

    /// 细胞膜通道的 gamma 指数.
    pub const MEMBRANE_GAMMA: f64 = 1.5;

    /// 16-bit 表示的最大值.
    pub const U16_MAX_F: f64 = u16::MAX as f64;
}

/// 分割精化阶段的固定参数.
pub mod refine {
    /// 小于该面积 (像素个数) 的背景连通区域被视为分割空洞.
    pub const MIN_HOLE_AREA: usize = 2000;

    /// 面积小于 `MIN_HOLE_AREA * CIRCULAR_HOLE_FACTOR` 且足够圆的区域也被视为空洞.
    pub const CIRCULAR_HOLE_FACTOR: usize = 2;

    /// 圆度下限.
    pub const MIN_HOLE_CIRCULARITY: f64 = 0.5;

    /// 扩展极小值分水岭的动态阈值 (体素单位).
    pub const WATERSHED_DYNAMIC: f32 = 4.0;

    /// 融合碎片时, 立方体结构元素的半径.
    pub const CLOSING_RADIUS: usize = 2;

    /// 分类器输出中被视为前景的标签.
    pub const FOREGROUND_LABELS: [u32; 2] = [2, 3];
}

/// 测量阶段的固定参数.
pub mod measure {
    /// 默认距离门限, 以物理单位计.
    pub const DEFAULT_THRESHOLD: f32 = 99.9;

    /// 采样距离低于该值的 spot 被认为落在掩膜上.
    pub const ON_MASK_EPSILON: f32 = 1e-6;

    /// 类欧氏 chamfer 权重: 面相邻, 边相邻, 顶点相邻.
    pub const QUASI_EUCLIDEAN: [f32; 3] = [1.0, std::f32::consts::SQRT_2, 1.732_050_8];
}

/// 持久化记录的文件名.
pub mod files {
    /// 目标记录文件名.
    pub const TARGET_RECORD: &str = "spots_to_membrane.txt";

    /// 选项记录文件名.
    pub const OPTIONS_RECORD: &str = "options.json";

    /// 分类器模型文件扩展名.
    pub const MODEL_EXTENSION: &str = "classifier";

    /// spot 文件开头需要跳过的元信息行数.
    pub const SPOT_HEADER_LINES: usize = 4;
}
