//! 命令行驱动: 登记图像, 预处理, 分割, 精化, 测量.
//!
//! 工作目录取自环境变量 `STM_WORKSPACE_DIR`, 未设置时为 `{home}/.spots-to-membrane`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use stm_berry::preprocess::Region;

mod result;
mod runner;

#[derive(Parser, Debug)]
#[command(version, about = "Measures spot-to-membrane distances in 3D stacks")]
struct Cli {
    /// 输出调试日志.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 对一张图像执行完整流程.
    Run(RunArgs),

    /// 标记一个 spot 为无效.
    Flag(FlagArgs),

    /// 从快照恢复并重新测量.
    Measure(MeasureArgs),

    /// 查看或修改持久化选项.
    Options(OptionsArgs),
}

/// 测量输出参数, `run` 与 `measure` 共用.
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// 距离门限, 以物理单位计.
    #[arg(long, default_value_t = stm_berry::consts::measure::DEFAULT_THRESHOLD)]
    pub max_distance: f32,

    /// 结果表路径. 默认写到图像旁的 `<图像名>_distances.csv`.
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// 质控切片 PNG 的输出目录.
    #[arg(long)]
    pub qa: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// 多通道 NIfTI 图像.
    pub image: PathBuf,

    /// spot 文件. 默认在图像旁查找.
    #[arg(long)]
    pub spots: Option<PathBuf>,

    /// 固定分割阈值. 默认使用 Otsu 阈值.
    #[arg(long)]
    pub threshold: Option<u16>,

    /// 背景区域 `top,left,height,width`. 默认取左上角.
    #[arg(long, value_parser = utils::parse_region)]
    pub background: Option<Region>,

    /// 以分水岭分离粘连区域.
    #[arg(long)]
    pub separate: bool,

    /// 分水岭动态阈值.
    #[arg(long, default_value_t = stm_berry::consts::refine::WATERSHED_DYNAMIC)]
    pub dynamic: f32,

    /// 中间结果 `.npy` 的导出目录.
    #[arg(long)]
    pub dump: Option<PathBuf>,

    /// 精化后写出快照, 供审阅后的 `measure` 使用.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct FlagArgs {
    /// spot 标识符, 如 `0012-0003`.
    pub id: String,

    /// 图像路径. 默认为当前目标.
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MeasureArgs {
    /// `run --snapshot` 写出的快照.
    pub snapshot: PathBuf,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct OptionsArgs {
    /// spot 通道, 从 1 开始.
    #[arg(long)]
    pub spot_channel: Option<usize>,

    /// 细胞膜通道, 从 1 开始.
    #[arg(long)]
    pub membrane_channel: Option<usize>,

    /// 空洞面积下限.
    #[arg(long)]
    pub min_hole_area: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    if let Err(e) = simple_logger::init_with_level(level) {
        eprintln!("Logger unavailable: {e}");
    }

    let outcome = match cli.command {
        Command::Run(args) => runner::run(&args),
        Command::Flag(args) => runner::flag(&args),
        Command::Measure(args) => runner::measure(&args),
        Command::Options(args) => runner::options(&args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e} ({:?})", e.kind());
            ExitCode::FAILURE
        }
    }
}
