//! 纵向 PET 参考区域体素映射与 LTS 离群剔除.
//!
//! 输出根目录: `--root-dir`, 否则 `$LONG_SUVR_ROOT`, 否则 `$HOME/dataset/long_suvr`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};

use long_suvr::consts::{DEFAULT_ALPHA, LTS_SEED};
use long_suvr::pipeline::{run, PipelineInputs, RunConfig};
use long_suvr::region::ReferenceRegion;
use long_suvr::suvr::ReferenceStat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 受试者标签, 可带 `sub-` 前缀.
    #[arg(long)]
    subject: String,

    /// midpoint -> baseline PET 形变场.
    #[arg(long)]
    mid_to_bl: PathBuf,

    /// midpoint -> follow-up PET 形变场.
    #[arg(long)]
    mid_to_fu: PathBuf,

    /// midpoint 空间 GIF 分区.
    #[arg(long)]
    mid_par: PathBuf,

    /// baseline PET.
    #[arg(long)]
    bl_pet: PathBuf,

    /// follow-up PET.
    #[arg(long)]
    fu_pet: PathBuf,

    /// 参考区域: cereb, gm-cereb, pons, wm-subcort, wm-subcort-gif3, gm-cereb-clean.
    #[arg(long, default_value = "cereb")]
    ref_roi: ReferenceRegion,

    /// midpoint 空间的外部参考区域掩膜. gm-cereb-clean 必须提供.
    #[arg(long)]
    ref_roi_mask: Option<PathBuf>,

    /// LTS 截尾比例, [0.5, 1.0] 之外使用 0.75.
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    alpha: f64,

    /// 输出根目录.
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// 清洗分区用的脑掩膜 (midpoint 空间), 可重复.
    #[arg(long)]
    brain_mask: Vec<PathBuf>,

    /// LTS 随机种子.
    #[arg(long, default_value_t = LTS_SEED)]
    seed: u64,

    /// 归一化使用的参考统计量: mean 或 median.
    #[arg(long, default_value_t = ReferenceStat::Mean)]
    reference_stat: ReferenceStat,

    /// 不输出 SUVR 图像.
    #[arg(long)]
    no_suvr: bool,

    /// 顺序执行体素映射, 不使用 rayon.
    #[arg(long)]
    sequential: bool,

    /// 输出调试日志 (包括每个被拒绝的体素).
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init()
        .context("cannot install logger")?;

    let inputs = PipelineInputs {
        subject: args.subject,
        mid_to_bl: args.mid_to_bl,
        mid_to_fu: args.mid_to_fu,
        mid_par: args.mid_par,
        bl_pet: args.bl_pet,
        fu_pet: args.fu_pet,
        ref_roi_mask: args.ref_roi_mask,
        brain_masks: args.brain_mask,
    };
    let mut config = RunConfig::new(args.ref_roi)
        .with_alpha(args.alpha)
        .with_seed(args.seed)
        .with_reference_stat(args.reference_stat)
        .with_suvr(!args.no_suvr)
        .with_parallel(!args.sequential);
    if let Some(root) = args.root_dir {
        config = config.with_root(root);
    }

    let report = run(&inputs, &config)
        .with_context(|| format!("voxel mapping failed for {}", inputs.subject))?;
    info!(
        "{}: {} reference voxels, {} retained, {} rejected",
        report.layout.subject(),
        report.region_voxels,
        report.retained,
        report.rejected
    );

    match report.outlier_stage {
        Ok(o) => {
            info!(
                "alpha {}: {} outliers, {} inliers, {} non-finite dropped",
                o.alpha, o.outliers, o.inliers, o.dropped
            );
            if let Some(r) = o.reference {
                info!(
                    "reference {}: baseline {:.4}, followup {:.4}, ratio {:.4}",
                    r.stat,
                    r.baseline,
                    r.followup,
                    r.ratio()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            // 上游产物已写盘, 以非零状态退出.
            error!("outlier stage failed: {e}");
            Ok(ExitCode::from(2))
        }
    }
}
