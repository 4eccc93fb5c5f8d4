//! 运行时错误.

use std::path::PathBuf;

use thiserror::Error;

use crate::robust::FitError;
use crate::{Idx3d, RawIdx3d, Timepoint};

/// 本 crate 的统一错误类型.
///
/// 按照来源分为: 配置错误, 空间不一致, 稳健拟合失败, 以及底层 I/O 错误.
#[derive(Debug, Error)]
pub enum SuvrError {
    /// 未知的参考区域名称.
    #[error("unknown reference region `{0}`")]
    UnknownRegion(String),

    /// 该参考区域必须由外部掩膜给出, 但没有提供.
    #[error("reference region `{0}` requires an external mask, none supplied")]
    MissingExternalMask(&'static str),

    /// 两个体数据网格形状不一致.
    #[error("{what}: shape {found:?} does not match expected {expected:?}")]
    ShapeMismatch {
        /// 出错的数据.
        what: &'static str,
        /// 期望形状.
        expected: Vec<usize>,
        /// 实际形状.
        found: Vec<usize>,
    },

    /// 形变场给出的坐标落到目标 PET 体数据之外, 或者坐标不是有限值.
    #[error(
        "voxel {voxel} (midpoint {origin:?}): {timepoint} coordinate \
         ({:.3}, {:.3}, {:.3}) mm {}, outside grid {shape:?}",
        .mm[0], .mm[1], .mm[2], describe_index(.index)
    )]
    OutOfBounds {
        /// 参考体素编号.
        voxel: u32,
        /// midpoint 空间体素索引.
        origin: Idx3d,
        /// 目标时间点.
        timepoint: Timepoint,
        /// 形变场给出的物理坐标.
        mm: [f64; 3],
        /// 取整后的体素索引. 坐标非有限时为 `None`.
        index: Option<RawIdx3d>,
        /// 目标体数据形状.
        shape: Idx3d,
    },

    /// 体数据维度不被支持.
    #[error("{}: unsupported volume shape {shape:?}", .path.display())]
    Dimensionality {
        /// 文件路径.
        path: PathBuf,
        /// 压缩单位维度之后的形状.
        shape: Vec<usize>,
    },

    /// 仿射矩阵不可逆.
    #[error("affine of {} is singular", .path.display())]
    SingularAffine {
        /// 文件路径.
        path: PathBuf,
    },

    /// 无法确定输出根目录.
    #[error("cannot determine output root directory, pass one explicitly or set $LONG_SUVR_ROOT")]
    UnknownRoot,

    /// 参考区域统计量无法用于归一化.
    #[error("reference value {0} cannot normalise uptake")]
    InvalidReference(f64),

    /// 稳健回归失败.
    #[error("robust fit failed: {0}")]
    Fit(#[from] FitError),

    /// nifti 读写失败.
    #[error("{}: {source}", .path.display())]
    Nifti {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        source: nifti::NiftiError,
    },

    /// CSV 读写失败.
    #[error("{}: {source}", .path.display())]
    Csv {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        source: csv::Error,
    },

    /// 文件系统读写失败.
    #[error("{}: {source}", .path.display())]
    Io {
        /// 文件或目录路径.
        path: PathBuf,
        /// 底层错误.
        source: std::io::Error,
    },
}

fn describe_index(index: &Option<RawIdx3d>) -> String {
    match index {
        Some(idx) => format!("rounds to index {idx:?}"),
        None => "has no voxel index".to_owned(),
    }
}

impl SuvrError {
    #[inline]
    pub(crate) fn nifti(path: impl Into<PathBuf>) -> impl FnOnce(nifti::NiftiError) -> Self {
        let path = path.into();
        move |source| Self::Nifti { path, source }
    }

    #[inline]
    pub(crate) fn csv(path: impl Into<PathBuf>) -> impl FnOnce(csv::Error) -> Self {
        let path = path.into();
        move |source| Self::Csv { path, source }
    }

    #[inline]
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    /// 是否是配置错误. 配置错误总是在处理任何体素之前抛出.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::UnknownRegion(_)
                | Self::MissingExternalMask(_)
                | Self::ShapeMismatch { .. }
                | Self::UnknownRoot
        )
    }
}

/// 本 crate 的结果类型.
pub type Result<T> = std::result::Result<T, SuvrError>;
