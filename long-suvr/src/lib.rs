#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供纵向 (baseline/follow-up 两个时间点) PET 的参考区域体素映射,
//! 以及基于稳健回归的离群体素剔除.
//!
//! 整个流程是严格线性的:
//!
//! 1. **参考区域构建** (`region`): 从 midpoint 空间的 GIF 分区按标签集合选取,
//!   或直接使用外部提供的掩膜. 选中的体素按行优先序编号为 `1..=N`.
//! 2. **体素对应映射** (`mapping`): 借助两个形变场 (midpoint -> baseline PET,
//!   midpoint -> follow-up PET), 把每个参考体素映射到两个 PET 体素上.
//!   任一目标体素只能被编号最小的参考体素占用.
//! 3. **摄取值提取** (`uptake`): 在映射结果上做最近邻采样, 得到
//!   `(voxel_number, baseline_uptake, followup_uptake)` 表.
//! 4. **离群值筛选** (`robust`): 以 LTS 拟合 follow-up 对 baseline 的直线,
//!   标记离群体素, 在内点上计算描述统计量并生成两个 PET 空间下的离群掩膜.
//!
//! 外加 `suvr` 模块使用内点统计量做归一化, `pipeline` 模块负责读写文件.
//!
//! # 注意
//!
//! 1. 配准, PVC 等步骤由外部工具完成, 本 crate 只消费它们产出的 nifti 文件.
//! 2. 体素坐标 `(i, j, k)` 与 nifti 文件中的存储轴顺序一致, 未做任何转置.
//! 3. 物理坐标取整规则为 "四舍五入, 平局远离零" (即 [`f64::round`]).

/// 三维体素索引 `(i, j, k)`.
pub type Idx3d = (usize, usize, usize);

/// 未做越界检查的三维体素索引, 可能为负.
pub type RawIdx3d = [i64; 3];

/// 纵向研究的两个 PET 时间点.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Timepoint {
    /// 基线扫描.
    Baseline,

    /// 随访扫描.
    Followup,
}

impl Timepoint {
    /// 在文件名中使用的会话名.
    #[inline]
    pub const fn session(&self) -> &'static str {
        match self {
            Timepoint::Baseline => "baseline",
            Timepoint::Followup => "followup",
        }
    }
}

impl std::fmt::Display for Timepoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.session())
    }
}

/// nifti 体数据与坐标变换.
mod data;

pub use data::{
    Affine, DeformationField, LabelVolume, MaskVolume, NiftiVolumeAttr, NiftiWrite, PetScan,
    Volume,
};

pub mod consts;

mod error;

pub use error::{Result, SuvrError};

pub mod region;

pub mod mapping;

pub mod uptake;

pub mod robust;

pub mod suvr;

pub mod layout;

pub mod pipeline;

pub mod prelude;
