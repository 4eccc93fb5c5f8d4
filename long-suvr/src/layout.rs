//! 输出目录布局.
//!
//! ```text
//! <root>/sub-<id>/ses-{baseline,followup,midpoint}/{anat,pet}/
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::consts::ROOT_ENV;
use crate::error::{Result, SuvrError};
use crate::region::ReferenceRegion;
use crate::Timepoint;

const MIDPOINT: &str = "midpoint";

/// 获取输出根目录.
///
/// 1. 若环境变量 `$LONG_SUVR_ROOT` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/long_suvr`. 无法确定主目录时返回 `None`.
pub fn root_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(ROOT_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["long_suvr"]),
    }
}

/// 获取 `$HOME/dataset/...` 形式的路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 单个受试者, 单个参考区域的输出文件路径.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    subject: String,
    roi: ReferenceRegion,
}

impl OutputLayout {
    /// `subject` 可以带或不带 `sub-` 前缀.
    pub fn new<P: Into<PathBuf>>(root: P, subject: &str, roi: ReferenceRegion) -> Self {
        let id = subject.trim().trim_start_matches("sub-");
        Self {
            root: root.into(),
            subject: format!("sub-{id}"),
            roi,
        }
    }

    /// 带 `sub-` 前缀的受试者标签.
    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// 受试者目录 `<root>/sub-<id>`.
    #[inline]
    pub fn subject_dir(&self) -> PathBuf {
        self.root.join(&self.subject)
    }

    fn dir(&self, session: &str, kind: &str) -> PathBuf {
        self.subject_dir().join(format!("ses-{session}")).join(kind)
    }

    fn file(&self, session: &str, kind: &str, suffix: &str) -> PathBuf {
        self.dir(session, kind)
            .join(format!("{}_ses-{session}_{suffix}", self.subject))
    }

    /// 时间点的 `anat` 目录.
    #[inline]
    pub fn anat_dir(&self, tp: Timepoint) -> PathBuf {
        self.dir(tp.session(), "anat")
    }

    /// 时间点的 `pet` 目录.
    #[inline]
    pub fn pet_dir(&self, tp: Timepoint) -> PathBuf {
        self.dir(tp.session(), "pet")
    }

    /// PET 空间中的体素编号掩膜.
    pub fn pet_mask(&self, tp: Timepoint) -> PathBuf {
        self.file(tp.session(), "anat", &format!("PET_{}_mask.nii.gz", self.roi))
    }

    /// midpoint 空间中的参考区域编号掩膜.
    pub fn midpoint_mask(&self) -> PathBuf {
        self.file(MIDPOINT, "anat", &format!("T1w_{}_mask.nii.gz", self.roi))
    }

    /// 摄取值表.
    pub fn uptake_csv(&self) -> PathBuf {
        self.file(MIDPOINT, "pet", &format!("long_{}_pet_uptake.csv", self.roi))
    }

    fn uptake_sibling(&self, tag: &str) -> PathBuf {
        self.file(
            MIDPOINT,
            "pet",
            &format!("long_{}_pet_uptake_{tag}.csv", self.roi),
        )
    }

    /// 内点表.
    #[inline]
    pub fn inlier_csv(&self) -> PathBuf {
        self.uptake_sibling("nonzero")
    }

    /// 离群体素列表.
    #[inline]
    pub fn outlier_csv(&self) -> PathBuf {
        self.uptake_sibling("outlier_vox_list")
    }

    /// 内点描述统计量.
    #[inline]
    pub fn stats_csv(&self) -> PathBuf {
        self.uptake_sibling("descriptive_stats")
    }

    /// PET 空间中的离群掩膜.
    pub fn outlier_mask(&self, tp: Timepoint, alpha: f64) -> PathBuf {
        self.file(
            tp.session(),
            "anat",
            &format!("PET_{}_outlier_mask_alpha-{alpha}_.nii.gz", self.roi),
        )
    }

    /// SUVR 图像.
    pub fn suvr_image(&self, tp: Timepoint) -> PathBuf {
        self.file(tp.session(), "pet", &format!("PET_{}_suvr.nii.gz", self.roi))
    }

    /// 创建全部输出目录.
    pub fn create_dirs(&self) -> Result<()> {
        let dirs = [
            self.anat_dir(Timepoint::Baseline),
            self.pet_dir(Timepoint::Baseline),
            self.anat_dir(Timepoint::Followup),
            self.pet_dir(Timepoint::Followup),
            self.dir(MIDPOINT, "anat"),
            self.dir(MIDPOINT, "pet"),
        ];
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(SuvrError::io(dir))?;
        }
        Ok(())
    }
}
