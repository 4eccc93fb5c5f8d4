//! 参考区域构建.
//!
//! 参考区域可以由 midpoint 空间 GIF 分区的标签集合给出, 也可以直接由外部掩膜给出.
//! 选中的体素按行优先扫描顺序 (`i` 最慢, `k` 最快) 编号为 `1..=N`.

use std::fmt;
use std::str::FromStr;

use log::info;

use crate::consts::labels;
use crate::error::{Result, SuvrError};
use crate::{Idx3d, LabelVolume, NiftiVolumeAttr, PetScan};

/// 已知的参考区域.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceRegion {
    /// 整个小脑.
    Cereb,

    /// 小脑灰质.
    GmCereb,

    /// 脑桥.
    Pons,

    /// 皮层下白质.
    WmSubcort,

    /// GIF v3 皮层下白质.
    WmSubcortGif3,

    /// 经过清洗的小脑灰质, 只能由外部掩膜给出.
    GmCerebClean,
}

impl ReferenceRegion {
    /// 全部已知区域.
    pub const ALL: [ReferenceRegion; 6] = [
        Self::Cereb,
        Self::GmCereb,
        Self::Pons,
        Self::WmSubcort,
        Self::WmSubcortGif3,
        Self::GmCerebClean,
    ];

    /// 区域名, 同时用于输出文件名.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cereb => "cereb",
            Self::GmCereb => "gm-cereb",
            Self::Pons => "pons",
            Self::WmSubcort => "wm-subcort",
            Self::WmSubcortGif3 => "wm-subcort-gif3",
            Self::GmCerebClean => "gm-cereb-clean",
        }
    }

    /// 区域对应的 GIF 标签集合. 外部掩膜区域返回 `None`.
    pub const fn labels(&self) -> Option<&'static [i32]> {
        match self {
            Self::Cereb => Some(&labels::CEREB),
            Self::GmCereb => Some(&labels::GM_CEREB),
            Self::Pons => Some(&labels::PONS),
            Self::WmSubcort => Some(&labels::WM_SUBCORT),
            Self::WmSubcortGif3 => Some(&labels::WM_SUBCORT_GIF3),
            Self::GmCerebClean => None,
        }
    }

    /// 是否必须由外部掩膜给出.
    #[inline]
    pub const fn needs_external_mask(&self) -> bool {
        self.labels().is_none()
    }
}

impl fmt::Display for ReferenceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReferenceRegion {
    type Err = SuvrError;

    /// 不区分大小写, `-` 与 `_` 等价.
    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|r| r.name() == norm)
            .ok_or_else(|| SuvrError::UnknownRegion(s.to_owned()))
    }
}

/// 编号后的参考区域.
#[derive(Debug, Clone)]
pub struct RegionMask {
    volume: LabelVolume,
    positions: Vec<Idx3d>,
}

impl RegionMask {
    /// 编号体数据: 选中体素为 `1..=N`, 其余为 0.
    #[inline]
    pub fn volume(&self) -> &LabelVolume {
        &self.volume
    }

    /// 区域体素个数 `N`.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// 区域是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// 编号为 `n` 的体素位置. `n` 从 1 开始.
    #[inline]
    pub fn position(&self, n: u32) -> Option<Idx3d> {
        (n as usize)
            .checked_sub(1)
            .and_then(|i| self.positions.get(i).copied())
    }

    /// 按编号升序排列的体素位置, 第 `n - 1` 个元素对应编号 `n`.
    #[inline]
    pub fn positions(&self) -> &[Idx3d] {
        &self.positions
    }

    /// 按编号升序迭代 `(n, 位置)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Idx3d)> + '_ {
        (1u32..).zip(self.positions.iter().copied())
    }

    fn from_selected(template: &LabelVolume, positions: Vec<Idx3d>) -> Self {
        let mut volume = template.filled_like(labels::BACKGROUND);
        for (n, &pos) in (1i32..).zip(positions.iter()) {
            volume[pos] = n;
        }
        Self { volume, positions }
    }
}

/// 构建参考区域.
///
/// 标签集合区域从 `par` 中选取, 外部掩膜区域使用 `external` 中的所有非零体素.
/// 若二者都可用, 外部掩膜优先. 外部掩膜形状必须与 `par` 一致.
pub fn build_region(
    region: ReferenceRegion,
    par: &LabelVolume,
    external: Option<&PetScan>,
) -> Result<RegionMask> {
    let positions = match (external, region.labels()) {
        (Some(mask), _) => {
            check_same_grid("reference mask", par, mask)?;
            mask.filter_pos(|v| *v != 0.0)
        }
        (None, Some(set)) => par.filter_pos(|v| set.contains(v)),
        (None, None) => return Err(SuvrError::MissingExternalMask(region.name())),
    };
    info!(
        "Reference region `{region}`: {} voxels, {:.1} mm^3",
        positions.len(),
        positions.len() as f64 * par.voxel()
    );
    Ok(RegionMask::from_selected(par, positions))
}

/// 用若干脑掩膜清洗分区: 只有在所有掩膜都非零处, 标签才会保留.
pub fn clean_parcellation(par: &LabelVolume, masks: &[&PetScan]) -> Result<LabelVolume> {
    for mask in masks {
        check_same_grid("brain mask", par, *mask)?;
    }
    let mut out = par.clone();
    let mut dropped = 0usize;
    for (pos, v) in out.data_mut().indexed_iter_mut() {
        if *v != labels::BACKGROUND && masks.iter().any(|m| m[pos] == 0.0) {
            *v = labels::BACKGROUND;
            dropped += 1;
        }
    }
    info!(
        "Parcellation cleaned with {} mask(s): {dropped} labelled voxels dropped, {} kept",
        masks.len(),
        out.count_nonzero()
    );
    Ok(out)
}

pub(crate) fn check_same_grid<A, B>(what: &'static str, expected: &A, found: &B) -> Result<()>
where
    A: NiftiVolumeAttr + ?Sized,
    B: NiftiVolumeAttr + ?Sized,
{
    let (e, f) = (expected.shape(), found.shape());
    if e == f {
        Ok(())
    } else {
        Err(SuvrError::ShapeMismatch {
            what,
            expected: vec![e.0, e.1, e.2],
            found: vec![f.0, f.1, f.2],
        })
    }
}
