//! 体素对应映射.
//!
//! 对每个编号为 `n` 的参考体素, 借助两个形变场分别求出它在 baseline PET
//! 与 follow-up PET 中的体素索引 `B` 与 `F`. 按编号升序处理,
//! 只有 `B` 与 `F` 都未被更早的体素占用时才保留 `n`, 因此目标体素在每个时间点
//! 至多出现一次.

use log::info;

use crate::error::{Result, SuvrError};
use crate::region::{check_same_grid, RegionMask};
use crate::{DeformationField, Idx3d, LabelVolume, NiftiVolumeAttr, PetScan, Timepoint};

mod dedup;

use dedup::Dedup;

/// 一条保留下来的体素对应关系.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Correspondence {
    /// 参考体素编号, 从 1 开始.
    pub voxel: u32,

    /// midpoint 空间中的体素索引.
    pub source: Idx3d,

    /// baseline PET 中的体素索引.
    pub baseline: Idx3d,

    /// follow-up PET 中的体素索引.
    pub followup: Idx3d,
}

/// 被拒绝的参考体素与更早占用目标体素的编号.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Collision {
    /// 只有 baseline 目标体素已被占用.
    Baseline {
        /// 占用者编号.
        owner: u32,
    },

    /// 只有 follow-up 目标体素已被占用.
    Followup {
        /// 占用者编号.
        owner: u32,
    },

    /// 两个目标体素都已被占用. 当两者属于同一占用者时, 即整个体素对重复.
    Both {
        /// baseline 占用者编号.
        baseline: u32,
        /// follow-up 占用者编号.
        followup: u32,
    },
}

impl Collision {
    /// 是否是与同一个更早体素完全相同的体素对.
    #[inline]
    pub fn is_duplicate_pair(&self) -> bool {
        matches!(self, Self::Both { baseline, followup } if baseline == followup)
    }
}

/// 一个映射目标: 形变场 (midpoint -> PET 物理空间) 与该时间点的 PET 体数据.
#[derive(Copy, Clone, Debug)]
pub struct MappingTarget<'a> {
    /// midpoint 网格上的形变场.
    pub field: &'a DeformationField,

    /// 目标 PET.
    pub pet: &'a PetScan,
}

impl<'a> MappingTarget<'a> {
    /// 组合形变场和 PET.
    #[inline]
    pub fn new(field: &'a DeformationField, pet: &'a PetScan) -> Self {
        Self { field, pet }
    }

    /// 求参考体素 `voxel` (位于 midpoint 索引 `source`) 在目标 PET 中的体素索引.
    ///
    /// 取整后越界即报错, 从不截断到网格内. 形变场中的 NaN (配准填充值) 同样报错.
    fn locate(&self, voxel: u32, source: Idx3d, timepoint: Timepoint) -> Result<Idx3d> {
        let mm = self.field.mm_at(source);
        let index = self.pet.mm_to_voxel(mm);
        index
            .and_then(|idx| self.pet.checked_index(idx))
            .ok_or_else(|| SuvrError::OutOfBounds {
                voxel,
                origin: source,
                timepoint,
                mm,
                index,
                shape: self.pet.shape(),
            })
    }
}

/// 去重后的对应关系表, 以及两个 PET 空间中的体素编号掩膜.
#[derive(Debug, Clone)]
pub struct CorrespondenceTable {
    records: Vec<Correspondence>,
    bl_mask: LabelVolume,
    fu_mask: LabelVolume,
    rejected: Vec<(u32, Collision)>,
}

impl CorrespondenceTable {
    /// 按编号升序排列的保留记录.
    #[inline]
    pub fn records(&self) -> &[Correspondence] {
        &self.records
    }

    /// baseline PET 网格上的编号掩膜: `bl_mask[B] = n`.
    #[inline]
    pub fn bl_mask(&self) -> &LabelVolume {
        &self.bl_mask
    }

    /// follow-up PET 网格上的编号掩膜: `fu_mask[F] = n`.
    #[inline]
    pub fn fu_mask(&self) -> &LabelVolume {
        &self.fu_mask
    }

    /// 指定时间点的编号掩膜.
    #[inline]
    pub fn mask(&self, timepoint: Timepoint) -> &LabelVolume {
        match timepoint {
            Timepoint::Baseline => &self.bl_mask,
            Timepoint::Followup => &self.fu_mask,
        }
    }

    /// 被拒绝的参考体素编号与冲突原因, 按编号升序.
    #[inline]
    pub fn rejected(&self) -> &[(u32, Collision)] {
        &self.rejected
    }

    /// 保留的记录个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 是否没有任何保留记录.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn check_fields(region: &RegionMask, baseline: &MappingTarget, followup: &MappingTarget) -> Result<()> {
    check_same_grid("baseline deformation field", region.volume(), baseline.field)?;
    check_same_grid("follow-up deformation field", region.volume(), followup.field)
}

fn summarize(table: &CorrespondenceTable, total: usize) {
    info!(
        "Voxel mapping: {} of {total} reference voxels retained, {} rejected",
        table.len(),
        table.rejected.len()
    );
}

/// 顺序执行体素对应映射.
///
/// 任一坐标越界即终止并返回 [`SuvrError::OutOfBounds`].
pub fn map_voxels(
    region: &RegionMask,
    baseline: MappingTarget,
    followup: MappingTarget,
) -> Result<CorrespondenceTable> {
    check_fields(region, &baseline, &followup)?;
    let mut dedup = Dedup::new(baseline.pet, followup.pet, region.len());
    for (voxel, source) in region.iter() {
        let b = baseline.locate(voxel, source, Timepoint::Baseline)?;
        let f = followup.locate(voxel, source, Timepoint::Followup)?;
        dedup.offer(voxel, source, b, f);
    }
    let table = dedup.finish();
    summarize(&table, region.len());
    Ok(table)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        /// 并行执行体素对应映射.
        ///
        /// 目标索引并行计算, 去重仍按编号升序串行决定, 因此结果与 [`map_voxels`] 完全一致.
        /// 若有多个越界体素, 返回编号最小者的错误.
        pub fn par_map_voxels(
            region: &RegionMask,
            baseline: MappingTarget,
            followup: MappingTarget,
        ) -> Result<CorrespondenceTable> {
            check_fields(region, &baseline, &followup)?;
            let located: Vec<Result<(Idx3d, Idx3d)>> = region
                .positions()
                .par_iter()
                .enumerate()
                .map(|(i, &source)| {
                    let voxel = i as u32 + 1;
                    let b = baseline.locate(voxel, source, Timepoint::Baseline)?;
                    let f = followup.locate(voxel, source, Timepoint::Followup)?;
                    Ok((b, f))
                })
                .collect();

            let mut dedup = Dedup::new(baseline.pet, followup.pet, region.len());
            for ((voxel, source), loc) in region.iter().zip(located) {
                let (b, f) = loc?;
                dedup.offer(voxel, source, b, f);
            }
            let table = dedup.finish();
            summarize(&table, region.len());
            Ok(table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{build_region, ReferenceRegion};
    use crate::Affine;
    use ndarray::Array3;
    use std::collections::HashSet;

    fn identity_field(shape: Idx3d) -> DeformationField {
        DeformationField::from_fn(shape, Affine::identity(), |(i, j, k)| {
            [i as f64, j as f64, k as f64]
        })
    }

    fn pet(shape: Idx3d, scale: f32) -> PetScan {
        PetScan::fake(
            Array3::from_shape_fn(shape, |(i, j, k)| scale * (100 * i + 10 * j + k) as f32),
            Affine::identity(),
        )
    }

    fn region_all(shape: Idx3d) -> RegionMask {
        let par = LabelVolume::fake(Array3::from_elem(shape, 39), Affine::identity());
        build_region(ReferenceRegion::Cereb, &par, None).unwrap()
    }

    fn small_region() -> RegionMask {
        let mut data = Array3::<i32>::zeros((3, 3, 3));
        for pos in [(0, 0, 1), (0, 2, 2), (1, 1, 0), (2, 0, 2)] {
            data[pos] = 39;
        }
        let par = LabelVolume::fake(data, Affine::identity());
        build_region(ReferenceRegion::Cereb, &par, None).unwrap()
    }

    #[test]
    fn test_identity_mapping() {
        let region = small_region();
        let field = identity_field((3, 3, 3));
        let (bl, fu) = (pet((3, 3, 3), 1.0), pet((3, 3, 3), 2.0));
        let table = map_voxels(
            &region,
            MappingTarget::new(&field, &bl),
            MappingTarget::new(&field, &fu),
        )
        .unwrap();

        assert_eq!(table.len(), 4);
        assert!(table.rejected().is_empty());
        for (rec, (n, pos)) in table.records().iter().zip(region.iter()) {
            assert_eq!(rec.voxel, n);
            assert_eq!(rec.source, pos);
            assert_eq!(rec.baseline, pos);
            assert_eq!(rec.followup, pos);
            assert_eq!(table.bl_mask()[pos], n as i32);
            assert_eq!(table.fu_mask()[pos], n as i32);
        }
        assert_eq!(table.bl_mask().count_nonzero(), 4);
        assert_eq!(table.mask(Timepoint::Followup).count_nonzero(), 4);
    }

    /// 2x2x2 区域中编号 3 与 7 的体素都映射到 baseline 的 (10, 10, 10).
    #[test]
    fn test_earliest_voxel_wins() {
        let region = region_all((2, 2, 2));
        let number = |(i, j, k): Idx3d| (i * 4 + j * 2 + k + 1) as f64;
        let to_bl = DeformationField::from_fn((2, 2, 2), Affine::identity(), |pos| {
            match number(pos) as u32 {
                3 | 7 => [10.0, 10.0, 10.0],
                n => [n as f64, 0.0, 0.0],
            }
        });
        let to_fu = DeformationField::from_fn((2, 2, 2), Affine::identity(), |pos| {
            [0.0, number(pos), 0.0]
        });
        let (bl, fu) = (pet((16, 16, 16), 1.0), pet((16, 16, 16), 1.0));
        let table = map_voxels(
            &region,
            MappingTarget::new(&to_bl, &bl),
            MappingTarget::new(&to_fu, &fu),
        )
        .unwrap();

        assert_eq!(table.len(), 7);
        assert_eq!(table.rejected(), &[(7, Collision::Baseline { owner: 3 })]);
        assert!(table.records().iter().all(|r| r.voxel != 7));
        assert_eq!(table.bl_mask()[(10, 10, 10)], 3);
        assert_eq!(table.fu_mask()[(0, 3, 0)], 3);
        assert_eq!(table.fu_mask()[(0, 7, 0)], 0);
    }

    #[test]
    fn test_duplicate_pair() {
        let region = region_all((1, 1, 3));
        let field = DeformationField::from_fn((1, 1, 3), Affine::identity(), |_| [2.0, 2.0, 2.0]);
        let p = pet((4, 4, 4), 1.0);
        let table = map_voxels(
            &region,
            MappingTarget::new(&field, &p),
            MappingTarget::new(&field, &p),
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rejected().len(), 2);
        assert!(table.rejected().iter().all(|(_, c)| c.is_duplicate_pair()));
    }

    #[test]
    fn test_out_of_bounds() {
        let region = small_region();
        let field = DeformationField::from_fn((3, 3, 3), Affine::identity(), |(i, j, k)| {
            if (i, j, k) == (0, 0, 1) {
                [-1.0, 0.0, 0.0]
            } else {
                [i as f64, j as f64, k as f64]
            }
        });
        let good = identity_field((3, 3, 3));
        let p = pet((3, 3, 3), 1.0);
        let err = map_voxels(
            &region,
            MappingTarget::new(&good, &p),
            MappingTarget::new(&field, &p),
        )
        .unwrap_err();
        match err {
            SuvrError::OutOfBounds {
                voxel,
                timepoint,
                index,
                mm,
                ..
            } => {
                assert_eq!(voxel, 1);
                assert_eq!(timepoint, Timepoint::Followup);
                assert_eq!(index, Some([-1, 0, 0]));
                assert_eq!(mm, [-1.0, 0.0, 0.0]);
            }
            e => panic!("unexpected error: {e}"),
        }

        // 恰好在 -0.5 处远离零取整为 -1, 同样越界.
        let field = DeformationField::from_fn((3, 3, 3), Affine::identity(), |_| [0.0, -0.5, 0.0]);
        let err = map_voxels(
            &region,
            MappingTarget::new(&field, &p),
            MappingTarget::new(&good, &p),
        )
        .unwrap_err();
        assert!(matches!(err, SuvrError::OutOfBounds { index: Some([0, -1, 0]), .. }));
    }

    /// 形变场的 NaN 填充不能被当作体素 (0, 0, 0).
    #[test]
    fn test_nan_coordinate() {
        let region = small_region();
        let field = DeformationField::from_fn((3, 3, 3), Affine::identity(), |(i, j, k)| {
            if (i, j, k) == (1, 1, 0) {
                [f64::NAN; 3]
            } else {
                [i as f64, j as f64, k as f64]
            }
        });
        let good = identity_field((3, 3, 3));
        let p = pet((3, 3, 3), 1.0);
        let err = map_voxels(
            &region,
            MappingTarget::new(&field, &p),
            MappingTarget::new(&good, &p),
        )
        .unwrap_err();
        match &err {
            SuvrError::OutOfBounds {
                voxel,
                origin,
                timepoint,
                mm,
                index,
                ..
            } => {
                assert_eq!(*voxel, 3);
                assert_eq!(*origin, (1, 1, 0));
                assert_eq!(*timepoint, Timepoint::Baseline);
                assert!(mm.iter().all(|v| v.is_nan()));
                assert_eq!(*index, None);
            }
            e => panic!("unexpected error: {e}"),
        }
        assert!(err.to_string().contains("has no voxel index"));
        assert!(!err.is_config());
    }

    #[test]
    fn test_field_shape_mismatch() {
        let region = small_region();
        let field = identity_field((3, 3, 2));
        let good = identity_field((3, 3, 3));
        let p = pet((3, 3, 3), 1.0);
        let err = map_voxels(
            &region,
            MappingTarget::new(&good, &p),
            MappingTarget::new(&field, &p),
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    /// 多对一的形变场: 检查单射性, 覆盖上界与确定性.
    fn crowded() -> (RegionMask, DeformationField, DeformationField, PetScan, PetScan) {
        let shape = (6, 5, 4);
        let region = region_all(shape);
        let to_bl = DeformationField::from_fn(shape, Affine::identity(), |(i, j, k)| {
            [(i / 2) as f64 + 0.3, ((j * 3 + k) % 5) as f64, (k / 2) as f64 - 0.2]
        });
        let to_fu = DeformationField::from_fn(shape, Affine::identity(), |(i, j, k)| {
            [((i + j) % 4) as f64, (k % 3) as f64 + 0.49, (i * j % 3) as f64]
        });
        (region, to_bl, to_fu, pet((8, 8, 8), 1.0), pet((8, 8, 8), 2.0))
    }

    #[test]
    fn test_injective_and_deterministic() {
        let (region, to_bl, to_fu, bl, fu) = crowded();
        let run = || {
            map_voxels(
                &region,
                MappingTarget::new(&to_bl, &bl),
                MappingTarget::new(&to_fu, &fu),
            )
            .unwrap()
        };
        let table = run();
        assert!(table.len() <= region.len());
        assert_eq!(table.len() + table.rejected().len(), region.len());

        let bs: HashSet<_> = table.records().iter().map(|r| r.baseline).collect();
        let fs: HashSet<_> = table.records().iter().map(|r| r.followup).collect();
        assert_eq!(bs.len(), table.len());
        assert_eq!(fs.len(), table.len());
        assert_eq!(table.bl_mask().count_nonzero(), table.len());
        assert_eq!(table.fu_mask().count_nonzero(), table.len());
        assert!(table.records().windows(2).all(|w| w[0].voxel < w[1].voxel));

        // 被拒绝的体素的冲突对象必然更早且被保留.
        for (n, c) in table.rejected() {
            let owners = match *c {
                Collision::Baseline { owner } | Collision::Followup { owner } => vec![owner],
                Collision::Both { baseline, followup } => vec![baseline, followup],
            };
            for o in owners {
                assert!(o < *n);
                assert!(table.records().iter().any(|r| r.voxel == o));
            }
        }

        let again = run();
        assert_eq!(table.records(), again.records());
        assert_eq!(table.rejected(), again.rejected());
        assert_eq!(table.bl_mask().data(), again.bl_mask().data());
        assert_eq!(table.fu_mask().data(), again.fu_mask().data());
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_matches_sequential() {
        let (region, to_bl, to_fu, bl, fu) = crowded();
        let seq = map_voxels(
            &region,
            MappingTarget::new(&to_bl, &bl),
            MappingTarget::new(&to_fu, &fu),
        )
        .unwrap();
        let par = par_map_voxels(
            &region,
            MappingTarget::new(&to_bl, &bl),
            MappingTarget::new(&to_fu, &fu),
        )
        .unwrap();
        assert_eq!(seq.records(), par.records());
        assert_eq!(seq.rejected(), par.rejected());
        assert_eq!(seq.bl_mask().data(), par.bl_mask().data());
        assert_eq!(seq.fu_mask().data(), par.fu_mask().data());
    }
}
