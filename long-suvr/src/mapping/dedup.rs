//! 目标体素去重: 编号最小者优先.

use std::collections::HashMap;

use log::debug;

use super::{Collision, Correspondence, CorrespondenceTable};
use crate::{Idx3d, PetScan};

/// 按编号升序接收候选对应关系, 决定保留与否并同步填写编号掩膜.
///
/// 保留的体素对必然由两个未被占用的目标体素组成, 因此 "体素对重复"
/// 的判定蕴含于两侧的占用判定之中.
pub(super) struct Dedup {
    bl_owner: HashMap<Idx3d, u32>,
    fu_owner: HashMap<Idx3d, u32>,
    table: CorrespondenceTable,
}

impl Dedup {
    pub fn new(bl_pet: &PetScan, fu_pet: &PetScan, capacity: usize) -> Self {
        Self {
            bl_owner: HashMap::with_capacity(capacity),
            fu_owner: HashMap::with_capacity(capacity),
            table: CorrespondenceTable {
                records: Vec::with_capacity(capacity),
                bl_mask: bl_pet.filled_like(0),
                fu_mask: fu_pet.filled_like(0),
                rejected: Vec::new(),
            },
        }
    }

    /// 处理编号为 `voxel` 的候选. 调用方保证编号严格递增.
    pub fn offer(&mut self, voxel: u32, source: Idx3d, baseline: Idx3d, followup: Idx3d) {
        debug_assert!(self
            .table
            .records
            .last()
            .map_or(true, |r| r.voxel < voxel));

        let collision = match (
            self.bl_owner.get(&baseline).copied(),
            self.fu_owner.get(&followup).copied(),
        ) {
            (None, None) => None,
            (Some(owner), None) => Some(Collision::Baseline { owner }),
            (None, Some(owner)) => Some(Collision::Followup { owner }),
            (Some(b), Some(f)) => Some(Collision::Both {
                baseline: b,
                followup: f,
            }),
        };

        if let Some(c) = collision {
            debug!("Voxel {voxel} at {source:?} rejected: B={baseline:?} F={followup:?} {c:?}");
            self.table.rejected.push((voxel, c));
            return;
        }

        self.bl_owner.insert(baseline, voxel);
        self.fu_owner.insert(followup, voxel);
        self.table.bl_mask[baseline] = voxel as i32;
        self.table.fu_mask[followup] = voxel as i32;
        self.table.records.push(Correspondence {
            voxel,
            source,
            baseline,
            followup,
        });
    }

    #[inline]
    pub fn finish(self) -> CorrespondenceTable {
        self.table
    }
}
