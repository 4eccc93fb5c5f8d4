//! 体素索引空间与物理 (毫米) 空间之间的仿射变换.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use nifti::NiftiHeader;
use num::ToPrimitive;

use crate::{Idx3d, RawIdx3d};

/// 体数据的仿射矩阵, 将体素索引 `(i, j, k)` 映射到物理坐标 `(x, y, z)` (mm).
///
/// 该结构在构造时即求好逆矩阵, 因此不可逆的矩阵无法构造出实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine {
    fwd: Matrix4<f64>,
    inv: Matrix4<f64>,
}

impl Affine {
    /// 从 4x4 齐次矩阵构造. 最后一行会被强制视作 `[0, 0, 0, 1]`.
    ///
    /// 线性部分不可逆时返回 `None`.
    pub fn new(m: Matrix4<f64>) -> Option<Self> {
        let linear: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let t: Vector3<f64> = m.fixed_view::<3, 1>(0, 3).into_owned();
        Self::from_parts(linear, t)
    }

    /// 由线性部分 `linear` 和平移部分 `t` 构造.
    pub fn from_parts(linear: Matrix3<f64>, t: Vector3<f64>) -> Option<Self> {
        if !linear.iter().chain(t.iter()).all(|v| v.is_finite()) {
            return None;
        }
        let linear_inv = linear.try_inverse()?;
        let t_inv = -(linear_inv * t);

        let mut fwd = Matrix4::identity();
        fwd.fixed_view_mut::<3, 3>(0, 0).copy_from(&linear);
        fwd.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);

        let mut inv = Matrix4::identity();
        inv.fixed_view_mut::<3, 3>(0, 0).copy_from(&linear_inv);
        inv.fixed_view_mut::<3, 1>(0, 3).copy_from(&t_inv);

        Some(Self { fwd, inv })
    }

    /// 对角缩放 + 平移.
    #[inline]
    pub fn from_scale_offset(scale: [f64; 3], offset: [f64; 3]) -> Option<Self> {
        Self::from_parts(
            Matrix3::from_diagonal(&Vector3::from(scale)),
            Vector3::from(offset),
        )
    }

    /// 单位变换.
    #[inline]
    pub fn identity() -> Self {
        Self {
            fwd: Matrix4::identity(),
            inv: Matrix4::identity(),
        }
    }

    /// 按照 NIfTI-1 规范从 header 中求仿射矩阵:
    ///
    /// 1. `sform_code > 0` 时使用 `srow_{x,y,z}`;
    /// 2. 否则 `qform_code > 0` 时使用四元数, `qoffset_*` 与 `pixdim`;
    /// 3. 否则退化为 `diag(pixdim[1..=3])`, 平移为零.
    ///
    /// 第 3 种情况与 nibabel 的 `img.affine` 不同: nibabel 此时使用以网格中心为原点,
    /// 且 x 轴翻转的基础仿射矩阵. 两个时间点的 PET 与形变场通常都带有 sform,
    /// 因此实际数据很少走到这一分支.
    ///
    /// 矩阵不可逆时返回 `None`.
    pub fn from_header(h: &NiftiHeader) -> Option<Self> {
        if h.sform_code > 0 {
            let rows = [h.srow_x, h.srow_y, h.srow_z];
            let mut m = Matrix4::identity();
            for (r, row) in rows.iter().enumerate() {
                for (c, v) in row.iter().enumerate() {
                    m[(r, c)] = *v as f64;
                }
            }
            Self::new(m)
        } else if h.qform_code > 0 {
            let (b, c, d) = (
                h.quatern_b as f64,
                h.quatern_c as f64,
                h.quatern_d as f64,
            );
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            #[rustfmt::skip]
            let rot = Matrix3::new(
                a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d),         2.0 * (b * d + a * c),
                2.0 * (b * c + a * d),         a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b),
                2.0 * (b * d - a * c),         2.0 * (c * d + a * b),         a * a + d * d - b * b - c * c,
            );
            let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let [_, px, py, pz, ..] = h.pixdim;
            let zoom = Matrix3::from_diagonal(&Vector3::new(
                px as f64,
                py as f64,
                qfac * pz as f64,
            ));
            let t = Vector3::new(
                h.quatern_x as f64,
                h.quatern_y as f64,
                h.quatern_z as f64,
            );
            Self::from_parts(rot * zoom, t)
        } else {
            let [_, px, py, pz, ..] = h.pixdim;
            Self::from_scale_offset([px as f64, py as f64, pz as f64], [0.0; 3])
        }
    }

    /// 正向 4x4 齐次矩阵.
    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.fwd
    }

    /// 体素索引 -> 物理坐标 (mm).
    #[inline]
    pub fn voxel_to_mm(&self, (i, j, k): Idx3d) -> [f64; 3] {
        self.voxel_to_mm_f([i as f64, j as f64, k as f64])
    }

    /// 连续体素坐标 -> 物理坐标 (mm).
    #[inline]
    pub fn voxel_to_mm_f(&self, [i, j, k]: [f64; 3]) -> [f64; 3] {
        let v = self.fwd * Vector4::new(i, j, k, 1.0);
        [v.x, v.y, v.z]
    }

    /// 物理坐标 (mm) -> 连续体素坐标, 不取整.
    #[inline]
    pub fn mm_to_voxel_f(&self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let v = self.inv * Vector4::new(x, y, z, 1.0);
        [v.x, v.y, v.z]
    }

    /// 物理坐标 (mm) -> 体素索引.
    ///
    /// 每个分量取最近整数, 恰好落在 `.5` 上时远离零取整. 不做越界检查,
    /// 结果可能为负或超出目标体数据, 由调用方负责检查.
    ///
    /// 任一分量为 NaN, 无穷或超出 `i64` 范围时返回 `None`.
    #[inline]
    pub fn mm_to_voxel(&self, mm: [f64; 3]) -> Option<RawIdx3d> {
        let [i, j, k] = self.mm_to_voxel_f(mm).map(f64::round);
        Some([i.to_i64()?, j.to_i64()?, k.to_i64()?])
    }
}
