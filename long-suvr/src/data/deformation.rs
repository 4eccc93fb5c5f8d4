//! 形变场.

use std::path::Path;

use ndarray::{Array4, Axis, Ix4};
use nifti::writer::WriterOptions;
use nifti::NiftiHeader;

use super::{fake_header, read_squeezed_f64, Affine, BoxedHeader, NiftiVolumeAttr, NiftiWrite};
use crate::error::{Result, SuvrError};
use crate::Idx3d;

/// 从源网格 (midpoint 空间) 到目标体数据物理空间的形变场.
///
/// 形状为 `(X, Y, Z, 3)`: 在源网格每个体素上保存目标空间中对应点的物理坐标 (mm).
/// 该结构由外部配准工具产出, 加载后只读.
#[derive(Debug, Clone)]
pub struct DeformationField {
    header: BoxedHeader,
    affine: Affine,
    data: Array4<f64>,
}

impl NiftiVolumeAttr for DeformationField {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn affine(&self) -> &Affine {
        &self.affine
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        let (x, y, z, _) = self.data.dim();
        (x, y, z)
    }
}

impl DeformationField {
    /// 打开 nii 文件格式的形变场. 接受 `(X, Y, Z, 3)` 或 `(X, Y, Z, 1, 3)` 形状.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (header, affine, data) = read_squeezed_f64(path)?;
        let shape = data.shape().to_vec();
        let bad_shape = || SuvrError::Dimensionality {
            path: path.to_owned(),
            shape: shape.clone(),
        };
        let data = data.into_dimensionality::<Ix4>().map_err(|_| bad_shape())?;
        if data.len_of(Axis(3)) != 3 {
            return Err(bad_shape());
        }
        Ok(Self {
            header,
            affine,
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// 直接由坐标数据和源网格仿射矩阵创建形变场.
    ///
    /// `data` 的最后一维长度必须为 3, 否则程序 panic.
    pub fn fake(data: Array4<f64>, affine: Affine) -> Self {
        assert_eq!(data.len_of(Axis(3)), 3, "形变场最后一维必须是 (x, y, z)");
        let header = fake_header(data.shape(), &affine);
        let affine = Affine::from_header(&header).unwrap_or(affine);
        Self {
            header,
            affine,
            data,
        }
    }

    /// 由函数 `f` 在 `shape` 网格上生成形变场, `f` 返回每个源体素对应的目标物理坐标.
    pub fn from_fn<F: FnMut(Idx3d) -> [f64; 3]>(shape: Idx3d, affine: Affine, mut f: F) -> Self {
        let (x, y, z) = shape;
        let mut data = Array4::zeros((x, y, z, 3));
        for ((i, j, k), mut lane) in ndarray::indices((x, y, z))
            .into_iter()
            .zip(data.lanes_mut(Axis(3)))
        {
            let mm = f((i, j, k));
            lane.assign(&ndarray::aview1(&mm));
        }
        Self::fake(data, affine)
    }

    /// 读取源体素 `idx` 处的目标物理坐标 (mm). 越界时程序 panic.
    #[inline]
    pub fn mm_at(&self, (i, j, k): Idx3d) -> [f64; 3] {
        [
            self.data[(i, j, k, 0)],
            self.data[(i, j, k, 1)],
            self.data[(i, j, k, 2)],
        ]
    }
}

impl NiftiWrite for DeformationField {
    /// 以 `(X, Y, Z, 3)` 形状保存.
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        WriterOptions::new(path)
            .reference_header(&self.header)
            .write_nifti(&self.data)
            .map_err(SuvrError::nifti(path))
    }
}
