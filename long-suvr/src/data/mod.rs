use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayD, ArrayView3, ArrayViewMut3, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::{Result, SuvrError};
use crate::{Idx3d, RawIdx3d};

mod affine;
mod deformation;

pub use affine::Affine;
pub use deformation::DeformationField;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// nii 格式 PET 扫描. 摄取值以 `f32` 保存.
pub type PetScan = Volume<f32>;

/// 整数标签体数据. 用于 GIF 分区, 参考区域编号及目标体素编号掩膜.
pub type LabelVolume = Volume<i32>;

/// 0/1 掩膜体数据.
pub type MaskVolume = Volume<u8>;

/// nii 格式三维体数据, 包括 header, 仿射矩阵和按 `(i, j, k)` 存储的体素值.
///
/// 网格形状在加载时确定, 之后不会改变.
#[derive(Debug, Clone)]
pub struct Volume<T> {
    header: BoxedHeader,
    affine: Affine,
    data: Array3<T>,
}

/// nii 体数据 header 的共用属性和坐标变换.
pub trait NiftiVolumeAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取体素 -> 物理坐标的仿射矩阵.
    fn affine(&self) -> &Affine;

    /// 获取空间网格形状 `(I, J, K)`.
    fn shape(&self) -> Idx3d;

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (i0, j0, k0): &Idx3d) -> bool {
        let (i, j, k) = self.shape();
        *i0 < i && *j0 < j && *k0 < k
    }

    /// 将未检查的索引转换为合法索引. 越界 (包括负数) 时返回 `None`.
    #[inline]
    fn checked_index(&self, [i, j, k]: RawIdx3d) -> Option<Idx3d> {
        use num::ToPrimitive;
        let idx = (i.to_usize()?, j.to_usize()?, k.to_usize()?);
        self.check(&idx).then_some(idx)
    }

    /// 体素索引 -> 物理坐标 (mm).
    #[inline]
    fn voxel_to_mm(&self, idx: Idx3d) -> [f64; 3] {
        self.affine().voxel_to_mm(idx)
    }

    /// 物理坐标 (mm) -> 体素索引. 不检查越界, 参见 [`Affine::mm_to_voxel`].
    #[inline]
    fn mm_to_voxel(&self, mm: [f64; 3]) -> Option<RawIdx3d> {
        self.affine().mm_to_voxel(mm)
    }

    /// 获取单个体素分辨率 (mm).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, i, j, k, ..] = self.header().pixdim;
        [i as f64, j as f64, k as f64]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }
}

macro_rules! impl_read_squeezed {
    ($name: ident, $elem: ty) => {
        /// 读取 nii 文件的 header 和全部体素, 并把第三维以后的单位维度压缩掉.
        pub(crate) fn $name(path: &Path) -> Result<(BoxedHeader, Affine, ArrayD<$elem>)> {
            let obj = ReaderOptions::new()
                .read_file(path)
                .map_err(SuvrError::nifti(path))?;
            let header = Box::new(obj.header().clone());
            let affine = Affine::from_header(&header).ok_or_else(|| SuvrError::SingularAffine {
                path: path.to_owned(),
            })?;
            let mut data = obj
                .into_volume()
                .into_ndarray::<$elem>()
                .map_err(SuvrError::nifti(path))?;

            // 例如 niftyreg 的形变场形如 (X, Y, Z, 1, 3), 而 PET 可能是单帧 4D.
            for ax in (3..data.ndim()).rev() {
                if data.len_of(Axis(ax)) == 1 {
                    data = data.index_axis_move(Axis(ax), 0);
                }
            }
            Ok((header, affine, data))
        }
    };
}

impl_read_squeezed!(read_squeezed_f32, f32);
impl_read_squeezed!(read_squeezed_f64, f64);

impl<T> NiftiVolumeAttr for Volume<T> {
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
        self.data.dim()
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl<T: Clone> Volume<T> {
    /// 直接由体素数据和仿射矩阵创建实体. header 由仿射矩阵生成 (`sform_code = 1`).
    ///
    /// 主要用于测试和合成数据.
    pub fn fake(data: Array3<T>, affine: Affine) -> Self {
        let header = fake_header(data.shape(), &affine);
        let affine = Affine::from_header(&header).unwrap_or(affine);
        Self {
            header,
            affine,
            data: data.as_standard_layout().into_owned(),
        }
    }

    /// 在与 `self` 相同的网格 (相同 header 与仿射矩阵) 上创建新的体数据.
    ///
    /// `data` 的形状必须和 `self` 一致, 否则程序 panic.
    pub fn like<U>(&self, data: Array3<U>) -> Volume<U> {
        assert_eq!(self.data.dim(), data.dim(), "体数据网格形状不一致");
        Volume {
            header: self.header.clone(),
            affine: self.affine,
            data,
        }
    }

    /// 在与 `self` 相同的网格上创建填满 `value` 的新体数据.
    #[inline]
    pub fn filled_like<U: Clone>(&self, value: U) -> Volume<U> {
        self.like(Array3::from_elem(self.data.dim(), value))
    }

    /// 对每个体素施加 `f`, 结果放在相同的网格上.
    #[inline]
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Volume<U> {
        self.like(self.data.map(f))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, T> {
        self.data.view_mut()
    }

    /// 收集满足谓词 `pred` 的所有体素对应的下标, 结果按行优先存储.
    pub fn filter_pos<P: Fn(&T) -> bool>(&self, pred: P) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, v)| pred(v).then_some(pos))
            .collect()
    }
}

impl Volume<f32> {
    /// 打开 nii 文件格式的 3D 体数据 (允许第三维之后为单位维度).
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (header, affine, data) = read_squeezed_f32(path)?;
        let data = into_3d(path, data)?;
        Ok(Self {
            header,
            affine,
            data,
        })
    }
}

impl Volume<i32> {
    /// 打开 nii 文件格式的 3D 标签数据. 无论文件中的存储类型如何,
    /// 体素值都会被四舍五入到最近的整数.
    pub fn open_labels<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (header, affine, data) = read_squeezed_f32(path)?;
        let data = into_3d(path, data)?.mapv(|v| v.round() as i32);
        Ok(Self {
            header,
            affine,
            data,
        })
    }

    /// 获取非零体素个数.
    #[inline]
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|p| **p != 0).count()
    }
}

/// 由仿射矩阵生成 header (`sform_code = 1`).
pub(crate) fn fake_header(shape: &[usize], affine: &Affine) -> BoxedHeader {
    let mut header = Box::<NiftiHeader>::default();
    header.dim = [1; 8];
    header.dim[0] = shape.len() as u16;
    for (d, s) in header.dim[1..].iter_mut().zip(shape) {
        *d = *s as u16;
    }
    let m = affine.matrix();
    for (r, row) in [&mut header.srow_x, &mut header.srow_y, &mut header.srow_z]
        .into_iter()
        .enumerate()
    {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)] as f32;
        }
    }
    let [_, pi, pj, pk, ..] = &mut header.pixdim;
    for (p, col) in [pi, pj, pk].into_iter().zip(0..3) {
        *p = m.fixed_view::<3, 1>(0, col).norm() as f32;
    }
    header.sform_code = 1;
    header.qform_code = 0;
    header
}

fn into_3d<T: Clone>(path: &Path, data: ArrayD<T>) -> Result<Array3<T>> {
    let shape = data.shape().to_vec();
    data.into_dimensionality::<Ix3>()
        .map(|a| a.as_standard_layout().into_owned())
        .map_err(|_| SuvrError::Dimensionality {
            path: path.to_owned(),
            shape,
        })
}

/// 表明一个可以按原样存储为 nii 文件的体数据.
///
/// 输出文件以源 header 为模板, 因此保留了源数据的方向与仿射矩阵.
/// 路径以 `.gz` 结尾时自动压缩.
pub trait NiftiWrite {
    /// 将体数据保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()>;
}

macro_rules! impl_nifti_write {
    ($($elem: ty),+) => {
        $(
            impl NiftiWrite for Volume<$elem> {
                fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
                    let path = path.as_ref();
                    WriterOptions::new(path)
                        .reference_header(&self.header)
                        .write_nifti(&self.data)
                        .map_err(SuvrError::nifti(path))
                }
            }
        )+
    };
}

impl_nifti_write!(u8, i32, f32);
