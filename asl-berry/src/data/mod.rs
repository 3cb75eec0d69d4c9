use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, ArrayViewMut4, Axis, Ix4, Zip};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiError, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{Idx3d, Idx4d};

mod affine;

pub use affine::{Affine, ParseAffineError};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 两个体数据的网格不一致.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("volume grid mismatch: expected {expected:?}, found {found:?}")]
pub struct ShapeMismatch {
    /// 期望的形状 `(t, z, y, x)`.
    pub expected: Idx4d,

    /// 实际的形状 `(t, z, y, x)`.
    pub found: Idx4d,
}

/// 打开 nii 文件错误.
#[derive(Debug)]
pub enum OpenVolumeError {
    /// nifti 库底层错误.
    Nifti(NiftiError),

    /// 维度不受支持. 仅支持 3D 和 4D 图像.
    Dimensionality(usize),
}

impl From<NiftiError> for OpenVolumeError {
    #[inline]
    fn from(e: NiftiError) -> Self {
        Self::Nifti(e)
    }
}

impl std::fmt::Display for OpenVolumeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nifti(e) => write!(f, "{e}"),
            Self::Dimensionality(n) => write!(f, "{n}D images are not supported"),
        }
    }
}

impl std::error::Error for OpenVolumeError {}

/// nii 格式 MR 图像, 包括 header 和体素数据. 体素值以 `f32` 保存.
///
/// 数据统一按 `[t, z, y, x]` 组织. 3D 图像的 `t` 维长度为 1.
#[derive(Debug, Clone)]
pub struct MrVolume {
    header: BoxedHeader,
    data: Array4<f32>,
}

/// 依据数据形状同步 header 中的 `dim` 字段.
fn header_with_shape(h: &NiftiHeader, (t, z, y, x): Idx4d) -> BoxedHeader {
    let mut header = Box::new(h.clone());
    header.dim = [
        if t > 1 { 4 } else { 3 },
        x as u16,
        y as u16,
        z as u16,
        t as u16,
        1,
        1,
        1,
    ];
    header
}

/// nii 文件 header 的共用属性.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取单个体素分辨率, 以毫米为单位, 顺序为 `[z, y, x]`.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, x, y, z, ..] = self.header().pixdim;
        [z as f64, y as f64, x as f64]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }
}

impl NiftiHeaderAttr for MrVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MrVolume {
    type Output = f32;

    /// 访问第一帧.
    #[inline]
    fn index(&self, (z, y, x): Idx3d) -> &Self::Output {
        &self.data[(0, z, y, x)]
    }
}

impl IndexMut<Idx3d> for MrVolume {
    #[inline]
    fn index_mut(&mut self, (z, y, x): Idx3d) -> &mut Self::Output {
        &mut self.data[(0, z, y, x)]
    }
}

impl Index<Idx4d> for MrVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx4d) -> &Self::Output {
        &self.data[index]
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// 借助 `rayon`, 逐体素并行地计算 `out = f(out, rhs)`.
        fn zip_apply<F>(out: &mut Array4<f32>, rhs: ArrayView4<f32>, f: F)
        where
            F: Fn(f32, f32) -> f32 + Sync + Send,
        {
            Zip::from(out).and(rhs).par_for_each(|a, &b| *a = f(*a, b));
        }

        /// 借助 `rayon`, 逐体素并行地计算 `out = f(out)`.
        fn map_apply<F>(out: &mut Array4<f32>, f: F)
        where
            F: Fn(f32) -> f32 + Sync + Send,
        {
            out.par_mapv_inplace(f);
        }
    } else {
        fn zip_apply<F>(out: &mut Array4<f32>, rhs: ArrayView4<f32>, f: F)
        where
            F: Fn(f32, f32) -> f32 + Sync + Send,
        {
            Zip::from(out).and(rhs).for_each(|a, &b| *a = f(*a, b));
        }

        fn map_apply<F>(out: &mut Array4<f32>, f: F)
        where
            F: Fn(f32) -> f32 + Sync + Send,
        {
            out.mapv_inplace(f);
        }
    }
}

impl MrVolume {
    /// 打开 nii 文件格式的 MR 图像. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenVolumeError> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let mut header = Box::new(obj.header().clone());
        // `into_ndarray` 已经应用了 scl_slope / scl_inter.
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;

        // [x, y, z, (t)] -> [t, z, y, x].
        let data = obj.into_volume().into_ndarray::<f32>()?;
        let data = match data.ndim() {
            3 => data.insert_axis(Axis(3)),
            4 => data,
            n => return Err(OpenVolumeError::Dimensionality(n)),
        };
        let data = data
            .into_dimensionality::<Ix4>()
            .map_err(|_| OpenVolumeError::Dimensionality(4))?
            .permuted_axes([3, 2, 1, 0])
            .as_standard_layout()
            .into_owned();

        let header = header_with_shape(&header, data.dim());
        Ok(Self { header, data })
    }

    /// 将图像写入 `path`. 后缀为 `.nii.gz` 时自动压缩.
    ///
    /// 仅有一帧的图像按 3D 图像写出.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // [t, z, y, x] -> [x, y, z, t].
        let view = self.data.view().permuted_axes([3, 2, 1, 0]);
        let writer = WriterOptions::new(path.as_ref()).reference_header(&self.header);
        if self.frames() == 1 {
            writer.write_nifti(&view.index_axis(Axis(3), 0))
        } else {
            writer.write_nifti(&view)
        }
    }

    /// 根据 `[t, z, y, x]` 格式的裸数据直接创建图像, 体素分辨率为 1mm 各向同性.
    pub fn from_array(data: Array4<f32>) -> Self {
        let mut header = NiftiHeader::default();
        header.pixdim = [1.0; 8];
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        let header = header_with_shape(&header, data.dim());
        Self { header, data }
    }

    /// 以 `reference` 的 header 创建新图像.
    #[inline]
    pub fn with_header_of(reference: &MrVolume, data: Array4<f32>) -> Self {
        let header = header_with_shape(&reference.header, data.dim());
        Self { header, data }
    }

    /// 以 `reference` 的 header 创建 3D 新图像.
    #[inline]
    pub fn from_volume3(reference: &MrVolume, data: Array3<f32>) -> Self {
        Self::with_header_of(reference, data.insert_axis(Axis(0)))
    }

    /// 创建与 `self` 网格一致、只有一帧、所有体素为 `value` 的图像.
    pub fn filled_like(&self, value: f32) -> Self {
        let (z, y, x) = self.spatial_shape();
        Self::with_header_of(self, Array4::from_elem((1, z, y, x), value))
    }

    /// 数据形状 `(t, z, y, x)`.
    #[inline]
    pub fn shape(&self) -> Idx4d {
        self.data.dim()
    }

    /// 空间形状 `(z, y, x)`.
    #[inline]
    pub fn spatial_shape(&self) -> Idx3d {
        let (_, z, y, x) = self.shape();
        (z, y, x)
    }

    /// 帧数 (时间点或重复次数).
    #[inline]
    pub fn frames(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 两者空间网格是否一致.
    #[inline]
    pub fn same_grid(&self, other: &MrVolume) -> bool {
        self.spatial_shape() == other.spatial_shape()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut4<'_, f32> {
        self.data.view_mut()
    }

    /// 获取第 `t` 帧视图.
    ///
    /// 当 `t` 越界时 panic.
    #[inline]
    pub fn frame(&self, t: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), t)
    }

    /// 沿时间维求平均, 得到单帧图像.
    pub fn time_mean(&self) -> Self {
        if self.frames() == 1 {
            return self.clone();
        }
        let n = self.frames() as f32;
        let sum = self
            .data
            .axis_iter(Axis(0))
            .fold(Array3::<f32>::zeros(self.spatial_shape()), |acc, v| acc + v);
        Self::from_volume3(self, sum / n)
    }

    /// 检查 `rhs` 能否与 `self` 逐体素运算: 空间网格一致,
    /// 且 `rhs` 只有一帧或与 `self` 帧数相同.
    fn check_operand(&self, rhs: &MrVolume) -> Result<(), ShapeMismatch> {
        if self.same_grid(rhs) && (rhs.frames() == 1 || rhs.frames() == self.frames()) {
            Ok(())
        } else {
            Err(ShapeMismatch {
                expected: self.shape(),
                found: rhs.shape(),
            })
        }
    }

    /// 逐体素计算 `f(self, rhs)`. 单帧的 `rhs` 会被广播到每一帧.
    fn zip_with<F>(&self, rhs: &MrVolume, f: F) -> Result<Self, ShapeMismatch>
    where
        F: Fn(f32, f32) -> f32 + Sync + Send,
    {
        self.check_operand(rhs)?;
        let mut out = self.data.clone();
        let rhs = rhs.data.broadcast(out.raw_dim()).ok_or(ShapeMismatch {
            expected: self.shape(),
            found: rhs.shape(),
        })?;
        zip_apply(&mut out, rhs, f);
        Ok(Self::with_header_of(self, out))
    }

    /// 逐体素计算 `f(self)`.
    fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let mut out = self.data.clone();
        map_apply(&mut out, f);
        Self::with_header_of(self, out)
    }

    /// 逐体素除以 `rhs`. 除数为 0 的体素结果为 0.
    pub fn divide_by(&self, rhs: &MrVolume) -> Result<Self, ShapeMismatch> {
        self.zip_with(rhs, |a, b| if b == 0.0 { 0.0 } else { a / b })
    }

    /// 逐体素乘以 `rhs`.
    pub fn multiply(&self, rhs: &MrVolume) -> Result<Self, ShapeMismatch> {
        self.zip_with(rhs, |a, b| a * b)
    }

    /// 将 `mask` 为 0 处的体素置 0.
    pub fn masked_by(&self, mask: &MrVolume) -> Result<Self, ShapeMismatch> {
        self.zip_with(mask, |a, m| if m == 0.0 { 0.0 } else { a })
    }

    /// 所有体素乘以常数 `k`.
    #[inline]
    pub fn scale(&self, k: f32) -> Self {
        self.map(move |a| a * k)
    }

    /// 将小于 `thr` 的体素置 0.
    #[inline]
    pub fn threshold(&self, thr: f32) -> Self {
        self.map(move |a| if a < thr { 0.0 } else { a })
    }

    /// 二值化: 非零体素置 1, 其余置 0.
    #[inline]
    pub fn binarize(&self) -> Self {
        self.map(|a| if a != 0.0 { 1.0 } else { 0.0 })
    }

    /// 逐体素取倒数. 0 仍为 0.
    #[inline]
    pub fn reciprocal(&self) -> Self {
        self.map(|a| if a == 0.0 { 0.0 } else { 1.0 / a })
    }

    /// 非零体素个数 (所有帧合计).
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    /// 求 `mask` 非零处 (所有帧) 体素值的平均值. 若 `mask` 为 `None`, 则对全部体素求平均.
    ///
    /// 没有体素参与计算时返回 `Ok(None)`.
    pub fn mean_in(&self, mask: Option<&MrVolume>) -> Result<Option<f64>, ShapeMismatch> {
        let mut count = 0u64;
        let mut sum = 0.0f64;
        match mask {
            None => {
                for v in self.data.iter() {
                    count += 1;
                    sum += *v as f64;
                }
            }
            Some(m) => {
                if !self.same_grid(m) {
                    return Err(ShapeMismatch {
                        expected: self.shape(),
                        found: m.shape(),
                    });
                }
                let mv = m.frame(0);
                for frame in self.data.axis_iter(Axis(0)) {
                    Zip::from(&frame).and(&mv).for_each(|&v, &k| {
                        if k != 0.0 {
                            count += 1;
                            sum += v as f64;
                        }
                    });
                }
            }
        }
        Ok((count > 0).then(|| sum / count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::MrVolume;
    use ndarray::Array4;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn ramp() -> MrVolume {
        // 两帧, 2x2x2.
        let data = Array4::from_shape_fn((2, 2, 2, 2), |(t, z, y, x)| {
            (t * 8 + z * 4 + y * 2 + x) as f32
        });
        MrVolume::from_array(data)
    }

    #[test]
    fn test_time_mean() {
        let v = ramp();
        let m = v.time_mean();
        assert_eq!(m.shape(), (1, 2, 2, 2));
        // (k + (k + 8)) / 2 = k + 4
        assert_eq!(m[(0, 0, 0)], 4.0);
        assert_eq!(m[(1, 1, 1)], 11.0);
    }

    #[test]
    fn test_divide_by_zero_is_zero() {
        let v = ramp();
        let mut sens = v.filled_like(2.0);
        sens[(0, 0, 1)] = 0.0;
        let d = v.divide_by(&sens).unwrap();
        assert_eq!(d[(0, 1, 1, 1)], 3.5);
        assert_eq!(d[(0, 0, 0, 1)], 0.0);
        assert_eq!(d[(1, 0, 0, 1)], 0.0);
        assert_eq!(d[(1, 0, 0, 0)], 4.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let v = ramp();
        let other = MrVolume::from_array(Array4::zeros((1, 3, 2, 2)));
        assert!(v.divide_by(&other).is_err());
        assert!(v.mean_in(Some(&other)).is_err());

        let three = MrVolume::from_array(Array4::zeros((3, 2, 2, 2)));
        assert!(v.multiply(&three).is_err());
    }

    #[test]
    fn test_masked_mean_and_count() {
        let v = ramp().time_mean();
        let mut mask = v.filled_like(0.0);
        assert_eq!(v.mean_in(Some(&mask)).unwrap(), None);

        mask[(0, 0, 0)] = 1.0;
        mask[(1, 1, 1)] = 1.0;
        assert_eq!(mask.count_nonzero(), 2);
        assert!(f64_eq(v.mean_in(Some(&mask)).unwrap().unwrap(), 7.5));
        assert!(f64_eq(v.mean_in(None).unwrap().unwrap(), 7.5));
    }

    #[test]
    fn test_threshold_binarize_reciprocal() {
        let mut v = ramp().time_mean().scale(0.1);
        let t = v.threshold(0.95);
        assert_eq!(t.count_nonzero(), 2);
        let b = t.binarize();
        assert_eq!(b.mean_in(Some(&t)).unwrap(), Some(1.0));

        v[(0, 0, 0)] = 0.0;
        let r = v.reciprocal();
        assert_eq!(r[(0, 0, 0)], 0.0);
        assert!((r[(0, 0, 1)] - 1.0 / 0.5).abs() < 1e-6);
        assert!((r[(1, 1, 1)] - 1.0 / 1.1).abs() < 1e-6);
    }
}
