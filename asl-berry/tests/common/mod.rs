#![allow(dead_code)]

use std::cell::RefCell;

use asl_berry::toolkit::{
    Interpolation, LookLocker, SatRecovFit, SatRecovRequest, Segmentation, ToolResult, Transform,
};
use asl_berry::{Affine, ImageToolkit, MrVolume};
use ndarray::Array4;

/// 所有测试图像共用的网格 `(z, y, x)`.
pub const GRID: (usize, usize, usize) = (2, 2, 2);

/// `frames` 帧, 所有体素为 `value`.
pub fn uniform(frames: usize, value: f32) -> MrVolume {
    let (z, y, x) = GRID;
    MrVolume::from_array(Array4::from_elem((frames, z, y, x), value))
}

/// 第一层 (`z = 0`) 为 1, 其余为 0.
pub fn half_mask() -> MrVolume {
    let (z, y, x) = GRID;
    MrVolume::from_array(Array4::from_shape_fn((1, z, y, x), |(_, k, _, _)| {
        if k == 0 {
            1.0
        } else {
            0.0
        }
    }))
}

/// 确定性的假工具箱. 记录每一次调用.
///
/// 所有变换都是恒等变换, 因此所有图像需要位于同一网格上.
#[derive(Default)]
pub struct FakeToolkit {
    calls: RefCell<Vec<String>>,
    fit_masks: RefCell<Vec<usize>>,
    fit_look_lockers: RefCell<Vec<Option<LookLocker>>>,
    pve: Vec<MrVolume>,
    bias_field: Option<MrVolume>,
    fitted_m0: f32,
}

impl FakeToolkit {
    pub fn new() -> Self {
        Self {
            fitted_m0: 1000.0,
            ..Self::default()
        }
    }

    /// 分割结果: CSF, GM, WM.
    pub fn with_pve(mut self, csf: f32, gm: f32, wm: f32) -> Self {
        self.pve = vec![uniform(1, csf), uniform(1, gm), uniform(1, wm)];
        self
    }

    pub fn with_bias_field(mut self, v: f32) -> Self {
        self.bias_field = Some(uniform(1, v));
        self
    }

    pub fn with_fitted_m0(mut self, v: f32) -> Self {
        self.fitted_m0 = v;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.split(':').next() == Some(name))
            .count()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.borrow().iter().any(|c| c == call)
    }

    /// 每次饱和恢复拟合时掩膜内的体素数.
    pub fn fit_masks(&self) -> Vec<usize> {
        self.fit_masks.borrow().clone()
    }

    /// 每次饱和恢复拟合收到的 Look-Locker 参数.
    pub fn fit_look_lockers(&self) -> Vec<Option<LookLocker>> {
        self.fit_look_lockers.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl ImageToolkit for FakeToolkit {
    fn brain_extract(&self, image: &MrVolume) -> ToolResult<MrVolume> {
        self.record("brain_extract".into());
        Ok(image.binarize())
    }

    fn segment(&self, _image: &MrVolume) -> ToolResult<Segmentation> {
        self.record("segment".into());
        Ok(Segmentation {
            pve: self.pve.clone(),
            bias_field: self.bias_field.clone(),
        })
    }

    fn linear_register(&self, _moving: &MrVolume, _fixed: &MrVolume) -> ToolResult<Affine> {
        self.record("linear_register".into());
        Ok(Affine::IDENTITY)
    }

    fn nonlinear_register(
        &self,
        moving: &MrVolume,
        _fixed: &MrVolume,
        _seed: &Affine,
    ) -> ToolResult<MrVolume> {
        self.record("nonlinear_register".into());
        Ok(moving.filled_like(0.0))
    }

    fn invert_transform(
        &self,
        transform: &Transform,
        _reference: &MrVolume,
    ) -> ToolResult<Transform> {
        let kind = match transform {
            Transform::Affine(_) => "affine",
            Transform::Warp(_) => "warp",
        };
        self.record(format!("invert_transform:{kind}"));
        Ok(transform.clone())
    }

    fn apply_transform(
        &self,
        image: &MrVolume,
        transform: &Transform,
        _reference: &MrVolume,
        interpolation: Interpolation,
        supersample: Option<u32>,
    ) -> ToolResult<MrVolume> {
        let kind = match transform {
            Transform::Affine(_) => "affine",
            Transform::Warp(_) => "warp",
        };
        self.record(format!(
            "apply_transform:{kind}:{interpolation:?}:{}",
            supersample.unwrap_or(1)
        ));
        Ok(image.clone())
    }

    fn fit_saturation_recovery(&self, request: &SatRecovRequest<'_>) -> ToolResult<SatRecovFit> {
        self.record("fit_saturation_recovery".into());
        self.fit_masks
            .borrow_mut()
            .push(request.mask.count_nonzero());
        self.fit_look_lockers
            .borrow_mut()
            .push(request.look_locker.copied());
        let one = request.data.filled_like(1.0);
        Ok(SatRecovFit {
            t1: one.scale(request.prior_t1 as f32),
            m0: one.scale(self.fitted_m0),
            flip_angle_correction: request.look_locker.map(|_| one.clone()),
        })
    }
}
