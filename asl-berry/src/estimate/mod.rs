//! 参考组织 M0 估计.
//!
//! 两种互斥的估计方式由 [`Mode`] 一次性选定, 之后只通过 [`M0Estimator`] 使用.

use crate::config::{Mode, ResolvedParams};
use crate::data::MrVolume;
use crate::error::{CalibError, CalibResult, MaskOrigin};
use crate::toolkit::{ImageToolkit, SatRecovFit};

mod longtr;
mod satrecov;

pub use longtr::{longtr_m0, LongTr};
pub use satrecov::SatRecov;

/// 估计 M0 所需的输入.
#[derive(Copy, Clone, Debug)]
pub struct EstimationInput<'a> {
    /// 标定图像 (未做灵敏度校正).
    pub calibration: &'a MrVolume,

    /// 参考组织掩膜.
    pub mask: &'a MrVolume,

    /// 参考组织掩膜的来源.
    pub origin: MaskOrigin,

    /// 灵敏度图.
    pub sensitivity: Option<&'a MrVolume>,

    /// 已决议的参数.
    pub params: &'a ResolvedParams,

    /// 全脑掩膜. 只有需要导出全脑拟合结果时才提供.
    pub brain_mask: Option<&'a MrVolume>,
}

impl EstimationInput<'_> {
    /// `image` 在参考组织掩膜内的平均值.
    pub(crate) fn reference_mean(&self, image: &MrVolume) -> CalibResult<f64> {
        image
            .mean_in(Some(self.mask))?
            .ok_or(CalibError::EmptyMask(self.origin))
    }
}

/// M0 估计结果.
#[derive(Clone, Debug)]
pub struct M0Estimate {
    /// 参考组织原始 M0 (未经校正方程).
    pub raw_m0: f64,

    /// 全脑饱和恢复拟合结果 (仅 `satrecov` 且提供了全脑掩膜).
    pub whole_brain: Option<SatRecovFit>,
}

/// M0 估计方式.
pub trait M0Estimator {
    /// 方式名, 用于日志.
    fn name(&self) -> &'static str;

    /// 估计参考组织原始 M0.
    fn estimate(
        &self,
        input: &EstimationInput<'_>,
        toolkit: &dyn ImageToolkit,
    ) -> CalibResult<M0Estimate>;
}

/// 按运行方式选定估计器.
pub fn for_mode(mode: &Mode) -> Box<dyn M0Estimator + '_> {
    match mode {
        Mode::LongTr { tr, taq } => Box::new(LongTr::new(*tr, *taq)),
        Mode::SatRecov {
            tis,
            look_locker,
            fix_saturation_efficiency,
        } => Box::new(SatRecov::new(
            tis,
            look_locker.as_ref(),
            *fix_saturation_efficiency,
        )),
    }
}
