use super::{EstimationInput, M0Estimate, M0Estimator};
use crate::error::CalibResult;
use crate::sensitivity;
use crate::toolkit::{ImageToolkit, LookLocker, SatRecovRequest};

/// 饱和恢复序列, 由外部工具箱做模型拟合.
///
/// 拟合 (i) 在参考组织掩膜内进行, 数据先做灵敏度校正, 以参考组织 T1 为先验;
/// 拟合 (ii) 在全脑范围内进行, 不做灵敏度校正, 结果仅用于导出.
#[derive(Copy, Clone, Debug)]
pub struct SatRecov<'a> {
    tis: &'a [f64],
    look_locker: Option<&'a LookLocker>,
    fix_saturation_efficiency: bool,
}

impl<'a> SatRecov<'a> {
    /// 创建.
    #[inline]
    pub fn new(
        tis: &'a [f64],
        look_locker: Option<&'a LookLocker>,
        fix_saturation_efficiency: bool,
    ) -> Self {
        Self {
            tis,
            look_locker,
            fix_saturation_efficiency,
        }
    }
}

impl M0Estimator for SatRecov<'_> {
    fn name(&self) -> &'static str {
        "satrecov"
    }

    fn estimate(
        &self,
        input: &EstimationInput<'_>,
        toolkit: &dyn ImageToolkit,
    ) -> CalibResult<M0Estimate> {
        let corrected = sensitivity::apply(input.calibration, input.sensitivity)?;
        log::info!("fitting saturation recovery in reference mask");
        let fit = toolkit.fit_saturation_recovery(&SatRecovRequest {
            data: &corrected,
            mask: input.mask,
            tis: self.tis,
            prior_t1: input.params.t1r,
            look_locker: self.look_locker,
            fix_saturation_efficiency: self.fix_saturation_efficiency,
        })?;
        let raw_m0 = input.reference_mean(&fit.m0)?;
        log::info!("raw M0 from saturation recovery: {raw_m0}");

        let whole_brain = match input.brain_mask {
            Some(brain) => {
                log::info!("fitting saturation recovery in whole brain");
                Some(toolkit.fit_saturation_recovery(&SatRecovRequest {
                    data: input.calibration,
                    mask: brain,
                    tis: self.tis,
                    prior_t1: input.params.t1r,
                    look_locker: self.look_locker,
                    fix_saturation_efficiency: self.fix_saturation_efficiency,
                })?)
            }
            None => None,
        };

        Ok(M0Estimate {
            raw_m0,
            whole_brain,
        })
    }
}
