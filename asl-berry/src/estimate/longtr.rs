use super::{EstimationInput, M0Estimate, M0Estimator};
use crate::error::CalibResult;
use crate::sensitivity;
use crate::toolkit::ImageToolkit;

/// 长 TR 质子密度像下的饱和恢复校正: `M0 = S / (1 - exp(-(TR - Taq) / T1))`.
///
/// `tr`, `taq`, `t1` 均以秒为单位.
#[inline]
pub fn longtr_m0(signal: f64, tr: f64, taq: f64, t1: f64) -> f64 {
    signal / (1.0 - (-(tr - taq) / t1).exp())
}

/// 长 TR 质子密度像, 闭式计算.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LongTr {
    tr: f64,
    taq: f64,
}

impl LongTr {
    /// 创建. `tr` 与 `taq` 以秒为单位.
    #[inline]
    pub fn new(tr: f64, taq: f64) -> Self {
        Self { tr, taq }
    }
}

impl M0Estimator for LongTr {
    fn name(&self) -> &'static str {
        "longtr"
    }

    fn estimate(
        &self,
        input: &EstimationInput<'_>,
        _toolkit: &dyn ImageToolkit,
    ) -> CalibResult<M0Estimate> {
        let mean = input.calibration.time_mean();
        let mean = sensitivity::apply(&mean, input.sensitivity)?;
        let signal = input.reference_mean(&mean)?;
        let raw_m0 = longtr_m0(signal, self.tr, self.taq, input.params.t1r);
        log::info!("mean signal in reference mask: {signal}, raw M0: {raw_m0}");
        Ok(M0Estimate {
            raw_m0,
            whole_brain: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::longtr_m0;

    #[test]
    fn test_longtr_csf() {
        // 1000 / (1 - exp(-3.2 / 4.3)).
        let m0 = longtr_m0(1000.0, 3.2, 0.0, 4.3);
        assert!((m0 - 1905.2).abs() < 0.1, "{m0}");
    }

    #[test]
    fn test_long_tr_limit() {
        // TR 远大于 T1 时校正趋于 1.
        let m0 = longtr_m0(1000.0, 100.0, 0.0, 1.0);
        assert!((m0 - 1000.0).abs() < 1e-6);
    }
}
