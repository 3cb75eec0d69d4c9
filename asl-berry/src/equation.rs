//! 标定方程.
//!
//! 对参考组织原始 M0 依次施加:
//!
//! 1. 参考组织 T2 衰减校正: `M0 / exp(-TE / T2r)`;
//! 2. 增益与分配系数: `M0 * gain / pc`;
//! 3. 血液 T2 衰减: `M0 * exp(-TE / T2b)`.
//!
//! 得到血液 M0 (`M0blood`). 标定因子为 `6000 / M0blood`.
//! 标定灌注图时若给定标记效率 `alpha`, 额外使用 `M0blood * alpha`, 但写出的 M0 不变.

use crate::config::ResolvedParams;
use crate::consts::CBF_SCALE;
use crate::data::MrVolume;
use crate::error::{CalibError, CalibResult};
use crate::sensitivity;

/// 由参考组织原始 M0 计算血液 M0.
pub fn blood_m0(raw_m0: f64, params: &ResolvedParams, gain: f64) -> f64 {
    let te = params.te_or_zero();
    let m0 = raw_m0 / (-te / params.t2r).exp();
    let m0 = m0 * gain / params.pc;
    m0 * (-te / params.t2b).exp()
}

/// 标定因子 `6000 / M0blood`.
#[inline]
pub fn calibration_factor(m0_blood: f64) -> f64 {
    CBF_SCALE / m0_blood
}

/// 标定灌注图时实际使用的 M0: 给定 `alpha` 时为 `M0blood * alpha`.
#[inline]
pub fn effective_m0(m0_blood: f64, alpha: Option<f64>) -> f64 {
    m0_blood * alpha.unwrap_or(1.0)
}

/// 标定灌注图: 先除以灵敏度 (如有), 再乘以 `6000 / M0`.
pub fn calibrate_perfusion(
    perfusion: &MrVolume,
    sens: Option<&MrVolume>,
    m0_blood: f64,
    alpha: Option<f64>,
) -> CalibResult<MrVolume> {
    let m0 = effective_m0(m0_blood, alpha);
    if !(m0.is_finite() && m0 > 0.0) {
        return Err(CalibError::Configuration(format!(
            "cannot calibrate with non-positive M0 ({m0})"
        )));
    }
    let corrected = sensitivity::apply(perfusion, sens)?;
    Ok(corrected.scale((CBF_SCALE / m0) as f32))
}
