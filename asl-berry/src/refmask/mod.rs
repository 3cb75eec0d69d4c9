//! 标定空间中的参考组织二值掩膜.
//!
//! 掩膜可以直接提供, 也可以从结构像派生:
//!
//! 1. 结构像非零处即为全脑;
//! 2. 参考组织的部分容积 (PVE) 图, 直接提供或由分割得到;
//! 3. CSF 且启用脑室限制时, 将 PVE 限制到脑室 (参见 [`ventricle`]);
//! 4. 以 "标定 -> 结构" 变换的逆将 PVE 样条插值 (超采样) 到标定空间;
//! 5. 阈值化并二值化;
//! 6. 检查非空.

use crate::config::RunConfiguration;
use crate::consts;
use crate::data::MrVolume;
use crate::error::{CalibError, CalibResult, MaskOrigin};
use crate::toolkit::{ImageToolkit, Interpolation, Transform};

pub mod ventricle;

/// 参考组织掩膜及其派生过程的副产物.
#[derive(Clone, Debug)]
pub struct ReferenceMask {
    /// 标定空间的二值掩膜.
    pub mask: MrVolume,

    /// 掩膜来源.
    pub origin: MaskOrigin,

    /// 分割得到的偏置场 (结构空间). 只有运行了分割才存在.
    pub bias_field: Option<MrVolume>,

    /// 结构空间 -> 标定空间的变换. 只有派生掩膜时存在.
    pub struct_to_calib: Option<Transform>,

    /// 掩膜内的体素数.
    pub voxels: usize,
}

/// 构建参考组织掩膜.
pub fn build(cfg: &RunConfiguration, toolkit: &dyn ImageToolkit) -> CalibResult<ReferenceMask> {
    match &cfg.reference_mask {
        Some(mask) => {
            log::info!("using supplied reference tissue mask");
            let mask = mask.binarize();
            let voxels = validate(&mask, MaskOrigin::Supplied, toolkit)?;
            Ok(ReferenceMask {
                mask,
                origin: MaskOrigin::Supplied,
                bias_field: None,
                struct_to_calib: None,
                voxels,
            })
        }
        None => derive(cfg, toolkit),
    }
}

/// 检查掩膜非空, 返回非零体素数.
fn validate(mask: &MrVolume, origin: MaskOrigin, toolkit: &dyn ImageToolkit) -> CalibResult<usize> {
    let stats = toolkit.statistics(mask, None)?;
    if stats.nonzero == 0 {
        return Err(CalibError::EmptyMask(origin));
    }
    log::info!("reference tissue mask ({origin}): {} voxels", stats.nonzero);
    Ok(stats.nonzero)
}

/// 从结构像派生掩膜.
fn derive(cfg: &RunConfiguration, toolkit: &dyn ImageToolkit) -> CalibResult<ReferenceMask> {
    let structural = cfg.structural.as_ref().ok_or_else(|| {
        CalibError::Usage(
            "a structural image and its transform are required to derive the mask".into(),
        )
    })?;
    let class = cfg.tissue.pve_class().ok_or_else(|| {
        CalibError::Configuration(
            "tissue reference `none` requires a supplied reference mask".into(),
        )
    })?;
    log::info!("deriving {} reference mask from structural image", cfg.tissue);

    // 1. 全脑.
    let brain = structural.image.binarize();

    // 2. PVE.
    let (pve, bias_field) = match &cfg.reference_pve {
        Some(pve) => (pve.clone(), None),
        None => {
            log::info!("segmenting structural image");
            let seg = toolkit.segment(&structural.image)?;
            let pve = seg.class(class).cloned().ok_or_else(|| {
                CalibError::Configuration(format!(
                    "segmentation produced {} classes, tissue class {class} not available",
                    seg.pve.len()
                ))
            })?;
            (pve, seg.bias_field)
        }
    };
    let mut pve = pve.masked_by(&brain)?;

    // 3. 脑室.
    if cfg.tissue.is_csf() && cfg.ventricle_masking {
        log::info!("restricting CSF to the ventricles");
        let vent = ventricle::ventricle_mask(cfg, &structural.image, toolkit)?;
        pve = pve.masked_by(&vent)?;
    }

    // 4. 变换到标定空间.
    let reference = cfg.calibration.time_mean();
    let struct_to_calib =
        toolkit.invert_transform(&Transform::Affine(structural.calib_to_struct), &reference)?;
    let pve = toolkit.apply_transform(
        &pve,
        &struct_to_calib,
        &reference,
        Interpolation::Spline,
        Some(consts::SUPERSAMPLE_LEVEL),
    )?;

    // 5. 阈值化.
    let mask = pve.threshold(consts::PVE_THRESHOLD).binarize();

    // 6. 检查.
    let voxels = validate(&mask, MaskOrigin::Derived, toolkit)?;
    Ok(ReferenceMask {
        mask,
        origin: MaskOrigin::Derived,
        bias_field,
        struct_to_calib: Some(struct_to_calib),
        voxels,
    })
}
