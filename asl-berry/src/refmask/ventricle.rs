//! 将 CSF 部分容积图限制到脑室.
//!
//! 标准空间脑室图谱经 "结构空间 -> 标准空间" 变换的逆变换映射到结构空间,
//! 采用最近邻插值. 线性与非线性两条路径互斥.

use std::path::Path;

use crate::config::{RunConfiguration, StandardSpace};
use crate::data::{Affine, MrVolume};
use crate::error::{CalibError, CalibResult};
use crate::toolkit::{ImageToolkit, Interpolation, Transform};

/// 检查外部提供的配准文件是否存在.
fn check_supplied(cfg: &RunConfiguration) -> CalibResult<()> {
    match cfg.registration.supplied_paths().find(|p| !p.exists()) {
        Some(p) => Err(CalibError::MissingRegistrationInput(p.to_path_buf())),
        None => Ok(()),
    }
}

fn open_matrix(path: &Path) -> CalibResult<Affine> {
    Affine::open(path).map_err(|e| CalibError::matrix(path, e))
}

fn open_warp(path: &Path) -> CalibResult<MrVolume> {
    MrVolume::open(path).map_err(|e| CalibError::image(path, e))
}

/// 结构空间 -> 标准空间的仿射矩阵: 外部提供, 或者现场配准.
fn struct_to_std_affine(
    cfg: &RunConfiguration,
    structural: &MrVolume,
    standard: &StandardSpace,
    toolkit: &dyn ImageToolkit,
) -> CalibResult<Affine> {
    match &cfg.registration.matrix {
        Some(p) => open_matrix(p),
        None => {
            log::info!("registering structural image to standard space (linear)");
            Ok(toolkit.linear_register(structural, &standard.brain)?)
        }
    }
}

/// 计算结构空间中的脑室二值掩膜.
pub fn ventricle_mask(
    cfg: &RunConfiguration,
    structural: &MrVolume,
    toolkit: &dyn ImageToolkit,
) -> CalibResult<MrVolume> {
    let standard = cfg.standard.as_ref().ok_or_else(|| {
        CalibError::Configuration("ventricle masking requires standard space images".into())
    })?;
    check_supplied(cfg)?;

    // 已提供形变场时不需要仿射矩阵.
    let forward = if cfg.registration.uses_nonlinear() {
        let warp = match &cfg.registration.warp {
            Some(p) => open_warp(p)?,
            None => {
                let affine = struct_to_std_affine(cfg, structural, standard, toolkit)?;
                log::info!("registering structural image to standard space (nonlinear)");
                toolkit.nonlinear_register(structural, &standard.brain, &affine)?
            }
        };
        Transform::Warp(warp)
    } else {
        Transform::Affine(struct_to_std_affine(cfg, structural, standard, toolkit)?)
    };

    let inverse = toolkit.invert_transform(&forward, structural)?;
    let vent = toolkit.apply_transform(
        &standard.ventricles,
        &inverse,
        structural,
        Interpolation::NearestNeighbour,
        None,
    )?;
    Ok(vent.binarize())
}
