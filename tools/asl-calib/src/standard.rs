//! 标准空间模板.

use std::env;
use std::path::PathBuf;

use asl_berry::config::StandardSpace;
use asl_berry::prelude::*;

/// 标准脑.
const STANDARD_BRAIN: &str = "MNI152_T1_2mm_brain.nii.gz";

/// 脑室掩膜.
const VENTRICLE_MASK: &str = "MNI152_T1_2mm_VentricleMask.nii.gz";

/// 获取标准空间模板目录.
///
/// 1. 若环境变量 `$ASL_STANDARD_DIR` 非空, 则返回其值;
/// 2. 否则, 若 `$FSLDIR` 非空, 返回 `$FSLDIR/data/standard`;
/// 3. 否则, 返回 `$HOME/fsl/data/standard` (FSL 安装器的默认位置).
pub fn standard_dir_from_env_or_home() -> Option<PathBuf> {
    let non_empty = |k: &str| env::var_os(k).filter(|d| !d.is_empty()).map(PathBuf::from);
    non_empty("ASL_STANDARD_DIR")
        .or_else(|| non_empty("FSLDIR").map(|d| d.join("data").join("standard")))
        .or_else(|| dirs::home_dir().map(|h| h.join("fsl").join("data").join("standard")))
}

/// 读取标准脑与脑室掩膜.
pub fn load_standard_space() -> CalibResult<StandardSpace> {
    let dir = standard_dir_from_env_or_home().ok_or_else(|| {
        CalibError::Configuration(
            "ventricle masking needs standard space images, set FSLDIR or use --no-vent".into(),
        )
    })?;
    let open = |name: &str| {
        let p = dir.join(name);
        MrVolume::open(&p).map_err(|e| CalibError::image(p, e))
    };
    Ok(StandardSpace {
        brain: open(STANDARD_BRAIN)?,
        ventricles: open(VENTRICLE_MASK)?,
    })
}
