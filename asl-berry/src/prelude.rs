//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Idx4d};

pub use crate::data::{Affine, MrVolume, NiftiHeaderAttr};

pub use crate::config::{
    Mode, ModeName, ParamSource, ParamSpec, RunConfiguration, RunConfigurationBuilder,
    StandardRegistration, StandardSpace, TissueType,
};
pub use crate::sensitivity::SensitivitySource;

pub use crate::toolkit::{FslToolkit, ImageToolkit, LookLocker};

pub use crate::error::{CalibError, CalibResult};

pub use crate::output::{write_outputs, OutputTargets};
pub use crate::pipeline::{run, CalibOutcome};
pub use crate::{RunLog, WorkingArea};
