//! FSL 风格的 4x4 仿射矩阵 (文本格式, 每行 4 个以空白分隔的数).

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;

/// 解析仿射矩阵错误.
#[derive(Debug)]
pub enum ParseAffineError {
    /// 底层 I/O 错误.
    Io(io::Error),

    /// 无法解析为浮点数的内容.
    BadNumber(String),

    /// 数值个数不是 16. 参数为实际个数.
    WrongLength(usize),
}

impl fmt::Display for ParseAffineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read matrix: {e}"),
            Self::BadNumber(s) => write!(f, "`{s}` is not a number"),
            Self::WrongLength(n) => write!(f, "expected 16 matrix entries, found {n}"),
        }
    }
}

impl std::error::Error for ParseAffineError {}

/// 4x4 仿射矩阵, 行优先.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Affine([[f64; 4]; 4]);

impl Affine {
    /// 单位矩阵.
    pub const IDENTITY: Affine = Affine([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// 由行数据直接构建.
    #[inline]
    pub const fn new(rows: [[f64; 4]; 4]) -> Self {
        Self(rows)
    }

    /// 行数据.
    #[inline]
    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.0
    }

    /// 从 FSL 文本矩阵文件读取.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParseAffineError> {
        fs::read_to_string(path.as_ref())
            .map_err(ParseAffineError::Io)?
            .parse()
    }

    /// 以 FSL 文本矩阵格式写入 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path.as_ref(), self.to_string())
    }
}

impl FromStr for Affine {
    type Err = ParseAffineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>()
                    .map_err(|_| ParseAffineError::BadNumber(tok.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() != 16 {
            return Err(ParseAffineError::WrongLength(values.len()));
        }
        let mut rows = [[0.0; 4]; 4];
        for (i, v) in values.into_iter().enumerate() {
            rows[i / 4][i % 4] = v;
        }
        Ok(Self(rows))
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.0.iter() {
            writeln!(f, "{}", row.iter().map(|v| format!("{v:.10}")).join("  "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Affine, ParseAffineError};

    #[test]
    fn test_parse_fsl_matrix() {
        let text = "1 0 0 -2.5\n0 1 0 0\n0  0 1 3\n0 0 0 1\n";
        let m: Affine = text.parse().unwrap();
        assert_eq!(m.rows()[0][3], -2.5);
        assert_eq!(m.rows()[2][3], 3.0);

        let back: Affine = m.to_string().parse().unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "1 0 0".parse::<Affine>(),
            Err(ParseAffineError::WrongLength(3))
        ));
        assert!(matches!(
            "1 0 0 x".parse::<Affine>(),
            Err(ParseAffineError::BadNumber(_))
        ));
    }
}
