//! 运行日志.
//!
//! 除了经由 `log` 输出外, 每一步的关键结果也记录在 [`RunLog`] 中,
//! 运行结束后写入输出目录 (或调试模式下保留的工作目录) 中的 `logfile`.

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    stage: &'static str,
    key: String,
    value: String,
}

/// 按阶段记录的键值对.
#[derive(Clone, Debug, Default)]
pub struct RunLog {
    entries: Vec<Entry>,
}

impl RunLog {
    /// 创建空日志.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条结果, 同时以 `info` 级别输出.
    pub fn record<V: Display>(&mut self, stage: &'static str, key: &str, value: V) {
        let value = value.to_string();
        log::info!("[{stage}] {key}: {value}");
        self.entries.push(Entry {
            stage,
            key: key.to_string(),
            value,
        });
    }

    /// 查找 `stage` 阶段中 `key` 的最后一次记录.
    pub fn get(&self, stage: &str, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.stage == stage && e.key == key)
            .map(|e| e.value.as_str())
    }

    /// 记录条数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 以文本形式写入 `w`. 相邻的同阶段记录归为一组.
    pub fn write_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        const S4: &str = "    ";

        for (stage, group) in &self.entries.iter().group_by(|e| e.stage) {
            writeln!(w, "Stage `{stage}`:")?;
            for e in group {
                writeln!(w, "{S4}{}: {}", e.key, e.value)?;
            }
        }
        Ok(())
    }

    /// 写入文件 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        self.write_into(&mut w)?;
        w.flush()
    }
}
