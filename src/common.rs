//! 全局基础类型与错误定义

use thiserror::Error;

// ── 类型别名 ──────────────────────────────────────────────────────────────────

/// 实体代码（国家 / 区域 / 收入组等），统一为大写
pub type EntityCode    = String;
/// 指标代码，如 `SP.POP.TOTL`
pub type IndicatorCode = String;
/// 年份列
pub type Year          = i32;

/// 规范化代码：去首尾空白并转为大写
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AggError {
    /// 请求的指标或实体不存在
    #[error("not found: {0}")]
    NotFound(String),
    /// 容器文件格式损坏；只中止该指标的处理
    #[error("corrupt data in {code}: {reason}")]
    CorruptData { code: String, reason: String },
    /// 分类层级存在环；整个运行作废
    #[error("classification hierarchy contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<EntityCode>),
    /// 同一 (entity, year) 被写入两次，说明层级排序出错
    #[error("aggregate cell written twice: entity={entity} year={year}")]
    WriteConflict { entity: EntityCode, year: Year },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AggError {
    pub fn corrupt(code: &str, reason: impl Into<String>) -> Self {
        Self::CorruptData { code: code.into(), reason: reason.into() }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptData { .. })
    }
}

pub type Result<T> = std::result::Result<T, AggError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" sp.pop.totl "), "SP.POP.TOTL");
    }

    #[test]
    fn test_cycle_message_lists_entities() {
        let e = AggError::Cycle(vec!["A".into(), "B".into()]);
        assert_eq!(e.to_string(), "classification hierarchy contains a cycle through: A, B");
        assert!(!e.is_corrupt());
        assert!(AggError::corrupt("X", "bad magic").is_corrupt());
    }
}
