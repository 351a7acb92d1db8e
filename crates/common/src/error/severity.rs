//! 错误严重级别
//!
//! 各组件的错误类型都通过 `severity()` 映射到这里，日志级别据此选择

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// 信息级别
    Info,
    /// 警告级别（单个 peer 受影响）
    Warning,
    /// 错误级别
    Error,
    /// 严重错误级别（整个桥接需要停止）
    Critical,
}

impl ErrorSeverity {
    /// 是否需要终止整个桥接
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Critical.is_fatal());
        assert!(!ErrorSeverity::Warning.is_fatal());
    }
}
