//! 统一错误类型定义
//!
//! 使用 `thiserror` 定义数据访问层的错误类型。`FetchError` 需要 `Clone`：
//! 同一个在途请求的结果会被分发给所有等待者。

use std::path::PathBuf;
use thiserror::Error;

/// 数据访问错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// 远端查询接口返回错误或请求失败
    #[error("远端查询失败: {0}")]
    Remote(String),

    /// 连接池已关闭（服务已销毁）
    #[error("连接池已关闭")]
    PoolClosed,

    /// 后台请求任务异常终止（panic 或运行时关闭）
    #[error("请求任务异常终止: {0}")]
    TaskAborted(String),

    /// 查询参数无法序列化为缓存键
    #[error("查询参数序列化失败: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 便于与现有代码集成的类型别名
pub type Result<T> = std::result::Result<T, FetchError>;

/// 配置加载/校验错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件 I/O 错误
    #[error("文件 I/O 错误: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 配置解析错误
    #[error("配置解析错误: {0}")]
    Parse(String),

    /// 配置取值非法
    #[error("配置无效: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// 从 `std::io::Error` 和路径创建 I/O 错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
