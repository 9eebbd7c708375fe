//! 错误类型定义
//!
//! 本模块的错误全部来自静态配置缺陷，不做重试。
//! 目标方法和通知体自身的错误使用 `anyhow::Error` 传递。

use thiserror::Error;

/// 拦截引擎错误
#[derive(Debug, Error)]
pub enum AopError {
    /// 非单例实例化模型的切面却由单例组件承载
    #[error("Component with name '{0}' is a singleton, but aspect instantiation model is not singleton")]
    SingletonAspectMismatch(String),

    /// 无法确定代理的目标类型
    #[error("Target source cannot determine target class: either an interface or a target is required for proxy creation")]
    NoTargetClass,

    /// 引介的类型不是接口
    #[error("Introduced type '{0}' is not an interface")]
    NotAnInterface(String),

    /// 配置已冻结
    #[error("Cannot {0}: configuration is frozen")]
    ConfigFrozen(&'static str),

    /// 配置文件内容非法
    #[error("Invalid interception settings: {0}")]
    InvalidConfig(String),

    /// 通知方法在恢复后无法重新定位
    #[error("Failed to find advice method '{method}' on aspect class '{class}'")]
    AdviceMethodNotFound { class: String, method: String },

    /// 注册表中不存在该组件
    #[error("No component named '{0}' is defined")]
    NoSuchComponent(String),

    /// 类型没有切面描述
    #[error("Class '{0}' is not an aspect")]
    NotAnAspect(String),

    /// 没有适配器能处理该通知
    #[error("Advice of kind '{0}' is not supported by any registered adapter")]
    UnknownAdviceType(String),

    /// 代理未暴露该方法
    #[error("Method '{method}' is not exposed by proxy class '{proxy}'")]
    MethodNotProxied { proxy: String, method: String },

    /// 日志系统初始化失败
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    /// 组件创建失败
    #[error("Failed to create component '{name}'")]
    ComponentCreation {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<toml::de::Error> for AopError {
    fn from(error: toml::de::Error) -> Self {
        AopError::InvalidConfig(error.to_string())
    }
}

/// 拦截引擎的统一结果类型
pub type AopResult<T> = Result<T, AopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_converts_into_anyhow() {
        let err: anyhow::Error = AopError::NoTargetClass.into();
        assert!(err.to_string().contains("cannot determine target class"));
        assert!(err.downcast_ref::<AopError>().is_some());
    }

    #[test]
    fn test_component_creation_keeps_source() {
        let err = AopError::ComponentCreation {
            name: "auditAspect".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("boom"));
    }
}
