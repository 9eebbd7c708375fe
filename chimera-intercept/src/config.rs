//! 拦截引擎配置
//!
//! 从 TOML 读取，键名使用 kebab-case：
//!
//! ```toml
//! [aop]
//! enabled = true
//! include-patterns = ["^audit"]
//!
//! [aop.proxy]
//! proxy-target-class = false
//! optimize = false
//! frozen = false
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use crate::error::{AopError, AopResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 代理创建选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// 强制代理目标类型本身，而不是它的接口
    pub proxy_target_class: bool,

    /// 允许激进的代理优化
    pub optimize: bool,

    /// 冻结后不能再修改通知器
    pub frozen: bool,
}

/// `[aop]` 配置段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AopSection {
    /// 是否启用自动代理（默认：true）
    pub enabled: bool,

    /// 参与切面扫描的组件名称正则，为空表示全部
    pub include_patterns: Vec<String>,

    pub proxy: ProxyConfig,
}

impl Default for AopSection {
    fn default() -> Self {
        Self {
            enabled: true,
            include_patterns: Vec::new(),
            proxy: ProxyConfig::default(),
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AopSettings {
    pub aop: AopSection,
    pub logging: LoggingConfig,
}

impl AopSettings {
    pub fn from_toml_str(content: &str) -> AopResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> AopResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AopError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loading interception settings from {}", path.display());
        Self::from_toml_str(&content)
    }
}
