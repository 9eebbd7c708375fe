//! 目标源
//!
//! 代理每次调用时从目标源获取真实目标。

use crate::metadata::{Class, TargetObject};
use std::sync::Arc;

/// 目标源 Trait
pub trait TargetSource: Send + Sync {
    /// 目标类型，无法确定时返回 None
    fn target_class(&self) -> Option<Class>;

    /// 每次调用是否都返回同一个目标
    fn is_static(&self) -> bool {
        true
    }

    fn target(&self) -> anyhow::Result<Option<Arc<dyn TargetObject>>>;
}

/// 始终返回同一目标的目标源
pub struct SingletonTargetSource {
    target: Arc<dyn TargetObject>,
}

impl SingletonTargetSource {
    pub fn new(target: Arc<dyn TargetObject>) -> Self {
        Self { target }
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_class(&self) -> Option<Class> {
        Some(self.target.target_class())
    }

    fn target(&self) -> anyhow::Result<Option<Arc<dyn TargetObject>>> {
        Ok(Some(self.target.clone()))
    }
}

/// 没有目标的目标源，可选地携带目标类型
#[derive(Debug, Clone, Default)]
pub struct EmptyTargetSource {
    target_class: Option<Class>,
}

impl EmptyTargetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_class(class: Class) -> Self {
        Self {
            target_class: Some(class),
        }
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_class(&self) -> Option<Class> {
        self.target_class.clone()
    }

    fn target(&self) -> anyhow::Result<Option<Arc<dyn TargetObject>>> {
        Ok(None)
    }
}
