//! 通知器适配器注册表
//!
//! 负责把各种通知统一转换成拦截器。内置前置、返回后、异常三种适配器，
//! 第三方适配器可以通过 inventory 在链接期注册。

use crate::advice::{
    Advice, AfterReturningAdviceInterceptor, MethodBeforeAdviceInterceptor,
    ThrowsAdviceInterceptor,
};
use crate::advisor::Advisor;
use crate::error::{AopError, AopResult};
use crate::invocation::MethodInterceptor;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

/// 全局适配器注册表
///
/// 首次使用时初始化，加载所有通过 inventory 注册的适配器
static GLOBAL_ADAPTER_REGISTRY: Lazy<Arc<AdvisorAdapterRegistry>> = Lazy::new(|| {
    let registry = AdvisorAdapterRegistry::new();
    registry.auto_load_adapters();
    Arc::new(registry)
});

/// 获取全局适配器注册表
pub fn global_adapter_registry() -> &'static Arc<AdvisorAdapterRegistry> {
    &GLOBAL_ADAPTER_REGISTRY
}

/// 通知适配器 Trait
pub trait AdvisorAdapter: Send + Sync {
    fn supports_advice(&self, advice: &Advice) -> bool;

    /// 仅在 `supports_advice` 返回 true 时调用
    fn get_interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>>;
}

struct BeforeAdviceAdapter;

impl AdvisorAdapter for BeforeAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Before(_))
    }

    fn get_interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::Before(before) => {
                Some(Arc::new(MethodBeforeAdviceInterceptor::new(before.clone())))
            }
            _ => None,
        }
    }
}

struct AfterReturningAdviceAdapter;

impl AdvisorAdapter for AfterReturningAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterReturning(_))
    }

    fn get_interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::AfterReturning(after) => {
                Some(Arc::new(AfterReturningAdviceInterceptor::new(after.clone())))
            }
            _ => None,
        }
    }
}

struct ThrowsAdviceAdapter;

impl AdvisorAdapter for ThrowsAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Throws(_))
    }

    fn get_interceptor(&self, advice: &Advice) -> Option<Arc<dyn MethodInterceptor>> {
        match advice {
            Advice::Throws(throws) => Some(Arc::new(ThrowsAdviceInterceptor::new(throws.clone()))),
            _ => None,
        }
    }
}

/// 适配器注册器
///
/// 用于 inventory 自动收集第三方适配器
pub struct AdapterRegistration {
    pub name: &'static str,

    /// 创建适配器实例的函数
    pub create: fn() -> Arc<dyn AdvisorAdapter>,
}

impl AdapterRegistration {
    pub const fn new(name: &'static str, create: fn() -> Arc<dyn AdvisorAdapter>) -> Self {
        Self { name, create }
    }
}

inventory::collect!(AdapterRegistration);

/// 适配器注册表
pub struct AdvisorAdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn AdvisorAdapter>>>,
}

impl AdvisorAdapterRegistry {
    /// 创建带内置适配器的注册表
    pub fn new() -> Self {
        let adapters: Vec<Arc<dyn AdvisorAdapter>> = vec![
            Arc::new(BeforeAdviceAdapter),
            Arc::new(AfterReturningAdviceAdapter),
            Arc::new(ThrowsAdviceAdapter),
        ];
        Self {
            adapters: RwLock::new(adapters),
        }
    }

    pub fn register(&self, adapter: Arc<dyn AdvisorAdapter>) {
        self.adapters.write().push(adapter);
    }

    /// 加载所有通过 inventory 注册的适配器
    pub fn auto_load_adapters(&self) {
        for registration in inventory::iter::<AdapterRegistration> {
            tracing::debug!("Loading advisor adapter: {}", registration.name);
            self.register((registration.create)());
        }
    }

    /// 把一个通知包装为通知器
    ///
    /// 拦截器和可适配的通知得到无条件通知器。
    pub fn wrap(&self, advice: Advice) -> AopResult<Advisor> {
        match &advice {
            Advice::Interceptor(_) | Advice::Empty => Ok(Advisor::plain(advice)),
            _ if self.find_adapter(&advice).is_some() => Ok(Advisor::plain(advice)),
            _ => Err(AopError::UnknownAdviceType(advice.describe().to_string())),
        }
    }

    /// 通知器对应的拦截器
    pub fn get_interceptors(&self, advisor: &Advisor) -> AopResult<Vec<Arc<dyn MethodInterceptor>>> {
        let advice = advisor.advice();
        let mut interceptors = Vec::new();

        if let Advice::Interceptor(interceptor) = &advice {
            interceptors.push(interceptor.clone());
        }
        for adapter in self.adapters.read().iter() {
            if adapter.supports_advice(&advice) {
                interceptors.extend(adapter.get_interceptor(&advice));
            }
        }

        if interceptors.is_empty() && !advice.is_empty() {
            return Err(AopError::UnknownAdviceType(advice.describe().to_string()));
        }
        Ok(interceptors)
    }

    fn find_adapter(&self, advice: &Advice) -> Option<Arc<dyn AdvisorAdapter>> {
        self.adapters
            .read()
            .iter()
            .find(|adapter| adapter.supports_advice(advice))
            .cloned()
    }
}

impl Default for AdvisorAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
