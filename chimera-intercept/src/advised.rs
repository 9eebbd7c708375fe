//! 代理配置
//!
//! `AdvisedSupport` 持有一个代理的全部配置：标志位、目标源、接口、通知器，
//! 以及按 (方法, 目标类型) 缓存的拦截器链。`ProxyFactory` 在它之上提供
//! 创建代理的入口。

use crate::advice::Advice;
use crate::advisor::{Advisor, DefaultPointcutAdvisor};
use crate::chain::{AdvisorChainFactory, DefaultAdvisorChainFactory};
use crate::config::ProxyConfig;
use crate::error::{AopError, AopResult};
use crate::invocation::ChainElement;
use crate::metadata::{Class, Method, TargetObject};
use crate::proxy::{DefaultAopProxyFactory, ProxyHandle};
use crate::target::{EmptyTargetSource, SingletonTargetSource, TargetSource};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type ChainKey = (Method, String);

/// 代理配置
pub struct AdvisedSupport {
    flags: RwLock<ProxyConfig>,
    target_source: RwLock<Arc<dyn TargetSource>>,
    interfaces: RwLock<Vec<Class>>,
    advisors: RwLock<Vec<Advisor>>,
    pre_filtered: AtomicBool,
    chain_factory: Arc<dyn AdvisorChainFactory>,
    method_cache: RwLock<HashMap<ChainKey, Arc<Vec<ChainElement>>>>,
}

impl AdvisedSupport {
    pub fn new() -> Self {
        Self::with_chain_factory(Arc::new(DefaultAdvisorChainFactory::new()))
    }

    pub fn with_chain_factory(chain_factory: Arc<dyn AdvisorChainFactory>) -> Self {
        Self {
            flags: RwLock::new(ProxyConfig::default()),
            target_source: RwLock::new(Arc::new(EmptyTargetSource::new())),
            interfaces: RwLock::new(Vec::new()),
            advisors: RwLock::new(Vec::new()),
            pre_filtered: AtomicBool::new(false),
            chain_factory,
            method_cache: RwLock::new(HashMap::new()),
        }
    }

    fn check_not_frozen(&self, action: &'static str) -> AopResult<()> {
        if self.flags.read().frozen {
            return Err(AopError::ConfigFrozen(action));
        }
        Ok(())
    }

    fn advice_changed(&self) {
        self.method_cache.write().clear();
    }

    // ---- 标志位 ----

    pub fn proxy_config(&self) -> ProxyConfig {
        *self.flags.read()
    }

    /// 复制标志位，冻结状态也一并复制
    pub fn set_proxy_config(&self, config: ProxyConfig) -> AopResult<()> {
        self.check_not_frozen("change proxy settings")?;
        *self.flags.write() = config;
        Ok(())
    }

    pub fn is_proxy_target_class(&self) -> bool {
        self.flags.read().proxy_target_class
    }

    pub fn set_proxy_target_class(&self, value: bool) -> AopResult<()> {
        self.check_not_frozen("change proxy-target-class")?;
        self.flags.write().proxy_target_class = value;
        Ok(())
    }

    pub fn is_optimize(&self) -> bool {
        self.flags.read().optimize
    }

    pub fn set_optimize(&self, value: bool) -> AopResult<()> {
        self.check_not_frozen("change optimize")?;
        self.flags.write().optimize = value;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.flags.read().frozen
    }

    pub fn set_frozen(&self, value: bool) {
        self.flags.write().frozen = value;
    }

    /// 通知器是否已经针对目标类型筛选过
    pub fn is_pre_filtered(&self) -> bool {
        self.pre_filtered.load(Ordering::Acquire)
    }

    pub fn set_pre_filtered(&self, value: bool) {
        self.pre_filtered.store(value, Ordering::Release);
        self.advice_changed();
    }

    // ---- 目标 ----

    pub fn set_target(&self, target: Arc<dyn TargetObject>) {
        self.set_target_source(Arc::new(SingletonTargetSource::new(target)));
    }

    pub fn set_target_source(&self, target_source: Arc<dyn TargetSource>) {
        *self.target_source.write() = target_source;
    }

    pub fn target_source(&self) -> Arc<dyn TargetSource> {
        self.target_source.read().clone()
    }

    pub fn target_class(&self) -> Option<Class> {
        self.target_source.read().target_class()
    }

    // ---- 接口 ----

    /// 添加代理接口
    pub fn add_interface(&self, interface: Class) -> AopResult<()> {
        if !interface.is_interface() {
            return Err(AopError::NotAnInterface(interface.name().to_string()));
        }
        self.push_interface(interface);
        Ok(())
    }

    fn push_interface(&self, interface: Class) {
        let mut interfaces = self.interfaces.write();
        if !interfaces.contains(&interface) {
            interfaces.push(interface);
            drop(interfaces);
            self.advice_changed();
        }
    }

    pub fn interfaces(&self) -> Vec<Class> {
        self.interfaces.read().clone()
    }

    pub fn is_interface_proxied(&self, interface: &Class) -> bool {
        self.interfaces
            .read()
            .iter()
            .any(|proxied| proxied.is_assignable_to(interface))
    }

    // ---- 通知器 ----

    pub fn advisors(&self) -> Vec<Advisor> {
        self.advisors.read().clone()
    }

    pub fn advisor_count(&self) -> usize {
        self.advisors.read().len()
    }

    /// 追加通知器；引介通知器的接口会加入代理接口
    pub fn add_advisor(&self, advisor: Advisor) -> AopResult<()> {
        self.check_not_frozen("add advisor")?;
        if let Advisor::Introduction(introduction) = &advisor {
            introduction.validate_interfaces()?;
            for interface in introduction.interfaces() {
                self.push_interface(interface.clone());
            }
        }
        self.advisors.write().push(advisor);
        self.advice_changed();
        Ok(())
    }

    pub fn add_advisors(&self, advisors: impl IntoIterator<Item = Advisor>) -> AopResult<()> {
        for advisor in advisors {
            self.add_advisor(advisor)?;
        }
        Ok(())
    }

    /// 为所有方法添加通知
    pub fn add_advice(&self, advice: Advice) -> AopResult<()> {
        self.add_advisor(Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::for_all(advice))))
    }

    /// 移除通知器，返回是否找到
    pub fn remove_advisor(&self, advisor: &Advisor) -> AopResult<bool> {
        self.check_not_frozen("remove advisor")?;
        let mut advisors = self.advisors.write();
        let Some(index) = advisors.iter().position(|a| a.same_as(advisor)) else {
            return Ok(false);
        };
        advisors.remove(index);
        drop(advisors);
        self.advice_changed();
        Ok(true)
    }

    // ---- 拦截器链 ----

    /// 方法在目标类型上的拦截器链，带缓存
    pub fn interceptors_for(
        &self,
        method: &Method,
        target_class: Option<&Class>,
    ) -> AopResult<Arc<Vec<ChainElement>>> {
        let key = (
            method.clone(),
            target_class.map(|c| c.name().to_string()).unwrap_or_default(),
        );
        if let Some(chain) = self.method_cache.read().get(&key) {
            return Ok(chain.clone());
        }

        // 重复计算没有副作用，并发未命中时以先写入者为准
        let chain = Arc::new(self.chain_factory.build_chain(self, method, target_class)?);
        Ok(self.method_cache.write().entry(key).or_insert(chain).clone())
    }

    pub fn cached_chain_count(&self) -> usize {
        self.method_cache.read().len()
    }
}

impl Default for AdvisedSupport {
    fn default() -> Self {
        Self::new()
    }
}

/// 代理工厂
///
/// ```ignore
/// let factory = ProxyFactory::for_target(circle);
/// factory.add_advice(Advice::interceptor(timing))?;
/// let proxy = factory.get_proxy()?;
/// ```
pub struct ProxyFactory {
    advised: AdvisedSupport,
    aop_proxy_factory: DefaultAopProxyFactory,
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self {
            advised: AdvisedSupport::new(),
            aop_proxy_factory: DefaultAopProxyFactory::new(),
        }
    }

    /// 代理目标实现的全部接口
    pub fn for_target(target: Arc<dyn TargetObject>) -> Self {
        let factory = Self::new();
        for interface in target.target_class().all_interfaces() {
            factory.advised.push_interface(interface);
        }
        factory.advised.set_target(target);
        factory
    }

    pub fn with_advised(advised: AdvisedSupport) -> Self {
        Self {
            advised,
            aop_proxy_factory: DefaultAopProxyFactory::new(),
        }
    }

    pub fn into_advised(self) -> AdvisedSupport {
        self.advised
    }

    pub fn get_proxy(self) -> AopResult<ProxyHandle> {
        self.aop_proxy_factory
            .create_aop_proxy(Arc::new(self.advised))
    }
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for ProxyFactory {
    type Target = AdvisedSupport;

    fn deref(&self) -> &Self::Target {
        &self.advised
    }
}
