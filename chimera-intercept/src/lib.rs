//! Chimera Intercept - 动态方法拦截引擎
//!
//! 在运行时为目标对象织入切面通知：
//! - 从组件注册表中发现切面并缓存其通知器
//! - 按实例化模型（单例、perthis、pertarget、pertypewithin）延迟创建通知
//! - 为每个方法构建有序的拦截器链，支持动态切点与引介通知
//! - 在接口代理与子类代理之间选择代理策略
//! - 组件初始化后自动包装代理

pub mod adapter;
pub mod advice;
pub mod advised;
pub mod advisor;
pub mod aspect;
pub mod auto_proxy;
pub mod builder;
pub mod chain;
pub mod config;
pub mod error;
pub mod expression;
pub mod factory;
pub mod instantiation;
pub mod invocation;
pub mod logging;
pub mod metadata;
pub mod pointcut;
pub mod precedence;
pub mod proxy;
pub mod registry;
pub mod target;

// 重新导出核心类型
pub use adapter::{global_adapter_registry, AdapterRegistration, AdvisorAdapter, AdvisorAdapterRegistry};
pub use advice::{Advice, AdviceKind, AfterReturningAdvice, MethodBeforeAdvice, ThrowsAdvice};
pub use advised::{AdvisedSupport, ProxyFactory};
pub use advisor::{
    Advisor, DefaultAdvisor, DefaultIntroductionAdvisor, DefaultPointcutAdvisor,
    DelegatingIntroductionInterceptor, IntroductionAdvisor, PointcutAdvisor, PrecedenceInformation,
    HIGHEST_PRECEDENCE, LOWEST_PRECEDENCE,
};
pub use aspect::{
    AdviceMethod, AdviceMethodRef, AspectDescriptor, AspectInstanceFactory, AspectMetadata,
    PerClauseKind, PrototypeAspectInstanceFactory, SingletonAspectInstanceFactory,
};
pub use auto_proxy::AspectAutoProxyCreator;
pub use builder::{AdvisorCache, AspectAdvisorsBuilder};
pub use chain::{AdvisorChainFactory, DefaultAdvisorChainFactory};
pub use config::{AopSettings, ProxyConfig};
pub use error::{AopError, AopResult};
pub use expression::PointcutExpression;
pub use factory::{AdviceFactory, AdvisorFactory, DescriptorAdviceFactory, DescriptorAdvisorFactory};
pub use instantiation::InstantiationModelAwarePointcutAdvisor;
pub use invocation::{ChainElement, MethodInterceptor, MethodInvocation};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metadata::{unit, value, Class, FnTarget, Method, TargetObject, Value};
pub use pointcut::{ClassFilter, NameMatchPointcut, Pointcut};
pub use precedence::sort_advisors;
pub use proxy::{aop_proxy_marker, AopProxy, DefaultAopProxyFactory, ProxyHandle, ProxyKind};
pub use registry::{ComponentRegistry, Scope, SimpleComponentRegistry};
pub use target::{EmptyTargetSource, SingletonTargetSource, TargetSource};

// 导出 inventory 供第三方适配器注册使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::advice::{Advice, AdviceKind};
    pub use crate::advised::ProxyFactory;
    pub use crate::advisor::{Advisor, DefaultIntroductionAdvisor, DefaultPointcutAdvisor};
    pub use crate::aspect::{AdviceMethod, AspectDescriptor};
    pub use crate::auto_proxy::AspectAutoProxyCreator;
    pub use crate::builder::AspectAdvisorsBuilder;
    pub use crate::config::AopSettings;
    pub use crate::error::{AopError, AopResult};
    pub use crate::expression::PointcutExpression;
    pub use crate::factory::DescriptorAdvisorFactory;
    pub use crate::invocation::{MethodInterceptor, MethodInvocation};
    pub use crate::metadata::{unit, value, Class, FnTarget, Method, TargetObject, Value};
    pub use crate::pointcut::Pointcut;
    pub use crate::proxy::{AopProxy, ProxyKind};
    pub use crate::registry::{ComponentRegistry, Scope, SimpleComponentRegistry};
}
