//! 代理策略与代理实现
//!
//! 两种策略：基于接口的代理只暴露接口方法；基于子类的代理继承目标类型，
//! 可以拦截目标层次上的任何方法。

use crate::advised::AdvisedSupport;
use crate::error::{AopError, AopResult};
use crate::invocation::{ChainElement, MethodInvocation};
use crate::metadata::{Class, ClassBuilder, Method, TargetObject, Value};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static PROXY_MARKER: Lazy<Class> = Lazy::new(|| Class::marker_interface("AopProxyMarker"));

static PROXY_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// 所有代理类型都实现的标记接口
pub fn aop_proxy_marker() -> Class {
    PROXY_MARKER.clone()
}

/// 代理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// 基于接口
    Interface,
    /// 基于子类
    Subclass,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Interface => f.write_str("interface"),
            ProxyKind::Subclass => f.write_str("subclass"),
        }
    }
}

/// AOP 代理 Trait
///
/// 代理本身也是目标对象，可以被再次代理。
pub trait AopProxy: TargetObject {
    fn kind(&self) -> ProxyKind;

    fn advised(&self) -> &Arc<AdvisedSupport>;

    fn into_target(self: Arc<Self>) -> Arc<dyn TargetObject>;
}

/// 代理句柄
pub type ProxyHandle = Arc<dyn AopProxy>;

/// 默认代理工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAopProxyFactory;

impl DefaultAopProxyFactory {
    pub fn new() -> Self {
        Self
    }

    /// 选择代理策略，只读取配置
    pub fn select_strategy(&self, config: &AdvisedSupport) -> AopResult<ProxyKind> {
        if config.is_optimize()
            || config.is_proxy_target_class()
            || !has_user_supplied_interfaces(config)
        {
            let target_class = config.target_class().ok_or(AopError::NoTargetClass)?;
            if target_class.is_interface() || target_class.is_proxy_class() {
                return Ok(ProxyKind::Interface);
            }
            return Ok(ProxyKind::Subclass);
        }
        Ok(ProxyKind::Interface)
    }

    pub fn create_aop_proxy(&self, config: Arc<AdvisedSupport>) -> AopResult<ProxyHandle> {
        let kind = self.select_strategy(&config)?;
        let proxy: ProxyHandle = match kind {
            ProxyKind::Interface => Arc::new(InterfaceProxy::new(config)),
            ProxyKind::Subclass => Arc::new(SubclassProxy::new(config)?),
        };
        tracing::debug!(
            "Created {} proxy '{}' with {} advisors",
            kind,
            proxy.target_class(),
            proxy.advised().advisor_count()
        );
        Ok(proxy)
    }
}

/// 没有接口，或只有一个标记接口
fn has_user_supplied_interfaces(config: &AdvisedSupport) -> bool {
    let interfaces = config.interfaces();
    !(interfaces.is_empty() || (interfaces.len() == 1 && interfaces[0].is_marker()))
}

/// 执行一次代理调用
fn invoke_through_chain(
    config: &AdvisedSupport,
    chain: Arc<Vec<ChainElement>>,
    method: &Method,
    args: &[Value],
) -> anyhow::Result<Value> {
    let target_source = config.target_source();
    let target = target_source.target()?;
    let target_class = target
        .as_ref()
        .map(|t| t.target_class())
        .or_else(|| target_source.target_class())
        .unwrap_or_else(|| method.declaring_class().clone());

    if chain.is_empty() {
        // 没有拦截器时直接调用目标
        return match target {
            Some(target) => target.invoke(method, args),
            None => anyhow::bail!("No target available to invoke {}", method.signature()),
        };
    }

    MethodInvocation::new(target, method.clone(), args.to_vec(), target_class, chain).proceed()
}

/// 基于接口的代理
pub struct InterfaceProxy {
    advised: Arc<AdvisedSupport>,
    class: Class,
}

impl InterfaceProxy {
    pub fn new(advised: Arc<AdvisedSupport>) -> Self {
        let mut interfaces = advised.interfaces();
        if interfaces.is_empty() {
            if let Some(target_class) = advised.target_class() {
                if target_class.is_interface() {
                    interfaces.push(target_class);
                } else if target_class.is_proxy_class() {
                    interfaces.extend(target_class.interfaces().iter().cloned());
                }
            }
        }

        let id = PROXY_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut builder = ClassBuilder::proxy(format!("$Proxy{}", id));
        for interface in &interfaces {
            builder = builder.implements(interface);
        }
        if !interfaces.contains(&PROXY_MARKER) {
            builder = builder.implements(&PROXY_MARKER);
        }

        Self {
            advised,
            class: builder.build(),
        }
    }

    /// 是否为代理接口上声明的方法
    fn exposes(&self, method: &Method) -> bool {
        let declaring = method.declaring_class();
        declaring.is_interface() && self.class.is_assignable_to(declaring)
    }
}

impl TargetObject for InterfaceProxy {
    fn target_class(&self) -> Class {
        self.class.clone()
    }

    fn invoke(&self, method: &Method, args: &[Value]) -> anyhow::Result<Value> {
        if !self.exposes(method) {
            return Err(AopError::MethodNotProxied {
                proxy: self.class.name().to_string(),
                method: method.signature(),
            }
            .into());
        }
        let target_class = self.advised.target_class();
        let chain = self.advised.interceptors_for(method, target_class.as_ref())?;
        invoke_through_chain(&self.advised, chain, method, args)
    }
}

impl AopProxy for InterfaceProxy {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Interface
    }

    fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    fn into_target(self: Arc<Self>) -> Arc<dyn TargetObject> {
        self
    }
}

/// 基于子类的代理
pub struct SubclassProxy {
    advised: Arc<AdvisedSupport>,
    class: Class,
    target_class: Class,
    /// 配置冻结且目标静态时预先计算的拦截器链
    fixed_chains: Option<HashMap<Method, Arc<Vec<ChainElement>>>>,
}

impl SubclassProxy {
    pub fn new(advised: Arc<AdvisedSupport>) -> AopResult<Self> {
        let target_class = advised.target_class().ok_or(AopError::NoTargetClass)?;

        let mut builder = Class::concrete(format!("{}$$EnhancedByChimera", target_class.name()))
            .extends(&target_class)
            .implements(&PROXY_MARKER);
        for interface in advised.interfaces() {
            builder = builder.implements(&interface);
        }
        let class = builder.build();

        let fixed_chains = if advised.is_frozen() && advised.target_source().is_static() {
            let mut chains = HashMap::new();
            for method in class.all_methods() {
                let chain = advised.interceptors_for(&method, Some(&target_class))?;
                chains.insert(method, chain);
            }
            tracing::debug!(
                "Precomputed {} interceptor chains for frozen proxy of '{}'",
                chains.len(),
                target_class
            );
            Some(chains)
        } else {
            None
        };

        Ok(Self {
            advised,
            class,
            target_class,
            fixed_chains,
        })
    }

    /// 是否预先计算了拦截器链
    pub fn has_fixed_chains(&self) -> bool {
        self.fixed_chains.is_some()
    }

    fn chain_for(&self, method: &Method) -> AopResult<Arc<Vec<ChainElement>>> {
        if let Some(chain) = self.fixed_chains.as_ref().and_then(|chains| chains.get(method)) {
            return Ok(chain.clone());
        }
        self.advised.interceptors_for(method, Some(&self.target_class))
    }
}

impl TargetObject for SubclassProxy {
    fn target_class(&self) -> Class {
        self.class.clone()
    }

    fn invoke(&self, method: &Method, args: &[Value]) -> anyhow::Result<Value> {
        if !self.class.is_assignable_to(method.declaring_class()) {
            return Err(AopError::MethodNotProxied {
                proxy: self.class.name().to_string(),
                method: method.signature(),
            }
            .into());
        }
        let chain = self.chain_for(method)?;
        invoke_through_chain(&self.advised, chain, method, args)
    }
}

impl AopProxy for SubclassProxy {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Subclass
    }

    fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    fn into_target(self: Arc<Self>) -> Arc<dyn TargetObject> {
        self
    }
}
