//! 自动代理 - 组件初始化后自动包装 AOP 代理
//!
//! 对注册表中的每个组件：找出适用于其类型的切面通知器，按优先级排序后
//! 创建一个预筛选过的代理。切面组件自身以及没有任何通知适用的组件保持原样。

use crate::advised::ProxyFactory;
use crate::advisor::Advisor;
use crate::builder::AspectAdvisorsBuilder;
use crate::config::{AopSettings, ProxyConfig};
use crate::error::AopResult;
use crate::factory::{AdvisorFactory, DescriptorAdvisorFactory};
use crate::metadata::{Class, TargetObject};
use crate::precedence::sort_advisors;
use crate::registry::ComponentRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 通知器是否可能适用于 `class` 的某个方法
pub fn can_apply(advisor: &Advisor, class: &Class, has_introductions: bool) -> bool {
    match advisor {
        Advisor::Pointcut(pointcut_advisor) => {
            let pointcut = pointcut_advisor.pointcut();
            if !pointcut.matches_class(class) {
                return false;
            }
            let introduction_aware = pointcut.is_introduction_aware();
            class.all_methods().iter().any(|method| {
                if introduction_aware {
                    pointcut.matches_method_with_introductions(method, class, has_introductions)
                } else {
                    pointcut.matches_method(method, class)
                }
            })
        }
        Advisor::Introduction(introduction) => introduction.matches_class(class),
        Advisor::Plain(_) => true,
    }
}

/// 筛选出适用于 `class` 的通知器，引介通知器优先判断
pub fn find_advisors_that_can_apply(candidates: &[Advisor], class: &Class) -> Vec<Advisor> {
    let mut eligible: Vec<Advisor> = candidates
        .iter()
        .filter(|advisor| advisor.is_introduction() && can_apply(advisor, class, false))
        .cloned()
        .collect();
    let has_introductions = !eligible.is_empty();
    eligible.extend(
        candidates
            .iter()
            .filter(|advisor| !advisor.is_introduction() && can_apply(advisor, class, has_introductions))
            .cloned(),
    );
    eligible
}

/// 切面自动代理创建器
///
/// ```ignore
/// let creator = AspectAutoProxyCreator::from_settings(registry.clone(), &settings)?;
/// let service = creator.post_process_after_initialization(service, "orderService")?;
/// ```
pub struct AspectAutoProxyCreator {
    builder: AspectAdvisorsBuilder,
    advisor_factory: Arc<dyn AdvisorFactory>,
    proxy_config: ProxyConfig,
    enabled: bool,
    /// 组件名称 -> 是否被代理
    advised_components: RwLock<HashMap<String, bool>>,
}

impl AspectAutoProxyCreator {
    pub fn new(registry: Arc<dyn ComponentRegistry>) -> Self {
        let advisor_factory: Arc<dyn AdvisorFactory> = Arc::new(DescriptorAdvisorFactory::new());
        Self::with_builder(
            AspectAdvisorsBuilder::new(registry, advisor_factory.clone()),
            advisor_factory,
        )
    }

    pub fn with_builder(builder: AspectAdvisorsBuilder, advisor_factory: Arc<dyn AdvisorFactory>) -> Self {
        Self {
            builder,
            advisor_factory,
            proxy_config: ProxyConfig::default(),
            enabled: true,
            advised_components: RwLock::new(HashMap::new()),
        }
    }

    /// 按 `[aop]` 配置段创建
    pub fn from_settings(registry: Arc<dyn ComponentRegistry>, settings: &AopSettings) -> AopResult<Self> {
        let advisor_factory: Arc<dyn AdvisorFactory> = Arc::new(DescriptorAdvisorFactory::new());
        let builder = AspectAdvisorsBuilder::new(registry, advisor_factory.clone())
            .with_include_patterns(&settings.aop.include_patterns)?;
        Ok(Self::with_builder(builder, advisor_factory)
            .with_proxy_config(settings.aop.proxy)
            .enabled(settings.aop.enabled))
    }

    pub fn with_proxy_config(mut self, proxy_config: ProxyConfig) -> Self {
        self.proxy_config = proxy_config;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn builder(&self) -> &AspectAdvisorsBuilder {
        &self.builder
    }

    /// 组件是否已被代理；未处理过时返回 None
    pub fn is_advised(&self, name: &str) -> Option<bool> {
        self.advised_components.read().get(name).copied()
    }

    /// 适用于 `class` 的全部切面通知器，已按优先级排序
    pub fn find_eligible_advisors(&self, class: &Class) -> AopResult<Vec<Advisor>> {
        let candidates = self.builder.build_advisors()?;
        let eligible = find_advisors_that_can_apply(&candidates, class);
        Ok(sort_advisors(eligible))
    }

    /// 需要时为组件创建代理，否则原样返回
    pub fn wrap_if_necessary(
        &self,
        name: &str,
        target: Arc<dyn TargetObject>,
    ) -> AopResult<Arc<dyn TargetObject>> {
        if !self.enabled || self.is_advised(name) == Some(false) {
            return Ok(target);
        }

        let class = target.target_class();
        if self.advisor_factory.is_aspect(&class) {
            tracing::trace!("Component '{}' is an aspect, skipping auto-proxy", name);
            self.advised_components.write().insert(name.to_string(), false);
            return Ok(target);
        }

        let advisors = self.find_eligible_advisors(&class)?;
        if advisors.is_empty() {
            tracing::trace!("No advisors apply to component '{}'", name);
            self.advised_components.write().insert(name.to_string(), false);
            return Ok(target);
        }

        let factory = ProxyFactory::new();
        factory.set_proxy_config(ProxyConfig {
            frozen: false,
            ..self.proxy_config
        })?;
        if !self.proxy_config.proxy_target_class {
            let interfaces: Vec<Class> = class
                .all_interfaces()
                .into_iter()
                .filter(|interface| !interface.is_marker() && !interface.declared_methods().is_empty())
                .collect();
            if interfaces.is_empty() {
                factory.set_proxy_target_class(true)?;
            }
            for interface in interfaces {
                factory.add_interface(interface)?;
            }
        }
        factory.set_target(target);
        factory.set_pre_filtered(true);
        let advisor_count = advisors.len();
        factory.add_advisors(advisors)?;
        factory.set_frozen(self.proxy_config.frozen);

        let proxy = factory.get_proxy()?;
        tracing::info!(
            "Created {} proxy for component '{}' with {} advisors",
            proxy.kind(),
            name,
            advisor_count
        );
        self.advised_components.write().insert(name.to_string(), true);
        Ok(proxy.into_target())
    }

    /// 组件初始化完成后调用
    pub fn post_process_after_initialization(
        &self,
        component: Arc<dyn TargetObject>,
        name: &str,
    ) -> AopResult<Arc<dyn TargetObject>> {
        self.wrap_if_necessary(name, component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{AdviceMethod, AspectDescriptor};
    use crate::expression::PointcutExpression;
    use crate::invocation::MethodInvocation;
    use crate::metadata::{value, FnTarget};
    use crate::registry::{Scope, SimpleComponentRegistry};
    use parking_lot::Mutex;

    struct Tracer {
        calls: Mutex<Vec<String>>,
    }

    fn tracer_aspect() -> Class {
        Class::concrete("Tracer")
            .aspect(AspectDescriptor::singleton().advice(AdviceMethod::around(
                "trace",
                PointcutExpression::execution("* Order*.*(..)").into_pointcut(),
                |tracer: &Tracer, inv: &mut MethodInvocation| {
                    tracer.calls.lock().push(inv.method().name().to_string());
                    inv.proceed()
                },
            )))
            .build()
    }

    fn registry() -> Arc<SimpleComponentRegistry> {
        let registry = Arc::new(SimpleComponentRegistry::new());
        registry.register("tracer", Some(tracer_aspect()), Scope::Singleton, || {
            Ok(value(Tracer {
                calls: Mutex::new(Vec::new()),
            }))
        });
        registry
    }

    fn service(class: &Class) -> Arc<dyn TargetObject> {
        Arc::new(FnTarget::new(class.clone(), |_, _| Ok(value(7u32))))
    }

    #[test]
    fn test_wraps_matching_component() {
        let registry = registry();
        let creator = AspectAutoProxyCreator::new(registry.clone());
        let orders = Class::interface("Orders").method("place", &[]).build();
        let order_service = Class::concrete("OrderService").implements(&orders).build();

        let wrapped = creator
            .post_process_after_initialization(service(&order_service), "orderService")
            .unwrap();
        assert!(wrapped.target_class().is_proxy_class());
        assert_eq!(creator.is_advised("orderService"), Some(true));

        let place = orders.method("place").unwrap();
        assert_eq!(wrapped.invoke(&place, &[]).unwrap().downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn test_class_without_interfaces_gets_subclass_proxy() {
        let creator = AspectAutoProxyCreator::new(registry());
        let order_job = Class::concrete("OrderJob").method("run", &[]).build();
        let advisors = creator.find_eligible_advisors(&order_job).unwrap();
        assert_eq!(advisors.len(), 1);

        let wrapped = creator.wrap_if_necessary("orderJob", service(&order_job)).unwrap();
        assert!(wrapped.target_class().is_assignable_to(&order_job));
        assert!(!wrapped.target_class().is_proxy_class());

        let run = order_job.method("run").unwrap();
        assert_eq!(wrapped.invoke(&run, &[]).unwrap().downcast_ref::<u32>(), Some(&7));
        assert_eq!(creator.is_advised("orderJob"), Some(true));
    }

    #[test]
    fn test_skips_aspects_and_unadvised_components() {
        let creator = AspectAutoProxyCreator::new(registry());

        let aspect_target = service(&tracer_aspect());
        let same = creator.wrap_if_necessary("tracer", aspect_target.clone()).unwrap();
        assert!(Arc::ptr_eq(&same, &aspect_target));
        assert_eq!(creator.is_advised("tracer"), Some(false));

        let clock = Class::concrete("Clock").method("now", &[]).build();
        let clock_target = service(&clock);
        let same = creator.wrap_if_necessary("clock", clock_target.clone()).unwrap();
        assert!(Arc::ptr_eq(&same, &clock_target));
        assert_eq!(creator.is_advised("clock"), Some(false));
    }

    #[test]
    fn test_disabled_by_settings() {
        let settings = AopSettings::from_toml_str("[aop]\nenabled = false").unwrap();
        let creator = AspectAutoProxyCreator::from_settings(registry(), &settings).unwrap();
        let order_job = Class::concrete("OrderJob").method("run", &[]).build();
        let target = service(&order_job);
        let same = creator.wrap_if_necessary("orderJob", target.clone()).unwrap();
        assert!(Arc::ptr_eq(&same, &target));
        assert_eq!(creator.is_advised("orderJob"), None);
    }
}
