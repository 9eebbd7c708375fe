//! 通知工厂与通知器工厂
//!
//! `AdviceFactory` 把切面上的一个通知方法变成可执行的通知；
//! `AdvisorFactory` 为一个切面生成全部通知器。

use crate::advice::{Advice, AdviceKind, AfterReturningAdvice, MethodBeforeAdvice};
use crate::advisor::{Advisor, DefaultPointcutAdvisor};
use crate::aspect::{
    AdviceBody, AdviceMethod, AspectInstanceFactory, LazySingletonAspectInstanceFactory,
};
use crate::error::{AopError, AopResult};
use crate::instantiation::InstantiationModelAwarePointcutAdvisor;
use crate::invocation::{MethodInterceptor, MethodInvocation};
use crate::metadata::{Class, Value};
use crate::pointcut::Pointcut;
use std::sync::Arc;

/// 通知工厂 Trait
pub trait AdviceFactory: Send + Sync {
    /// 生成通知；只声明切点的方法返回 None
    fn produce_advice(
        &self,
        method: &AdviceMethod,
        pointcut: &Arc<dyn Pointcut>,
        instance_factory: &Arc<dyn AspectInstanceFactory>,
        declaration_order: usize,
        aspect_name: &str,
    ) -> Option<Advice>;
}

/// 基于切面描述的通知
///
/// 每次执行时才向实例工厂索取切面实例。
struct AspectAdvice {
    body: AdviceBody,
    instance_factory: Arc<dyn AspectInstanceFactory>,
}

impl AspectAdvice {
    fn aspect_instance(&self) -> anyhow::Result<Value> {
        Ok(self.instance_factory.aspect_instance()?)
    }
}

impl MethodInterceptor for AspectAdvice {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Value> {
        match &self.body {
            AdviceBody::Around(body) => {
                let instance = self.aspect_instance()?;
                body(&instance, invocation)
            }
            AdviceBody::After(body) => {
                let result = invocation.proceed();
                let instance = self.aspect_instance()?;
                body(&instance, invocation)?;
                result
            }
            AdviceBody::AfterThrowing(body) => match invocation.proceed() {
                Ok(returned) => Ok(returned),
                Err(error) => {
                    let instance = self.aspect_instance()?;
                    body(&instance, invocation, &error)?;
                    Err(error)
                }
            },
            _ => invocation.proceed(),
        }
    }
}

impl MethodBeforeAdvice for AspectAdvice {
    fn before(&self, invocation: &MethodInvocation) -> anyhow::Result<()> {
        match &self.body {
            AdviceBody::Before(body) => body(&self.aspect_instance()?, invocation),
            _ => Ok(()),
        }
    }
}

impl AfterReturningAdvice for AspectAdvice {
    fn after_returning(&self, returned: &Value, invocation: &MethodInvocation) -> anyhow::Result<()> {
        match &self.body {
            AdviceBody::AfterReturning(body) => {
                body(&self.aspect_instance()?, invocation, returned)
            }
            _ => Ok(()),
        }
    }
}

/// 默认通知工厂
#[derive(Debug, Default)]
pub struct DescriptorAdviceFactory;

impl DescriptorAdviceFactory {
    pub fn new() -> Self {
        Self
    }
}

impl AdviceFactory for DescriptorAdviceFactory {
    fn produce_advice(
        &self,
        method: &AdviceMethod,
        _pointcut: &Arc<dyn Pointcut>,
        instance_factory: &Arc<dyn AspectInstanceFactory>,
        declaration_order: usize,
        aspect_name: &str,
    ) -> Option<Advice> {
        let kind = method.kind();
        if kind == AdviceKind::Pointcut {
            tracing::trace!("Processing pointcut '{}'", method.name());
            return None;
        }

        let advice = Arc::new(AspectAdvice {
            body: method.body().clone(),
            instance_factory: instance_factory.clone(),
        });
        tracing::trace!(
            "Produced {} advice '{}' for aspect '{}' (declaration order {})",
            kind,
            method.name(),
            aspect_name,
            declaration_order
        );

        Some(match kind {
            AdviceKind::Before => Advice::Before(advice),
            AdviceKind::AfterReturning => Advice::AfterReturning(advice),
            _ => Advice::Interceptor(advice),
        })
    }
}

/// 通知器工厂 Trait
pub trait AdvisorFactory: Send + Sync {
    /// 类型是否为切面
    fn is_aspect(&self, class: &Class) -> bool;

    fn validate(&self, class: &Class) -> AopResult<()> {
        if self.is_aspect(class) {
            Ok(())
        } else {
            Err(AopError::NotAnAspect(class.name().to_string()))
        }
    }

    /// 为实例工厂对应的切面生成全部通知器
    fn get_advisors(&self, instance_factory: Arc<dyn AspectInstanceFactory>) -> AopResult<Vec<Advisor>>;
}

/// 默认通知器工厂
pub struct DescriptorAdvisorFactory {
    advice_factory: Arc<dyn AdviceFactory>,
}

impl DescriptorAdvisorFactory {
    pub fn new() -> Self {
        Self::with_advice_factory(Arc::new(DescriptorAdviceFactory::new()))
    }

    pub fn with_advice_factory(advice_factory: Arc<dyn AdviceFactory>) -> Self {
        Self { advice_factory }
    }
}

impl Default for DescriptorAdvisorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorFactory for DescriptorAdvisorFactory {
    fn is_aspect(&self, class: &Class) -> bool {
        class.aspect().is_some()
    }

    fn get_advisors(&self, instance_factory: Arc<dyn AspectInstanceFactory>) -> AopResult<Vec<Advisor>> {
        let metadata = instance_factory.metadata().clone();
        self.validate(metadata.aspect_class())?;

        // 保证切面实例只创建一次
        let lazy: Arc<dyn AspectInstanceFactory> =
            Arc::new(LazySingletonAspectInstanceFactory::new(instance_factory));

        let mut methods: Vec<&AdviceMethod> = metadata
            .descriptor()
            .methods()
            .iter()
            .filter(|method| method.kind() != AdviceKind::Pointcut)
            .collect();
        methods.sort_by(|a, b| a.kind().cmp(&b.kind()).then_with(|| a.name().cmp(b.name())));

        let mut advisors: Vec<Advisor> = methods
            .into_iter()
            .enumerate()
            .map(|(declaration_order, method)| {
                Advisor::Pointcut(Arc::new(InstantiationModelAwarePointcutAdvisor::new(
                    method.clone(),
                    self.advice_factory.clone(),
                    lazy.clone(),
                    declaration_order,
                )))
            })
            .collect();

        if !advisors.is_empty() && metadata.is_lazily_instantiated() {
            advisors.insert(0, synthetic_instantiation_advisor(lazy));
        }

        tracing::debug!(
            "Found {} advisors on aspect '{}'",
            advisors.len(),
            metadata.aspect_name()
        );
        Ok(advisors)
    }
}

/// 在 per-clause 匹配时提前创建切面实例的前置通知
struct InstantiationTrigger {
    instance_factory: Arc<dyn AspectInstanceFactory>,
}

impl MethodBeforeAdvice for InstantiationTrigger {
    fn before(&self, _: &MethodInvocation) -> anyhow::Result<()> {
        self.instance_factory.aspect_instance()?;
        Ok(())
    }
}

/// 延迟实例化切面的合成通知器
pub fn synthetic_instantiation_advisor(instance_factory: Arc<dyn AspectInstanceFactory>) -> Advisor {
    let pointcut = instance_factory.metadata().per_clause_pointcut().clone();
    let order = instance_factory.order();
    let advice = Advice::Before(Arc::new(InstantiationTrigger { instance_factory }));
    Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::new(pointcut, advice).with_order(order)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{AspectDescriptor, SingletonAspectInstanceFactory};
    use crate::expression::PointcutExpression;
    use crate::invocation::ChainElement;
    use crate::metadata::{value, FnTarget, TargetObject};
    use crate::pointcut::always;
    use crate::registry::{ComponentRegistry, Scope, SimpleComponentRegistry};
    use parking_lot::Mutex;

    struct Journal(Mutex<Vec<String>>);

    fn journal_descriptor() -> AspectDescriptor {
        AspectDescriptor::singleton()
            .advice(AdviceMethod::pointcut_declaration("anything", always()))
            .advice(AdviceMethod::after("finally", always(), |j: &Journal, _: &MethodInvocation| {
                j.0.lock().push("after".into());
                Ok(())
            }))
            .advice(AdviceMethod::before("enter", always(), |j: &Journal, _: &MethodInvocation| {
                j.0.lock().push("before".into());
                Ok(())
            }))
            .advice(AdviceMethod::around(
                "wrap",
                always(),
                |j: &Journal, inv: &mut MethodInvocation| {
                    j.0.lock().push("around".into());
                    inv.proceed()
                },
            ))
            .advice(AdviceMethod::after_throwing(
                "failed",
                always(),
                |j: &Journal, _: &MethodInvocation, e: &anyhow::Error| {
                    j.0.lock().push(format!("threw {}", e));
                    Ok(())
                },
            ))
    }

    fn setup(descriptor: AspectDescriptor) -> (Arc<SimpleComponentRegistry>, Arc<dyn AspectInstanceFactory>) {
        let registry = Arc::new(SimpleComponentRegistry::new());
        let class = Class::concrete("JournalAspect").aspect(descriptor).build();
        registry.register("journal", Some(class), Scope::Singleton, || {
            Ok(value(Journal(Mutex::new(Vec::new()))))
        });
        let factory = SingletonAspectInstanceFactory::new(registry.clone(), "journal").unwrap();
        (registry, Arc::new(factory))
    }

    #[test]
    fn test_advisors_sorted_by_kind_then_name() {
        let (_, factory) = setup(journal_descriptor());
        let advisors = DescriptorAdvisorFactory::new().get_advisors(factory).unwrap();

        let kinds: Vec<(usize, bool, bool)> = advisors
            .iter()
            .map(|a| {
                let info = a.precedence().unwrap();
                (info.declaration_order(), info.is_before_advice(), info.is_after_advice())
            })
            .collect();
        // around, before, after, after-throwing；切点声明不产生通知器
        assert_eq!(
            kinds,
            vec![(0, false, false), (1, true, false), (2, false, true), (3, false, true)]
        );
    }

    #[test]
    fn test_advice_kinds_run_in_chain_order() {
        let (registry_handle, factory) = setup(journal_descriptor());
        let advisors = DescriptorAdvisorFactory::new().get_advisors(factory).unwrap();
        let registry = crate::adapter::AdvisorAdapterRegistry::new();

        let chain: Vec<ChainElement> = advisors
            .iter()
            .flat_map(|a| registry.get_interceptors(a).unwrap())
            .map(ChainElement::Static)
            .collect();

        let class = Class::concrete("Ledger").method("post", &[]).build();
        let target: Arc<dyn TargetObject> =
            Arc::new(FnTarget::new(class.clone(), |_, _| anyhow::bail!("closed")));
        let mut invocation = MethodInvocation::new(
            Some(target),
            class.method("post").unwrap(),
            Vec::new(),
            class,
            Arc::new(chain),
        );
        assert!(invocation.proceed().is_err());

        let journal = registry_handle.resolve_instance("journal").unwrap();
        let journal = journal.downcast_ref::<Journal>().unwrap();
        assert_eq!(
            *journal.0.lock(),
            vec!["around", "before", "threw closed", "after"]
        );
    }

    #[test]
    fn test_lazy_aspect_gets_synthetic_advisor() {
        let per_target = PointcutExpression::type_pattern("Account").into_pointcut();
        let descriptor = AspectDescriptor::per_target(per_target).advice(AdviceMethod::before(
            "audit",
            always(),
            |_: &Journal, _: &MethodInvocation| Ok(()),
        ));
        let (_, factory) = setup(descriptor);
        let advisors = DescriptorAdvisorFactory::new().get_advisors(factory).unwrap();

        assert_eq!(advisors.len(), 2);
        assert!(advisors[0].precedence().is_none());
        assert!(matches!(advisors[0].advice(), Advice::Before(_)));
        assert!(advisors[1].is_per_instance());
    }

    #[test]
    fn test_synthetic_advisor_shares_aspect_order() {
        let per_target = PointcutExpression::type_pattern("Account").into_pointcut();
        let descriptor = AspectDescriptor::per_target(per_target)
            .with_order(1)
            .advice(AdviceMethod::before("audit", always(), |_: &Journal, _: &MethodInvocation| {
                Ok(())
            }));
        let (_, factory) = setup(descriptor);
        let advisors = DescriptorAdvisorFactory::new().get_advisors(factory).unwrap();

        assert!(advisors.iter().all(|a| a.order() == 1));
        let sorted = crate::precedence::sort_advisors(advisors);
        assert!(sorted[0].precedence().is_none());
    }

    #[test]
    fn test_non_aspect_is_rejected() {
        let factory = DescriptorAdvisorFactory::new();
        let plain = Class::concrete("Plain").build();
        assert!(!factory.is_aspect(&plain));
        assert!(matches!(factory.validate(&plain), Err(AopError::NotAnAspect(_))));
    }
}
