//! 拦截器链构建
//!
//! 按通知器的输入顺序逐个判断是否适用于某个方法，输出的链保持同样的顺序。
//! 构建过程不持锁也不缓存，缓存由 `AdvisedSupport` 负责。

use crate::adapter::{global_adapter_registry, AdvisorAdapterRegistry};
use crate::advised::AdvisedSupport;
use crate::advisor::Advisor;
use crate::error::AopResult;
use crate::invocation::ChainElement;
use crate::metadata::{Class, Method, Value};
use crate::pointcut::Pointcut;
use std::sync::Arc;

/// 拦截器链工厂 Trait
pub trait AdvisorChainFactory: Send + Sync {
    /// 构建 `method` 在 `target_class` 上的拦截器链；未给出目标类型时使用方法的声明类型
    fn build_chain(
        &self,
        config: &AdvisedSupport,
        method: &Method,
        target_class: Option<&Class>,
    ) -> AopResult<Vec<ChainElement>>;
}

/// 默认拦截器链工厂
pub struct DefaultAdvisorChainFactory {
    adapters: Arc<AdvisorAdapterRegistry>,
}

impl DefaultAdvisorChainFactory {
    pub fn new() -> Self {
        Self::with_adapters(global_adapter_registry().clone())
    }

    pub fn with_adapters(adapters: Arc<AdvisorAdapterRegistry>) -> Self {
        Self { adapters }
    }

    fn static_elements(&self, advisor: &Advisor) -> AopResult<impl Iterator<Item = ChainElement>> {
        Ok(self
            .adapters
            .get_interceptors(advisor)?
            .into_iter()
            .map(ChainElement::Static))
    }
}

impl Default for DefaultAdvisorChainFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// 适用于 `class` 的引介通知器所引介的全部接口
fn introduced_interfaces(advisors: &[Advisor], class: &Class) -> Arc<[Class]> {
    advisors
        .iter()
        .filter_map(|advisor| match advisor {
            Advisor::Introduction(introduction) if introduction.matches_class(class) => {
                Some(introduction.interfaces().to_vec())
            }
            _ => None,
        })
        .flatten()
        .collect()
}

/// 调用时匹配带上引介接口的切点
struct IntroducedTypesMatcher {
    inner: Arc<dyn Pointcut>,
    introduced: Arc<[Class]>,
}

impl Pointcut for IntroducedTypesMatcher {
    fn matches_class(&self, class: &Class) -> bool {
        self.inner.matches_class(class)
    }

    fn matches_method(&self, method: &Method, target_class: &Class) -> bool {
        self.inner
            .matches_method_with_introductions(method, target_class, !self.introduced.is_empty())
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_invocation(&self, method: &Method, target_class: &Class, args: &[Value]) -> bool {
        self.inner
            .matches_invocation_with_introductions(method, target_class, args, &self.introduced)
    }

    fn is_introduction_aware(&self) -> bool {
        true
    }
}

impl AdvisorChainFactory for DefaultAdvisorChainFactory {
    fn build_chain(
        &self,
        config: &AdvisedSupport,
        method: &Method,
        target_class: Option<&Class>,
    ) -> AopResult<Vec<ChainElement>> {
        let advisors = config.advisors();
        let actual_class = target_class
            .cloned()
            .unwrap_or_else(|| method.declaring_class().clone());
        let pre_filtered = config.is_pre_filtered();
        let mut introduced: Option<Arc<[Class]>> = None;
        let mut chain = Vec::with_capacity(advisors.len());

        for advisor in advisors.iter() {
            match advisor {
                Advisor::Pointcut(pointcut_advisor) => {
                    let pointcut = pointcut_advisor.pointcut();
                    if !pre_filtered && !pointcut.matches_class(&actual_class) {
                        continue;
                    }

                    let introduction_aware = pointcut.is_introduction_aware();
                    let matched = if introduction_aware {
                        let introduced = introduced
                            .get_or_insert_with(|| introduced_interfaces(&advisors, &actual_class));
                        pointcut.matches_method_with_introductions(
                            method,
                            &actual_class,
                            !introduced.is_empty(),
                        )
                    } else {
                        pointcut.matches_method(method, &actual_class)
                    };
                    if !matched {
                        continue;
                    }

                    let interceptors = self.adapters.get_interceptors(advisor)?;
                    if pointcut.is_runtime() {
                        // 调用时再用实际参数匹配
                        let matcher: Arc<dyn Pointcut> = match (&introduced, introduction_aware) {
                            (Some(introduced), true) if !introduced.is_empty() => {
                                Arc::new(IntroducedTypesMatcher {
                                    inner: pointcut.clone(),
                                    introduced: introduced.clone(),
                                })
                            }
                            _ => pointcut.clone(),
                        };
                        chain.extend(interceptors.into_iter().map(|interceptor| {
                            ChainElement::Dynamic {
                                interceptor,
                                matcher: matcher.clone(),
                            }
                        }));
                    } else {
                        chain.extend(interceptors.into_iter().map(ChainElement::Static));
                    }
                }
                Advisor::Introduction(introduction) => {
                    if pre_filtered || introduction.matches_class(&actual_class) {
                        chain.extend(self.static_elements(advisor)?);
                    }
                }
                Advisor::Plain(_) => chain.extend(self.static_elements(advisor)?),
            }
        }

        tracing::trace!(
            "Built chain of {} interceptors for {} on {}",
            chain.len(),
            method.name(),
            actual_class
        );
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::Advice;
    use crate::advisor::DefaultIntroductionAdvisor;
    use crate::expression::PointcutExpression;
    use crate::invocation::MethodInvocation;
    use crate::metadata::{value, FnTarget};

    fn noop() -> Advice {
        Advice::interceptor(|inv: &mut MethodInvocation| inv.proceed())
    }

    fn account() -> Class {
        Class::concrete("Account")
            .method("deposit", &["u64"])
            .method("balance", &[])
            .build()
    }

    fn config(advisors: Vec<Advisor>) -> AdvisedSupport {
        let config = AdvisedSupport::new();
        for advisor in advisors {
            config.add_advisor(advisor).unwrap();
        }
        config
    }

    #[test]
    fn test_static_and_dynamic_elements() {
        let class = account();
        let deposit = class.method("deposit").unwrap();
        let config = config(vec![
            Advisor::with_pointcut(
                PointcutExpression::method_pattern("deposit").into_pointcut(),
                noop(),
            ),
            Advisor::with_pointcut(
                PointcutExpression::method_pattern("balance").into_pointcut(),
                noop(),
            ),
            Advisor::with_pointcut(
                PointcutExpression::args(|args| !args.is_empty()).into_pointcut(),
                noop(),
            ),
            Advisor::plain(noop()),
        ]);

        let chain = DefaultAdvisorChainFactory::new()
            .build_chain(&config, &deposit, Some(&class))
            .unwrap();
        let dynamic: Vec<bool> = chain.iter().map(ChainElement::is_dynamic).collect();
        assert_eq!(dynamic, vec![false, true, false]);
    }

    #[test]
    fn test_class_filter_and_pre_filtered_bypass() {
        let class = account();
        let deposit = class.method("deposit").unwrap();
        let config = config(vec![Advisor::with_pointcut(
            PointcutExpression::type_pattern("Ledger").into_pointcut(),
            noop(),
        )]);
        let factory = DefaultAdvisorChainFactory::new();

        assert!(factory.build_chain(&config, &deposit, Some(&class)).unwrap().is_empty());

        // 预筛选过的配置跳过类型过滤，但仍然匹配方法
        config.set_pre_filtered(true);
        assert_eq!(
            factory.build_chain(&config, &deposit, Some(&class)).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_introduction_awareness() {
        let class = account();
        let deposit = class.method("deposit").unwrap();
        let auditable = Class::interface("Auditable").method("audit_trail", &[]).build();
        let delegate = Arc::new(FnTarget::new(auditable.clone(), |_, _| Ok(value("trail"))));
        let introduction = DefaultIntroductionAdvisor::new(delegate, vec![auditable]).unwrap();

        let this_auditable = Advisor::with_pointcut(
            PointcutExpression::this("Auditable").into_pointcut(),
            noop(),
        );
        let factory = DefaultAdvisorChainFactory::new();

        let without = config(vec![this_auditable.clone()]);
        assert!(factory.build_chain(&without, &deposit, Some(&class)).unwrap().is_empty());

        let with = config(vec![
            Advisor::Introduction(Arc::new(introduction)),
            this_auditable,
        ]);
        assert_eq!(factory.build_chain(&with, &deposit, Some(&class)).unwrap().len(), 2);
    }

    #[test]
    fn test_runtime_this_sees_introduced_interfaces() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let class = account();
        let deposit = class.method("deposit").unwrap();
        let auditable = Class::interface("Auditable").method("audit_trail", &[]).build();
        let delegate = Arc::new(FnTarget::new(auditable.clone(), |_, _| Ok(value("trail"))));
        let introduction = DefaultIntroductionAdvisor::new(delegate, vec![auditable]).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let audited = Advisor::with_pointcut(
            PointcutExpression::this("Auditable")
                .and(PointcutExpression::args(|_| true))
                .into_pointcut(),
            Advice::interceptor(move |inv: &mut MethodInvocation| {
                counter.fetch_add(1, Ordering::SeqCst);
                inv.proceed()
            }),
        );
        let config = config(vec![Advisor::Introduction(Arc::new(introduction)), audited]);

        let chain = DefaultAdvisorChainFactory::new()
            .build_chain(&config, &deposit, Some(&class))
            .unwrap();
        let dynamic: Vec<bool> = chain.iter().map(ChainElement::is_dynamic).collect();
        assert_eq!(dynamic, vec![false, true]);

        let target: Arc<dyn crate::metadata::TargetObject> =
            Arc::new(FnTarget::new(class.clone(), |_, _| Ok(value(0u64))));
        let mut invocation =
            MethodInvocation::new(Some(target), deposit, vec![value(5u64)], class, Arc::new(chain));
        invocation.proceed().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_declaring_class_is_default_target() {
        let class = account();
        let balance = class.method("balance").unwrap();
        let config = config(vec![Advisor::with_pointcut(
            PointcutExpression::type_pattern("Account").into_pointcut(),
            noop(),
        )]);
        let chain = DefaultAdvisorChainFactory::new()
            .build_chain(&config, &balance, None)
            .unwrap();
        assert_eq!(chain.len(), 1);
    }
}
