//! 感知实例化模型的切面通知器
//!
//! 单例切面在创建通知器时就生成通知；非单例切面使用
//! 动态切点，直到切面实例真正创建后才匹配声明的切点。

use crate::advice::{Advice, AdviceKind};
use crate::advisor::{PointcutAdvisor, PrecedenceInformation};
use crate::aspect::{AdviceMethod, AdviceMethodRef, AspectInstanceFactory, PerClauseKind};
use crate::error::AopResult;
use crate::factory::AdviceFactory;
use crate::metadata::{Class, Method, Value};
use crate::pointcut::{union, Pointcut};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

enum AdviceState {
    Unmaterialized,
    Materialized(Advice),
}

/// 切面通知器
pub struct InstantiationModelAwarePointcutAdvisor {
    declared_pointcut: Arc<dyn Pointcut>,
    pointcut: Arc<dyn Pointcut>,
    lazy: bool,
    aspect_class: Class,
    aspect_name: String,
    advice_method: RwLock<AdviceMethod>,
    declaration_order: usize,
    advice_factory: Arc<dyn AdviceFactory>,
    instance_factory: Arc<dyn AspectInstanceFactory>,
    advice: Mutex<AdviceState>,
    advice_instantiated: AtomicBool,
}

impl InstantiationModelAwarePointcutAdvisor {
    pub fn new(
        advice_method: AdviceMethod,
        advice_factory: Arc<dyn AdviceFactory>,
        instance_factory: Arc<dyn AspectInstanceFactory>,
        declaration_order: usize,
    ) -> Self {
        let metadata = instance_factory.metadata();
        let declared_pointcut = advice_method.pointcut().clone();
        let aspect_class = metadata.aspect_class().clone();
        let aspect_name = metadata.aspect_name().to_string();

        let (pointcut, lazy): (Arc<dyn Pointcut>, bool) = if metadata.is_lazily_instantiated() {
            // 切面实例创建前只能用 per-clause 与声明切点的并集做静态预筛
            let pre_instantiation = union(metadata.per_clause_pointcut().clone(), declared_pointcut.clone());
            let pointcut = PerTargetInstantiationModelPointcut {
                declared: declared_pointcut.clone(),
                pre_instantiation,
                instance_factory: instance_factory.clone(),
            };
            (Arc::new(pointcut), true)
        } else {
            (declared_pointcut.clone(), false)
        };

        let advisor = Self {
            declared_pointcut,
            pointcut,
            lazy,
            aspect_class,
            aspect_name,
            advice_method: RwLock::new(advice_method),
            declaration_order,
            advice_factory,
            instance_factory,
            advice: Mutex::new(AdviceState::Unmaterialized),
            advice_instantiated: AtomicBool::new(false),
        };

        if !lazy {
            advisor.advice();
        }
        advisor
    }

    fn instantiate_advice(&self) -> Advice {
        let method = self.advice_method.read().clone();
        self.advice_factory
            .produce_advice(
                &method,
                &self.declared_pointcut,
                &self.instance_factory,
                self.declaration_order,
                &self.aspect_name,
            )
            .unwrap_or(Advice::Empty)
    }

    /// 声明的切点，与实例化模型无关
    pub fn declared_pointcut(&self) -> &Arc<dyn Pointcut> {
        &self.declared_pointcut
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    /// 通知是否已经生成
    pub fn is_advice_instantiated(&self) -> bool {
        self.advice_instantiated.load(Ordering::Acquire)
    }

    pub fn aspect_instance_factory(&self) -> &Arc<dyn AspectInstanceFactory> {
        &self.instance_factory
    }

    pub fn advice_method(&self) -> AdviceMethod {
        self.advice_method.read().clone()
    }

    pub fn kind(&self) -> AdviceKind {
        self.advice_method.read().kind()
    }

    /// 通知方法的可序列化引用
    pub fn method_ref(&self) -> AdviceMethodRef {
        AdviceMethodRef::of(&self.aspect_class, &self.advice_method.read())
    }

    /// 根据引用在 `class` 上重新定位通知方法，已生成的通知会被丢弃
    pub fn rebind(&self, reference: &AdviceMethodRef, class: &Class) -> AopResult<()> {
        let method = reference.resolve(class)?;
        *self.advice_method.write() = method;

        let mut state = self.advice.lock();
        *state = AdviceState::Unmaterialized;
        self.advice_instantiated.store(false, Ordering::Release);
        Ok(())
    }
}

impl PointcutAdvisor for InstantiationModelAwarePointcutAdvisor {
    fn pointcut(&self) -> Arc<dyn Pointcut> {
        self.pointcut.clone()
    }

    fn advice(&self) -> Advice {
        let mut state = self.advice.lock();
        if let AdviceState::Materialized(advice) = &*state {
            return advice.clone();
        }

        let advice = self.instantiate_advice();
        tracing::trace!(
            "Materialized {} advice '{}' of aspect '{}'",
            self.kind(),
            self.advice_method.read().name(),
            self.aspect_name
        );
        *state = AdviceState::Materialized(advice.clone());
        self.advice_instantiated.store(true, Ordering::Release);
        advice
    }

    fn order(&self) -> i32 {
        self.instance_factory.order()
    }

    fn is_per_instance(&self) -> bool {
        self.instance_factory.metadata().kind() != PerClauseKind::Singleton
    }

    fn precedence(&self) -> Option<&dyn PrecedenceInformation> {
        Some(self)
    }
}

impl PrecedenceInformation for InstantiationModelAwarePointcutAdvisor {
    fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    fn declaration_order(&self) -> usize {
        self.declaration_order
    }

    fn is_before_advice(&self) -> bool {
        self.kind().is_before()
    }

    fn is_after_advice(&self) -> bool {
        self.kind().is_after()
    }
}

impl fmt::Debug for InstantiationModelAwarePointcutAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstantiationModelAwarePointcutAdvisor")
            .field("aspect", &self.aspect_name)
            .field("method", &self.advice_method.read().name())
            .field("kind", &self.kind())
            .field("declaration_order", &self.declaration_order)
            .field("lazy", &self.lazy)
            .finish()
    }
}

/// 延迟实例化切面使用的动态切点
///
/// 切面实例创建前，静态匹配取 per-clause 与声明切点的并集；
/// 调用时只有实例已创建且声明切点匹配才生效。
struct PerTargetInstantiationModelPointcut {
    declared: Arc<dyn Pointcut>,
    pre_instantiation: Arc<dyn Pointcut>,
    instance_factory: Arc<dyn AspectInstanceFactory>,
}

impl PerTargetInstantiationModelPointcut {
    fn is_aspect_materialized(&self) -> bool {
        self.instance_factory.is_materialized()
    }

    fn declared_matches(&self, method: &Method, target_class: &Class, has_introductions: bool) -> bool {
        if !self.declared.matches_class(target_class) {
            return false;
        }
        if self.declared.is_introduction_aware() {
            self.declared
                .matches_method_with_introductions(method, target_class, has_introductions)
        } else {
            self.declared.matches_method(method, target_class)
        }
    }
}

impl Pointcut for PerTargetInstantiationModelPointcut {
    fn matches_method(&self, method: &Method, target_class: &Class) -> bool {
        self.matches_method_with_introductions(method, target_class, false)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_invocation(&self, method: &Method, target_class: &Class, args: &[Value]) -> bool {
        self.matches_invocation_with_introductions(method, target_class, args, &[])
    }

    fn is_introduction_aware(&self) -> bool {
        self.declared.is_introduction_aware() || self.pre_instantiation.is_introduction_aware()
    }

    fn matches_method_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        has_introductions: bool,
    ) -> bool {
        (self.is_aspect_materialized() && self.declared_matches(method, target_class, has_introductions))
            || self
                .pre_instantiation
                .matches_method_with_introductions(method, target_class, has_introductions)
    }

    fn matches_invocation_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        args: &[Value],
        introduced: &[Class],
    ) -> bool {
        if !self.is_aspect_materialized()
            || !self.declared_matches(method, target_class, !introduced.is_empty())
        {
            return false;
        }
        !self.declared.is_runtime()
            || self
                .declared
                .matches_invocation_with_introductions(method, target_class, args, introduced)
    }
}
