//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化。类型上附加 `AspectDescriptor` 即成为切面，
//! 描述里声明实例化模型和一组通知方法；通知方法运行时拿到的是切面实例。

use crate::advice::AdviceKind;
use crate::advisor::LOWEST_PRECEDENCE;
use crate::error::{AopError, AopResult};
use crate::invocation::MethodInvocation;
use crate::metadata::{Class, Value};
use crate::pointcut::{always, Pointcut};
use crate::registry::ComponentRegistry;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 切面实例化模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PerClauseKind {
    /// 整个注册表共享一个实例
    #[default]
    Singleton,
    /// 每个代理对象一个实例
    PerThis,
    /// 每个目标对象一个实例
    PerTarget,
    /// 每个匹配类型一个实例
    PerTypeWithin,
}

type AroundBody = dyn Fn(&Value, &mut MethodInvocation) -> anyhow::Result<Value> + Send + Sync;
type JoinPointBody = dyn Fn(&Value, &MethodInvocation) -> anyhow::Result<()> + Send + Sync;
type ReturningBody = dyn Fn(&Value, &MethodInvocation, &Value) -> anyhow::Result<()> + Send + Sync;
type ThrowingBody =
    dyn Fn(&Value, &MethodInvocation, &anyhow::Error) -> anyhow::Result<()> + Send + Sync;

/// 通知方法体，第一个参数是切面实例
#[derive(Clone)]
pub enum AdviceBody {
    /// 只声明切点
    None,
    Around(Arc<AroundBody>),
    Before(Arc<JoinPointBody>),
    After(Arc<JoinPointBody>),
    AfterReturning(Arc<ReturningBody>),
    AfterThrowing(Arc<ThrowingBody>),
}

impl AdviceBody {
    pub fn kind(&self) -> AdviceKind {
        match self {
            AdviceBody::None => AdviceKind::Pointcut,
            AdviceBody::Around(_) => AdviceKind::Around,
            AdviceBody::Before(_) => AdviceKind::Before,
            AdviceBody::After(_) => AdviceKind::After,
            AdviceBody::AfterReturning(_) => AdviceKind::AfterReturning,
            AdviceBody::AfterThrowing(_) => AdviceKind::AfterThrowing,
        }
    }
}

fn downcast<A: Any>(instance: &Value) -> anyhow::Result<&A> {
    instance.downcast_ref::<A>().ok_or_else(|| {
        anyhow::anyhow!(
            "Aspect instance is not of type {}",
            std::any::type_name::<A>()
        )
    })
}

/// 切面上声明的一个通知方法
#[derive(Clone)]
pub struct AdviceMethod {
    name: String,
    pointcut: Arc<dyn Pointcut>,
    body: AdviceBody,
}

impl AdviceMethod {
    /// 仅声明切点，不产生通知
    pub fn pointcut_declaration(name: impl Into<String>, pointcut: Arc<dyn Pointcut>) -> Self {
        Self {
            name: name.into(),
            pointcut,
            body: AdviceBody::None,
        }
    }

    pub fn around<A, F>(name: impl Into<String>, pointcut: Arc<dyn Pointcut>, body: F) -> Self
    where
        A: Any + Send + Sync,
        F: Fn(&A, &mut MethodInvocation) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let body: Arc<AroundBody> =
            Arc::new(move |instance: &Value, invocation: &mut MethodInvocation| {
                body(downcast::<A>(instance)?, invocation)
            });
        Self {
            name: name.into(),
            pointcut,
            body: AdviceBody::Around(body),
        }
    }

    pub fn before<A, F>(name: impl Into<String>, pointcut: Arc<dyn Pointcut>, body: F) -> Self
    where
        A: Any + Send + Sync,
        F: Fn(&A, &MethodInvocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let body: Arc<JoinPointBody> =
            Arc::new(move |instance: &Value, invocation: &MethodInvocation| {
                body(downcast::<A>(instance)?, invocation)
            });
        Self {
            name: name.into(),
            pointcut,
            body: AdviceBody::Before(body),
        }
    }

    /// 无论成功失败都执行
    pub fn after<A, F>(name: impl Into<String>, pointcut: Arc<dyn Pointcut>, body: F) -> Self
    where
        A: Any + Send + Sync,
        F: Fn(&A, &MethodInvocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let body: Arc<JoinPointBody> =
            Arc::new(move |instance: &Value, invocation: &MethodInvocation| {
                body(downcast::<A>(instance)?, invocation)
            });
        Self {
            name: name.into(),
            pointcut,
            body: AdviceBody::After(body),
        }
    }

    pub fn after_returning<A, F>(
        name: impl Into<String>,
        pointcut: Arc<dyn Pointcut>,
        body: F,
    ) -> Self
    where
        A: Any + Send + Sync,
        F: Fn(&A, &MethodInvocation, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let body: Arc<ReturningBody> = Arc::new(
            move |instance: &Value, invocation: &MethodInvocation, returned: &Value| {
                body(downcast::<A>(instance)?, invocation, returned)
            },
        );
        Self {
            name: name.into(),
            pointcut,
            body: AdviceBody::AfterReturning(body),
        }
    }

    pub fn after_throwing<A, F>(
        name: impl Into<String>,
        pointcut: Arc<dyn Pointcut>,
        body: F,
    ) -> Self
    where
        A: Any + Send + Sync,
        F: Fn(&A, &MethodInvocation, &anyhow::Error) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        let body: Arc<ThrowingBody> = Arc::new(
            move |instance: &Value, invocation: &MethodInvocation, error: &anyhow::Error| {
                body(downcast::<A>(instance)?, invocation, error)
            },
        );
        Self {
            name: name.into(),
            pointcut,
            body: AdviceBody::AfterThrowing(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pointcut(&self) -> &Arc<dyn Pointcut> {
        &self.pointcut
    }

    pub fn body(&self) -> &AdviceBody {
        &self.body
    }

    pub fn kind(&self) -> AdviceKind {
        self.body.kind()
    }
}

impl fmt::Debug for AdviceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceMethod")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// 切面描述
#[derive(Clone, Default)]
pub struct AspectDescriptor {
    per_clause: PerClauseKind,
    per_clause_pointcut: Option<Arc<dyn Pointcut>>,
    order: Option<i32>,
    methods: Vec<AdviceMethod>,
}

impl AspectDescriptor {
    /// 单例切面
    pub fn singleton() -> Self {
        Self::default()
    }

    pub fn per_this(pointcut: Arc<dyn Pointcut>) -> Self {
        Self::with_per_clause(PerClauseKind::PerThis, pointcut)
    }

    pub fn per_target(pointcut: Arc<dyn Pointcut>) -> Self {
        Self::with_per_clause(PerClauseKind::PerTarget, pointcut)
    }

    pub fn per_type_within(pointcut: Arc<dyn Pointcut>) -> Self {
        Self::with_per_clause(PerClauseKind::PerTypeWithin, pointcut)
    }

    fn with_per_clause(per_clause: PerClauseKind, pointcut: Arc<dyn Pointcut>) -> Self {
        Self {
            per_clause,
            per_clause_pointcut: Some(pointcut),
            ..Self::default()
        }
    }

    /// 设置切面的优先级
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// 添加通知方法，声明顺序即添加顺序
    pub fn advice(mut self, method: AdviceMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn per_clause_kind(&self) -> PerClauseKind {
        self.per_clause
    }

    pub fn order(&self) -> Option<i32> {
        self.order
    }

    pub fn methods(&self) -> &[AdviceMethod] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&AdviceMethod> {
        self.methods.iter().find(|m| m.name() == name)
    }
}

impl fmt::Debug for AspectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectDescriptor")
            .field("per_clause", &self.per_clause)
            .field("order", &self.order)
            .field("methods", &self.methods)
            .finish()
    }
}

/// 切面元数据
#[derive(Clone)]
pub struct AspectMetadata {
    aspect_name: String,
    aspect_class: Class,
    descriptor: Arc<AspectDescriptor>,
    per_clause_pointcut: Arc<dyn Pointcut>,
}

impl AspectMetadata {
    pub fn new(aspect_class: &Class, aspect_name: impl Into<String>) -> AopResult<Self> {
        let descriptor = aspect_class
            .aspect()
            .cloned()
            .ok_or_else(|| AopError::NotAnAspect(aspect_class.name().to_string()))?;

        let per_clause_pointcut = match descriptor.per_clause {
            PerClauseKind::Singleton => always(),
            _ => descriptor
                .per_clause_pointcut
                .clone()
                .unwrap_or_else(always),
        };

        Ok(Self {
            aspect_name: aspect_name.into(),
            aspect_class: aspect_class.clone(),
            descriptor,
            per_clause_pointcut,
        })
    }

    pub fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    pub fn aspect_class(&self) -> &Class {
        &self.aspect_class
    }

    pub fn descriptor(&self) -> &Arc<AspectDescriptor> {
        &self.descriptor
    }

    pub fn kind(&self) -> PerClauseKind {
        self.descriptor.per_clause
    }

    /// 单例切面恒为全匹配
    pub fn per_clause_pointcut(&self) -> &Arc<dyn Pointcut> {
        &self.per_clause_pointcut
    }

    /// 非单例切面在 per-clause 第一次匹配时才创建实例
    pub fn is_lazily_instantiated(&self) -> bool {
        self.kind() != PerClauseKind::Singleton
    }
}

impl fmt::Debug for AspectMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectMetadata")
            .field("aspect_name", &self.aspect_name)
            .field("aspect_class", &self.aspect_class.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// 切面实例工厂 Trait
pub trait AspectInstanceFactory: Send + Sync {
    fn aspect_instance(&self) -> AopResult<Value>;

    fn metadata(&self) -> &AspectMetadata;

    fn order(&self) -> i32;

    /// 实例是否已经创建
    fn is_materialized(&self) -> bool {
        true
    }
}

fn descriptor_order(metadata: &AspectMetadata) -> i32 {
    metadata.descriptor().order().unwrap_or(LOWEST_PRECEDENCE)
}

/// 从注册表获取切面实例的工厂
///
/// 是否共享实例由注册表的作用域决定。
pub struct SingletonAspectInstanceFactory {
    registry: Arc<dyn ComponentRegistry>,
    name: String,
    metadata: AspectMetadata,
}

impl SingletonAspectInstanceFactory {
    pub fn new(registry: Arc<dyn ComponentRegistry>, name: impl Into<String>) -> AopResult<Self> {
        let name = name.into();
        let class = registry
            .resolve_type(&name)
            .ok_or_else(|| AopError::NoSuchComponent(name.clone()))?;
        Self::with_class(registry, name, &class)
    }

    pub fn with_class(
        registry: Arc<dyn ComponentRegistry>,
        name: impl Into<String>,
        class: &Class,
    ) -> AopResult<Self> {
        let name = name.into();
        let metadata = AspectMetadata::new(class, name.clone())?;
        Ok(Self {
            registry,
            name,
            metadata,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AspectInstanceFactory for SingletonAspectInstanceFactory {
    fn aspect_instance(&self) -> AopResult<Value> {
        self.registry.resolve_instance(&self.name)
    }

    fn metadata(&self) -> &AspectMetadata {
        &self.metadata
    }

    fn order(&self) -> i32 {
        descriptor_order(&self.metadata)
    }
}

/// 每次获取都创建新切面实例的工厂
pub struct PrototypeAspectInstanceFactory {
    inner: SingletonAspectInstanceFactory,
}

impl PrototypeAspectInstanceFactory {
    pub fn new(registry: Arc<dyn ComponentRegistry>, name: impl Into<String>) -> AopResult<Self> {
        let name = name.into();
        if registry.is_singleton(&name)? {
            return Err(AopError::InvalidConfig(format!(
                "Cannot use a prototype aspect instance factory with component '{}': not a prototype",
                name
            )));
        }
        Ok(Self {
            inner: SingletonAspectInstanceFactory::new(registry, name)?,
        })
    }
}

impl AspectInstanceFactory for PrototypeAspectInstanceFactory {
    fn aspect_instance(&self) -> AopResult<Value> {
        self.inner.aspect_instance()
    }

    fn metadata(&self) -> &AspectMetadata {
        self.inner.metadata()
    }

    fn order(&self) -> i32 {
        self.inner.order()
    }
}

/// 只创建一次实例的装饰器
///
/// 物化是单向的：一旦创建，`is_materialized` 永远为 true。
pub struct LazySingletonAspectInstanceFactory {
    inner: Arc<dyn AspectInstanceFactory>,
    instance: OnceCell<Value>,
}

impl LazySingletonAspectInstanceFactory {
    pub fn new(inner: Arc<dyn AspectInstanceFactory>) -> Self {
        Self {
            inner,
            instance: OnceCell::new(),
        }
    }
}

impl AspectInstanceFactory for LazySingletonAspectInstanceFactory {
    fn aspect_instance(&self) -> AopResult<Value> {
        self.instance
            .get_or_try_init(|| self.inner.aspect_instance())
            .cloned()
    }

    fn metadata(&self) -> &AspectMetadata {
        self.inner.metadata()
    }

    fn order(&self) -> i32 {
        self.inner.order()
    }

    fn is_materialized(&self) -> bool {
        self.instance.get().is_some()
    }
}

/// 通知方法的可序列化引用
///
/// 通知器被恢复后通过它重新定位通知方法。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdviceMethodRef {
    pub aspect_class: String,
    pub method: String,
}

impl AdviceMethodRef {
    pub fn of(aspect_class: &Class, method: &AdviceMethod) -> Self {
        Self {
            aspect_class: aspect_class.name().to_string(),
            method: method.name().to_string(),
        }
    }

    /// 在 `class` 的切面描述中重新查找通知方法
    pub fn resolve(&self, class: &Class) -> AopResult<AdviceMethod> {
        class
            .aspect()
            .filter(|_| class.name() == self.aspect_class)
            .and_then(|descriptor| descriptor.method(&self.method))
            .cloned()
            .ok_or_else(|| AopError::AdviceMethodNotFound {
                class: self.aspect_class.clone(),
                method: self.method.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::PointcutExpression;
    use crate::metadata::value;
    use crate::registry::{Scope, SimpleComponentRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracer;

    fn tracer_class(descriptor: AspectDescriptor) -> Class {
        Class::concrete("Tracer").aspect(descriptor).build()
    }

    fn trace_descriptor() -> AspectDescriptor {
        AspectDescriptor::singleton()
            .with_order(5)
            .advice(AdviceMethod::pointcut_declaration(
                "services",
                PointcutExpression::type_pattern("*Service").into_pointcut(),
            ))
            .advice(AdviceMethod::before(
                "trace",
                always(),
                |_: &Tracer, _: &MethodInvocation| Ok(()),
            ))
    }

    #[test]
    fn test_metadata_requires_aspect_descriptor() {
        let plain = Class::concrete("Plain").build();
        assert!(matches!(
            AspectMetadata::new(&plain, "plain"),
            Err(AopError::NotAnAspect(name)) if name == "Plain"
        ));

        let metadata = AspectMetadata::new(&tracer_class(trace_descriptor()), "tracer").unwrap();
        assert_eq!(metadata.kind(), PerClauseKind::Singleton);
        assert!(!metadata.is_lazily_instantiated());
        assert_eq!(metadata.descriptor().methods().len(), 2);
        assert_eq!(metadata.descriptor().methods()[0].kind(), AdviceKind::Pointcut);
    }

    #[test]
    fn test_per_target_is_lazy() {
        let descriptor = AspectDescriptor::per_target(
            PointcutExpression::type_pattern("Account").into_pointcut(),
        );
        let metadata = AspectMetadata::new(&tracer_class(descriptor), "tracer").unwrap();
        assert!(metadata.is_lazily_instantiated());

        let descriptor = AspectDescriptor::per_type_within(always());
        let metadata = AspectMetadata::new(&tracer_class(descriptor), "tracer").unwrap();
        assert!(metadata.is_lazily_instantiated());
    }

    #[test]
    fn test_prototype_factory_rejects_singleton_component() {
        let registry = Arc::new(SimpleComponentRegistry::new());
        registry.register_instance("tracer", tracer_class(trace_descriptor()), value(Tracer));
        let err = PrototypeAspectInstanceFactory::new(registry, "tracer").err();
        assert!(matches!(err, Some(AopError::InvalidConfig(_))));
    }

    #[test]
    fn test_lazy_factory_materializes_once() {
        let registry = Arc::new(SimpleComponentRegistry::new());
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        registry.register(
            "tracer",
            Some(tracer_class(trace_descriptor())),
            Scope::Prototype,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(value(Tracer))
            },
        );

        let prototype = Arc::new(PrototypeAspectInstanceFactory::new(registry, "tracer").unwrap());
        assert_eq!(prototype.order(), 5);

        let lazy = LazySingletonAspectInstanceFactory::new(prototype);
        assert!(!lazy.is_materialized());
        let first = lazy.aspect_instance().unwrap();
        let second = lazy.aspect_instance().unwrap();
        assert!(lazy.is_materialized());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_advice_method_ref_resolution() {
        let class = tracer_class(trace_descriptor());
        let method = class.aspect().unwrap().method("trace").unwrap().clone();
        let reference = AdviceMethodRef::of(&class, &method);
        assert_eq!(reference.resolve(&class).unwrap().name(), "trace");

        let missing = AdviceMethodRef {
            aspect_class: "Tracer".to_string(),
            method: "gone".to_string(),
        };
        assert!(matches!(
            missing.resolve(&class),
            Err(AopError::AdviceMethodNotFound { method, .. }) if method == "gone"
        ));
    }

    #[test]
    fn test_body_rejects_foreign_instance() {
        let method = AdviceMethod::before("trace", always(), |_: &Tracer, _: &MethodInvocation| {
            Ok(())
        });
        let class = Class::concrete("Door").method("open", &[]).build();
        let invocation = MethodInvocation::new(
            None,
            class.method("open").unwrap(),
            Vec::new(),
            class,
            Arc::new(Vec::new()),
        );
        let AdviceBody::Before(body) = method.body() else {
            panic!("expected before body");
        };
        assert!(body(&value(42u8), &invocation).is_err());
        assert!(body(&value(Tracer), &invocation).is_ok());
    }
}
