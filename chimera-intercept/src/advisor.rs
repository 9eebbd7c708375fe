//! 通知器（Advisor）
//!
//! 通知器 = 切点 + 通知。按能力分为三类：带切点的、引介的、无条件的，
//! 链构建时按标签分派，而不是做运行时类型判断。

use crate::advice::Advice;
use crate::error::{AopError, AopResult};
use crate::invocation::{MethodInterceptor, MethodInvocation};
use crate::metadata::{Class, TargetObject, Value};
use crate::pointcut::{always, ClassFilter, Pointcut};
use std::fmt;
use std::sync::Arc;

/// 优先级最高的 order 值
pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;

/// 优先级最低的 order 值（默认）
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// 同一切面内通知的排序信息
pub trait PrecedenceInformation: Send + Sync {
    fn aspect_name(&self) -> &str;

    fn declaration_order(&self) -> usize;

    fn is_before_advice(&self) -> bool;

    fn is_after_advice(&self) -> bool;
}

/// 带切点的通知器
pub trait PointcutAdvisor: Send + Sync {
    fn pointcut(&self) -> Arc<dyn Pointcut>;

    fn advice(&self) -> Advice;

    /// 跨切面的优先级，值越小越先执行
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    /// 是否每个目标一份通知实例
    fn is_per_instance(&self) -> bool {
        false
    }

    fn precedence(&self) -> Option<&dyn PrecedenceInformation> {
        None
    }
}

/// 引介通知器：为类型增加接口能力，只按类型匹配
pub trait IntroductionAdvisor: Send + Sync {
    fn matches_class(&self, class: &Class) -> bool;

    /// 引介的接口
    fn interfaces(&self) -> &[Class];

    fn advice(&self) -> Advice;

    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    fn validate_interfaces(&self) -> AopResult<()> {
        match self.interfaces().iter().find(|ifc| !ifc.is_interface()) {
            Some(ifc) => Err(AopError::NotAnInterface(ifc.name().to_string())),
            None => Ok(()),
        }
    }
}

/// 通知器
#[derive(Clone)]
pub enum Advisor {
    Pointcut(Arc<dyn PointcutAdvisor>),
    Introduction(Arc<dyn IntroductionAdvisor>),
    /// 无切点，对所有方法生效
    Plain(Arc<DefaultAdvisor>),
}

impl Advisor {
    /// 用切点和通知创建通知器
    pub fn with_pointcut(pointcut: Arc<dyn Pointcut>, advice: Advice) -> Self {
        Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::new(pointcut, advice)))
    }

    /// 无条件通知器
    pub fn plain(advice: Advice) -> Self {
        Advisor::Plain(Arc::new(DefaultAdvisor::new(advice)))
    }

    pub fn advice(&self) -> Advice {
        match self {
            Advisor::Pointcut(advisor) => advisor.advice(),
            Advisor::Introduction(advisor) => advisor.advice(),
            Advisor::Plain(advisor) => advisor.advice.clone(),
        }
    }

    pub fn order(&self) -> i32 {
        match self {
            Advisor::Pointcut(advisor) => advisor.order(),
            Advisor::Introduction(advisor) => advisor.order(),
            Advisor::Plain(advisor) => advisor.order,
        }
    }

    pub fn is_per_instance(&self) -> bool {
        match self {
            Advisor::Pointcut(advisor) => advisor.is_per_instance(),
            _ => false,
        }
    }

    pub fn precedence(&self) -> Option<&dyn PrecedenceInformation> {
        match self {
            Advisor::Pointcut(advisor) => advisor.precedence(),
            _ => None,
        }
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self, Advisor::Introduction(_))
    }

    /// 两个通知器是否是同一个对象
    pub fn same_as(&self, other: &Advisor) -> bool {
        match (self, other) {
            (Advisor::Pointcut(a), Advisor::Pointcut(b)) => Arc::ptr_eq(a, b),
            (Advisor::Introduction(a), Advisor::Introduction(b)) => Arc::ptr_eq(a, b),
            (Advisor::Plain(a), Advisor::Plain(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Advisor::Pointcut(_) => "Pointcut",
            Advisor::Introduction(_) => "Introduction",
            Advisor::Plain(_) => "Plain",
        };
        let mut debug = f.debug_struct("Advisor");
        debug.field("kind", &kind).field("order", &self.order());
        if let Some(info) = self.precedence() {
            debug
                .field("aspect", &info.aspect_name())
                .field("declaration_order", &info.declaration_order());
        }
        debug.finish()
    }
}

/// 默认的带切点通知器
pub struct DefaultPointcutAdvisor {
    pointcut: Arc<dyn Pointcut>,
    advice: Advice,
    order: i32,
}

impl DefaultPointcutAdvisor {
    pub fn new(pointcut: Arc<dyn Pointcut>, advice: Advice) -> Self {
        Self {
            pointcut,
            advice,
            order: LOWEST_PRECEDENCE,
        }
    }

    /// 匹配所有方法
    pub fn for_all(advice: Advice) -> Self {
        Self::new(always(), advice)
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl PointcutAdvisor for DefaultPointcutAdvisor {
    fn pointcut(&self) -> Arc<dyn Pointcut> {
        self.pointcut.clone()
    }

    fn advice(&self) -> Advice {
        self.advice.clone()
    }

    fn order(&self) -> i32 {
        self.order
    }
}

/// 无条件通知器
pub struct DefaultAdvisor {
    advice: Advice,
    order: i32,
}

impl DefaultAdvisor {
    pub fn new(advice: Advice) -> Self {
        Self {
            advice,
            order: LOWEST_PRECEDENCE,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// 把引介接口上的调用转交给委托对象的拦截器
///
/// 调用的方法若不属于引介接口，则继续执行链。
pub struct DelegatingIntroductionInterceptor {
    delegate: Arc<dyn TargetObject>,
    interfaces: Vec<Class>,
}

impl DelegatingIntroductionInterceptor {
    pub fn new(delegate: Arc<dyn TargetObject>, interfaces: Vec<Class>) -> Self {
        Self {
            delegate,
            interfaces,
        }
    }

    /// 方法是否由引介接口声明
    pub fn implements_interface(&self, declaring: &Class) -> bool {
        self.interfaces
            .iter()
            .any(|ifc| ifc.is_assignable_to(declaring))
    }
}

impl MethodInterceptor for DelegatingIntroductionInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Value> {
        if self.implements_interface(invocation.method().declaring_class()) {
            return self.delegate.invoke(invocation.method(), invocation.args());
        }
        invocation.proceed()
    }
}

/// 默认的引介通知器
pub struct DefaultIntroductionAdvisor {
    class_filter: Arc<dyn ClassFilter>,
    interfaces: Vec<Class>,
    interceptor: Arc<DelegatingIntroductionInterceptor>,
    order: i32,
}

impl DefaultIntroductionAdvisor {
    /// 为所有类型引介 `interfaces`，调用由 `delegate` 处理
    pub fn new(delegate: Arc<dyn TargetObject>, interfaces: Vec<Class>) -> AopResult<Self> {
        let interceptor = Arc::new(DelegatingIntroductionInterceptor::new(
            delegate,
            interfaces.clone(),
        ));
        let advisor = Self {
            class_filter: Arc::new(|_: &Class| true),
            interfaces,
            interceptor,
            order: LOWEST_PRECEDENCE,
        };
        advisor.validate_interfaces()?;
        Ok(advisor)
    }

    pub fn with_class_filter<F: ClassFilter + 'static>(mut self, filter: F) -> Self {
        self.class_filter = Arc::new(filter);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl IntroductionAdvisor for DefaultIntroductionAdvisor {
    fn matches_class(&self, class: &Class) -> bool {
        self.class_filter.matches(class)
    }

    fn interfaces(&self) -> &[Class] {
        &self.interfaces
    }

    fn advice(&self) -> Advice {
        Advice::Interceptor(self.interceptor.clone())
    }

    fn order(&self) -> i32 {
        self.order
    }
}
