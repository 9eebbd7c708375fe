//! 通知（Advice）定义
//!
//! 定义了在连接点执行的各种动作，以及把它们统一成拦截器的适配拦截器。

use crate::invocation::{MethodInterceptor, MethodInvocation};
use crate::metadata::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdviceKind {
    /// 仅声明切点，不产生通知
    Pointcut,
    /// 环绕通知（可以控制方法执行）
    Around,
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
}

impl AdviceKind {
    pub fn is_before(&self) -> bool {
        matches!(self, AdviceKind::Before)
    }

    pub fn is_after(&self) -> bool {
        matches!(
            self,
            AdviceKind::After | AdviceKind::AfterReturning | AdviceKind::AfterThrowing
        )
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdviceKind::Pointcut => "pointcut",
            AdviceKind::Around => "around",
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::AfterReturning => "after-returning",
            AdviceKind::AfterThrowing => "after-throwing",
        };
        f.write_str(name)
    }
}

/// 前置通知 Trait
pub trait MethodBeforeAdvice: Send + Sync {
    fn before(&self, invocation: &MethodInvocation) -> anyhow::Result<()>;
}

/// 返回后通知 Trait
pub trait AfterReturningAdvice: Send + Sync {
    fn after_returning(&self, returned: &Value, invocation: &MethodInvocation)
        -> anyhow::Result<()>;
}

/// 异常通知 Trait
///
/// 处理结束后原始错误会继续向上抛出。
pub trait ThrowsAdvice: Send + Sync {
    fn after_throwing(&self, error: &anyhow::Error, invocation: &MethodInvocation)
        -> anyhow::Result<()>;
}

/// 通知
#[derive(Clone)]
pub enum Advice {
    /// 已经是拦截器
    Interceptor(Arc<dyn MethodInterceptor>),
    Before(Arc<dyn MethodBeforeAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    Throws(Arc<dyn ThrowsAdvice>),
    /// 其它通知，需要注册对应的适配器
    Other(Arc<dyn Any + Send + Sync>),
    /// 空通知占位
    Empty,
}

impl Advice {
    pub fn interceptor<I: MethodInterceptor + 'static>(interceptor: I) -> Self {
        Advice::Interceptor(Arc::new(interceptor))
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Advice::Interceptor(_) => "interceptor",
            Advice::Before(_) => "before",
            Advice::AfterReturning(_) => "after-returning",
            Advice::Throws(_) => "throws",
            Advice::Other(_) => "other",
            Advice::Empty => "empty",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Advice::Empty)
    }

    /// 两个通知是否指向同一个对象
    pub fn same_as(&self, other: &Advice) -> bool {
        match (self, other) {
            (Advice::Interceptor(a), Advice::Interceptor(b)) => Arc::ptr_eq(a, b),
            (Advice::Before(a), Advice::Before(b)) => Arc::ptr_eq(a, b),
            (Advice::AfterReturning(a), Advice::AfterReturning(b)) => Arc::ptr_eq(a, b),
            (Advice::Throws(a), Advice::Throws(b)) => Arc::ptr_eq(a, b),
            (Advice::Other(a), Advice::Other(b)) => Arc::ptr_eq(a, b),
            (Advice::Empty, Advice::Empty) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Advice({})", self.describe())
    }
}

/// 把前置通知适配为拦截器
pub struct MethodBeforeAdviceInterceptor {
    advice: Arc<dyn MethodBeforeAdvice>,
}

impl MethodBeforeAdviceInterceptor {
    pub fn new(advice: Arc<dyn MethodBeforeAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for MethodBeforeAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Value> {
        self.advice.before(invocation)?;
        invocation.proceed()
    }
}

/// 把返回后通知适配为拦截器
pub struct AfterReturningAdviceInterceptor {
    advice: Arc<dyn AfterReturningAdvice>,
}

impl AfterReturningAdviceInterceptor {
    pub fn new(advice: Arc<dyn AfterReturningAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Value> {
        let returned = invocation.proceed()?;
        self.advice.after_returning(&returned, invocation)?;
        Ok(returned)
    }
}

/// 把异常通知适配为拦截器
pub struct ThrowsAdviceInterceptor {
    advice: Arc<dyn ThrowsAdvice>,
}

impl ThrowsAdviceInterceptor {
    pub fn new(advice: Arc<dyn ThrowsAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for ThrowsAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Value> {
        match invocation.proceed() {
            Ok(returned) => Ok(returned),
            Err(error) => {
                self.advice.after_throwing(&error, invocation)?;
                Err(error)
            }
        }
    }
}
