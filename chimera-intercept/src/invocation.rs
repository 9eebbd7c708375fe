//! 方法调用（连接点）与拦截器链的执行
//!
//! `MethodInvocation` 同时是连接点信息和链的执行器：每次 `proceed()`
//! 推进到下一个拦截器，链走完后调用真实目标。

use crate::metadata::{Class, Method, TargetObject, Value};
use crate::pointcut::Pointcut;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// 方法拦截器 Trait
pub trait MethodInterceptor: Send + Sync {
    /// 拦截一次调用，通常在内部调用 `invocation.proceed()`
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Value>;
}

impl<F> MethodInterceptor for F
where
    F: Fn(&mut MethodInvocation) -> anyhow::Result<Value> + Send + Sync,
{
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Value> {
        self(invocation)
    }
}

/// 拦截器链中的一个元素
#[derive(Clone)]
pub enum ChainElement {
    /// 对该方法的每次调用都适用
    Static(Arc<dyn MethodInterceptor>),

    /// 需要在调用时用实际参数再次匹配
    Dynamic {
        interceptor: Arc<dyn MethodInterceptor>,
        matcher: Arc<dyn Pointcut>,
    },
}

impl ChainElement {
    pub fn interceptor(&self) -> &Arc<dyn MethodInterceptor> {
        match self {
            ChainElement::Static(interceptor) => interceptor,
            ChainElement::Dynamic { interceptor, .. } => interceptor,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ChainElement::Dynamic { .. })
    }
}

impl fmt::Debug for ChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainElement::Static(_) => write!(f, "Static(..)"),
            ChainElement::Dynamic { .. } => write!(f, "Dynamic(..)"),
        }
    }
}

/// 一次方法调用
pub struct MethodInvocation {
    target: Option<Arc<dyn TargetObject>>,
    method: Method,
    args: Vec<Value>,
    target_class: Class,
    chain: Arc<Vec<ChainElement>>,
    current: usize,
    started: Instant,
}

impl MethodInvocation {
    pub fn new(
        target: Option<Arc<dyn TargetObject>>,
        method: Method,
        args: Vec<Value>,
        target_class: Class,
        chain: Arc<Vec<ChainElement>>,
    ) -> Self {
        Self {
            target,
            method,
            args,
            target_class,
            chain,
            current: 0,
            started: Instant::now(),
        }
    }

    /// 执行链中的下一个拦截器，链结束后调用目标方法
    pub fn proceed(&mut self) -> anyhow::Result<Value> {
        let Some(element) = self.chain.get(self.current).cloned() else {
            return self.invoke_joinpoint();
        };
        self.current += 1;

        match element {
            ChainElement::Static(interceptor) => interceptor.invoke(self),
            ChainElement::Dynamic {
                interceptor,
                matcher,
            } => {
                if matcher.matches_invocation(&self.method, &self.target_class, &self.args) {
                    interceptor.invoke(self)
                } else {
                    // 动态匹配失败，跳过这个拦截器
                    self.proceed()
                }
            }
        }
    }

    fn invoke_joinpoint(&self) -> anyhow::Result<Value> {
        match &self.target {
            Some(target) => target.invoke(&self.method, &self.args),
            None => anyhow::bail!("No target available to invoke {}", self.signature()),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// 替换后续拦截器和目标看到的参数
    pub fn set_args(&mut self, args: Vec<Value>) {
        self.args = args;
    }

    /// 尝试按类型读取第 `index` 个参数
    pub fn arg<T: 'static>(&self, index: usize) -> Option<&T> {
        self.args.get(index)?.downcast_ref::<T>()
    }

    pub fn target(&self) -> Option<&Arc<dyn TargetObject>> {
        self.target.as_ref()
    }

    pub fn target_class(&self) -> &Class {
        &self.target_class
    }

    /// 完整的方法签名，以目标类型为前缀
    pub fn signature(&self) -> String {
        format!("{}::{}", self.target_class.name(), self.method.name())
    }

    pub fn started(&self) -> &Instant {
        &self.started
    }
}

impl fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("signature", &self.signature())
            .field("args", &self.args.len())
            .field("chain", &self.chain.len())
            .field("current", &self.current)
            .finish()
    }
}

impl fmt::Display for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}
