//! 运行时类型元数据
//!
//! Rust 没有运行时反射，拦截引擎需要的类型信息（类名、接口、方法签名、
//! 切面描述）由这里的 `Class` / `Method` 显式携带。

use crate::aspect::AspectDescriptor;
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 参数、返回值、组件实例的统一表示
pub type Value = Arc<dyn Any + Send + Sync>;

/// 无返回值方法的返回值
pub fn unit() -> Value {
    Arc::new(())
}

/// 将任意值包装为 [`Value`]
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

static OBJECT: Lazy<Class> = Lazy::new(|| Class::concrete("Object").build());

/// 类型种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// 普通具体类型
    Concrete,
    /// 接口
    Interface,
    /// 基于接口生成的代理类型
    Proxy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodSignature {
    name: Arc<str>,
    params: Arc<[String]>,
}

/// 类型信息
pub struct ClassInfo {
    name: String,
    kind: ClassKind,
    marker: bool,
    superclass: Option<Class>,
    interfaces: Vec<Class>,
    methods: Vec<MethodSignature>,
    aspect: Option<Arc<AspectDescriptor>>,
}

/// 类型句柄
///
/// 克隆成本很低；相等性按类型名判断。
#[derive(Clone)]
pub struct Class(Arc<ClassInfo>);

impl Class {
    /// 开始描述一个具体类型
    pub fn concrete(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder::new(name.into(), ClassKind::Concrete)
    }

    /// 开始描述一个接口
    pub fn interface(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder::new(name.into(), ClassKind::Interface)
    }

    /// 创建一个仅用于标记的空接口
    pub fn marker_interface(name: impl Into<String>) -> Class {
        let mut builder = ClassBuilder::new(name.into(), ClassKind::Interface);
        builder.marker = true;
        builder.build()
    }

    /// 所有类型都可赋值给的通用类型
    pub fn object() -> Class {
        OBJECT.clone()
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> ClassKind {
        self.0.kind
    }

    pub fn is_interface(&self) -> bool {
        self.0.kind == ClassKind::Interface
    }

    /// 是否为已经生成过的接口代理类型
    pub fn is_proxy_class(&self) -> bool {
        self.0.kind == ClassKind::Proxy
    }

    /// 是否为标记接口（没有方法，只用来打标签）
    pub fn is_marker(&self) -> bool {
        self.0.marker
    }

    pub fn superclass(&self) -> Option<&Class> {
        self.0.superclass.as_ref()
    }

    /// 直接声明实现的接口
    pub fn interfaces(&self) -> &[Class] {
        &self.0.interfaces
    }

    /// 切面描述（相当于类型上的切面注解）
    pub fn aspect(&self) -> Option<&Arc<AspectDescriptor>> {
        self.0.aspect.as_ref()
    }

    /// 本类型直接声明的方法
    pub fn declared_methods(&self) -> Vec<Method> {
        self.0
            .methods
            .iter()
            .map(|sig| Method {
                declaring_class: self.clone(),
                sig: sig.clone(),
            })
            .collect()
    }

    /// 全部可调用方法：自身、父类、接口，签名相同时先出现的优先
    pub fn all_methods(&self) -> Vec<Method> {
        let mut seen = HashSet::new();
        let mut methods = Vec::new();
        for class in self.type_hierarchy() {
            for method in class.declared_methods() {
                if seen.insert(method.sig.clone()) {
                    methods.push(method);
                }
            }
        }
        methods
    }

    /// 按名称查找方法（包括继承和接口中的方法）
    pub fn method(&self, name: &str) -> Option<Method> {
        self.all_methods().into_iter().find(|m| m.name() == name)
    }

    /// 传递闭包上的全部接口，去重并保持声明顺序
    pub fn all_interfaces(&self) -> Vec<Class> {
        let mut result: Vec<Class> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(class) = current {
            for ifc in class.interfaces() {
                push_unique(&mut result, ifc.clone());
                for nested in ifc.all_interfaces() {
                    push_unique(&mut result, nested);
                }
            }
            current = class.superclass().cloned();
        }
        result
    }

    /// 自身、父类链以及全部接口
    pub fn type_hierarchy(&self) -> Vec<Class> {
        let mut result = Vec::new();
        let mut current = Some(self.clone());
        while let Some(class) = current {
            current = class.superclass().cloned();
            result.push(class);
        }
        for ifc in self.all_interfaces() {
            push_unique(&mut result, ifc);
        }
        result
    }

    /// 是否可赋值给 `other`
    pub fn is_assignable_to(&self, other: &Class) -> bool {
        if *other == Class::object() {
            return true;
        }
        self.type_hierarchy().iter().any(|c| c == other)
    }
}

fn push_unique(list: &mut Vec<Class>, class: Class) {
    if !list.contains(&class) {
        list.push(class);
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .finish()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// 类型构建器
pub struct ClassBuilder {
    name: String,
    kind: ClassKind,
    marker: bool,
    superclass: Option<Class>,
    interfaces: Vec<Class>,
    methods: Vec<MethodSignature>,
    aspect: Option<Arc<AspectDescriptor>>,
}

impl ClassBuilder {
    fn new(name: String, kind: ClassKind) -> Self {
        Self {
            name,
            kind,
            marker: false,
            superclass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            aspect: None,
        }
    }

    /// 生成的代理类型
    pub(crate) fn proxy(name: String) -> Self {
        Self::new(name, ClassKind::Proxy)
    }

    pub fn extends(mut self, superclass: &Class) -> Self {
        self.superclass = Some(superclass.clone());
        self
    }

    pub fn implements(mut self, interface: &Class) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    /// 声明一个方法，`params` 为参数类型名
    pub fn method(mut self, name: &str, params: &[&str]) -> Self {
        self.methods.push(MethodSignature {
            name: Arc::from(name),
            params: params.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    /// 附加切面描述
    pub fn aspect(mut self, descriptor: AspectDescriptor) -> Self {
        self.aspect = Some(Arc::new(descriptor));
        self
    }

    pub fn build(self) -> Class {
        Class(Arc::new(ClassInfo {
            name: self.name,
            kind: self.kind,
            marker: self.marker,
            superclass: self.superclass,
            interfaces: self.interfaces,
            methods: self.methods,
            aspect: self.aspect,
        }))
    }
}

/// 方法句柄
#[derive(Clone)]
pub struct Method {
    declaring_class: Class,
    sig: MethodSignature,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.sig.name
    }

    pub fn param_types(&self) -> &[String] {
        &self.sig.params
    }

    pub fn declaring_class(&self) -> &Class {
        &self.declaring_class
    }

    /// 名称和参数类型都相同
    pub fn same_signature(&self, other: &Method) -> bool {
        self.sig == other.sig
    }

    /// 完整签名，例如 `Shape::area()`
    pub fn signature(&self) -> String {
        format!(
            "{}::{}({})",
            self.declaring_class.name(),
            self.sig.name,
            self.sig.params.join(", ")
        )
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.declaring_class == other.declaring_class && self.sig == other.sig
    }
}

impl Eq for Method {}

impl Hash for Method {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.declaring_class.hash(state);
        self.sig.hash(state);
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.signature())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// 可被代理的目标对象
///
/// 通过方法句柄分派调用；代理本身也实现此 trait，因此代理可以再次被代理。
pub trait TargetObject: Send + Sync {
    /// 目标的实际类型
    fn target_class(&self) -> Class;

    /// 调用目标方法
    fn invoke(&self, method: &Method, args: &[Value]) -> anyhow::Result<Value>;
}

type Dispatch = dyn Fn(&Method, &[Value]) -> anyhow::Result<Value> + Send + Sync;

/// 基于闭包的目标对象
pub struct FnTarget {
    class: Class,
    dispatch: Box<Dispatch>,
}

impl FnTarget {
    pub fn new<F>(class: Class, dispatch: F) -> Self
    where
        F: Fn(&Method, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            class,
            dispatch: Box::new(dispatch),
        }
    }
}

impl TargetObject for FnTarget {
    fn target_class(&self) -> Class {
        self.class.clone()
    }

    fn invoke(&self, method: &Method, args: &[Value]) -> anyhow::Result<Value> {
        (self.dispatch)(method, args)
    }
}
