//! 组件注册表
//!
//! 拦截引擎只通过 `ComponentRegistry` 这几个窄接口访问容器：
//! 按名称查类型、取实例、判断作用域、按类型列出名称。
//! `SimpleComponentRegistry` 是一个独立可用的内存实现。

use crate::error::{AopError, AopResult};
use crate::metadata::{Class, Value};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 组件注册表 Trait
pub trait ComponentRegistry: Send + Sync {
    /// 组件的类型，未知时返回 None
    fn resolve_type(&self, name: &str) -> Option<Class>;

    /// 获取组件实例；单例组件每次返回同一个实例
    fn resolve_instance(&self, name: &str) -> AopResult<Value>;

    fn is_singleton(&self, name: &str) -> AopResult<bool>;

    /// 按注册顺序列出可赋值给 `class` 的组件名称
    ///
    /// 查询 `Object` 时包含类型未知的组件。
    fn names_assignable_to(&self, class: &Class) -> Vec<String>;
}

/// 组件作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// 单例模式 - 注册表中只有一个实例
    #[default]
    Singleton,

    /// 原型模式 - 每次请求都创建新实例
    Prototype,
}

type ComponentFactory = dyn Fn() -> anyhow::Result<Value> + Send + Sync;

struct ComponentDefinition {
    class: Option<Class>,
    scope: Scope,
    factory: Arc<ComponentFactory>,
}

/// 内存组件注册表
pub struct SimpleComponentRegistry {
    /// 注册顺序
    names: RwLock<Vec<String>>,

    definitions: RwLock<HashMap<String, ComponentDefinition>>,

    /// 单例缓存，每个名称一个槽位，同一单例只创建一次
    singletons: RwLock<HashMap<String, Arc<OnceCell<Value>>>>,
}

impl SimpleComponentRegistry {
    pub fn new() -> Self {
        Self {
            names: RwLock::new(Vec::new()),
            definitions: RwLock::new(HashMap::new()),
            singletons: RwLock::new(HashMap::new()),
        }
    }

    /// 注册组件，重复名称会覆盖之前的定义
    pub fn register<F>(&self, name: impl Into<String>, class: Option<Class>, scope: Scope, factory: F)
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!("Registering component '{}' ({:?})", name, scope);

        let previous = self.definitions.write().insert(
            name.clone(),
            ComponentDefinition {
                class,
                scope,
                factory: Arc::new(factory),
            },
        );
        if previous.is_some() {
            self.singletons.write().remove(&name);
        } else {
            self.names.write().push(name);
        }
    }

    /// 注册一个已经创建好的单例
    pub fn register_instance(&self, name: impl Into<String>, class: Class, instance: Value) {
        self.register(name, Some(class), Scope::Singleton, move || Ok(instance.clone()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn definition(&self, name: &str) -> AopResult<(Scope, Arc<ComponentFactory>)> {
        let definitions = self.definitions.read();
        let definition = definitions
            .get(name)
            .ok_or_else(|| AopError::NoSuchComponent(name.to_string()))?;
        Ok((definition.scope, definition.factory.clone()))
    }

    /// 工厂在锁外执行，允许其内部再访问注册表
    fn create(name: &str, factory: &ComponentFactory) -> AopResult<Value> {
        factory().map_err(|source| AopError::ComponentCreation {
            name: name.to_string(),
            source,
        })
    }

    fn singleton_slot(&self, name: &str) -> Arc<OnceCell<Value>> {
        if let Some(slot) = self.singletons.read().get(name) {
            return slot.clone();
        }
        self.singletons
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl Default for SimpleComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry for SimpleComponentRegistry {
    fn resolve_type(&self, name: &str) -> Option<Class> {
        self.definitions
            .read()
            .get(name)
            .and_then(|definition| definition.class.clone())
    }

    fn resolve_instance(&self, name: &str) -> AopResult<Value> {
        if let Some(instance) = self.singletons.read().get(name).and_then(|slot| slot.get()) {
            return Ok(instance.clone());
        }

        let (scope, factory) = self.definition(name)?;
        match scope {
            Scope::Prototype => Self::create(name, factory.as_ref()),
            // 并发解析同一单例时只有一个线程执行工厂，其余线程等待结果
            Scope::Singleton => self
                .singleton_slot(name)
                .get_or_try_init(|| Self::create(name, factory.as_ref()))
                .cloned(),
        }
    }

    fn is_singleton(&self, name: &str) -> AopResult<bool> {
        self.definitions
            .read()
            .get(name)
            .map(|definition| definition.scope == Scope::Singleton)
            .ok_or_else(|| AopError::NoSuchComponent(name.to_string()))
    }

    fn names_assignable_to(&self, class: &Class) -> Vec<String> {
        let is_object = *class == Class::object();
        let definitions = self.definitions.read();
        self.names
            .read()
            .iter()
            .filter(|name| match definitions.get(name.as_str()).map(|d| &d.class) {
                Some(Some(component)) => component.is_assignable_to(class),
                Some(None) => is_object,
                None => false,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_singleton_is_shared_and_prototype_is_fresh() {
        let registry = SimpleComponentRegistry::new();
        let created = Arc::new(AtomicUsize::new(0));

        let counter = created.clone();
        registry.register("single", None, Scope::Singleton, move || {
            Ok(value(counter.fetch_add(1, Ordering::SeqCst)))
        });
        let counter = created.clone();
        registry.register("proto", None, Scope::Prototype, move || {
            Ok(value(counter.fetch_add(1, Ordering::SeqCst)))
        });

        let a = registry.resolve_instance("single").unwrap();
        let b = registry.resolve_instance("single").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.resolve_instance("proto").unwrap();
        let d = registry.resolve_instance("proto").unwrap();
        assert!(!Arc::ptr_eq(&c, &d));
        assert_eq!(created.load(Ordering::SeqCst), 3);

        assert!(registry.is_singleton("single").unwrap());
        assert!(!registry.is_singleton("proto").unwrap());
    }

    #[test]
    fn test_concurrent_singleton_resolution_creates_once() {
        let registry = Arc::new(SimpleComponentRegistry::new());
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        registry.register("slow", None, Scope::Singleton, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(value(()))
        });

        let barrier = Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.resolve_instance("slow").unwrap()
                })
            })
            .collect();
        let instances: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[test]
    fn test_unknown_component() {
        let registry = SimpleComponentRegistry::new();
        assert!(matches!(
            registry.resolve_instance("missing"),
            Err(AopError::NoSuchComponent(name)) if name == "missing"
        ));
        assert!(registry.is_singleton("missing").is_err());
        assert!(registry.resolve_type("missing").is_none());
    }

    #[test]
    fn test_factory_failure_is_wrapped() {
        let registry = SimpleComponentRegistry::new();
        registry.register("broken", None, Scope::Singleton, || anyhow::bail!("boom"));
        let err = registry.resolve_instance("broken").unwrap_err();
        assert!(matches!(err, AopError::ComponentCreation { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_names_assignable_to() {
        let shape = Class::interface("Shape").method("area", &[]).build();
        let circle = Class::concrete("Circle").implements(&shape).build();
        let registry = SimpleComponentRegistry::new();
        registry.register_instance("circle", circle, value(1.0f64));
        registry.register("opaque", None, Scope::Singleton, || Ok(value(())));

        assert_eq!(registry.names_assignable_to(&shape), vec!["circle"]);
        assert_eq!(
            registry.names_assignable_to(&Class::object()),
            vec!["circle", "opaque"]
        );
    }
}
