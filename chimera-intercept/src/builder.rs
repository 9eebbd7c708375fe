//! 切面发现与缓存
//!
//! 第一次调用时扫描注册表中的全部组件，为切面组件生成通知器并缓存；
//! 之后的调用只从缓存中取。切面名称列表在两个缓存填充完毕后才发布。

use crate::advisor::Advisor;
use crate::aspect::{
    AspectInstanceFactory, AspectMetadata, PerClauseKind, PrototypeAspectInstanceFactory,
    SingletonAspectInstanceFactory,
};
use crate::error::{AopError, AopResult};
use crate::factory::AdvisorFactory;
use crate::metadata::Class;
use crate::registry::ComponentRegistry;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

type EligibilityPredicate = dyn Fn(&str) -> bool + Send + Sync;

/// 一次扫描的结果，扫描成功后才写入缓存
#[derive(Default)]
struct ScanResult {
    aspect_names: Vec<String>,
    advisors: Vec<Advisor>,
    cached_advisors: HashMap<String, Vec<Advisor>>,
    factories: HashMap<String, Arc<dyn AspectInstanceFactory>>,
}

/// 通知器缓存
///
/// 可在多个构建器之间共享。
#[derive(Default)]
pub struct AdvisorCache {
    /// 切面组件名称，发布后不再变化
    aspect_names: OnceCell<Vec<String>>,

    /// 单例切面组件的通知器
    advisors: RwLock<HashMap<String, Vec<Advisor>>>,

    /// 需要每次重建通知器的切面实例工厂
    factories: RwLock<HashMap<String, Arc<dyn AspectInstanceFactory>>>,
}

impl AdvisorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已经完成扫描
    pub fn is_initialized(&self) -> bool {
        self.aspect_names.get().is_some()
    }

    pub fn aspect_names(&self) -> Option<&[String]> {
        self.aspect_names.get().map(Vec::as_slice)
    }

    pub fn cached_advisors(&self, name: &str) -> Option<Vec<Advisor>> {
        self.advisors.read().get(name).cloned()
    }

    pub fn cached_factory(&self, name: &str) -> Option<Arc<dyn AspectInstanceFactory>> {
        self.factories.read().get(name).cloned()
    }
}

/// 切面通知器构建器
pub struct AspectAdvisorsBuilder {
    registry: Arc<dyn ComponentRegistry>,
    advisor_factory: Arc<dyn AdvisorFactory>,
    eligibility: Arc<EligibilityPredicate>,
    include_patterns: Vec<Regex>,
    cache: Arc<AdvisorCache>,
}

impl AspectAdvisorsBuilder {
    pub fn new(registry: Arc<dyn ComponentRegistry>, advisor_factory: Arc<dyn AdvisorFactory>) -> Self {
        Self {
            registry,
            advisor_factory,
            eligibility: Arc::new(|_: &str| true),
            include_patterns: Vec::new(),
            cache: Arc::new(AdvisorCache::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<AdvisorCache>) -> Self {
        self.cache = cache;
        self
    }

    /// 自定义组件是否参与切面扫描
    pub fn with_eligibility<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.eligibility = Arc::new(predicate);
        self
    }

    /// 只扫描名称匹配任一正则的组件
    pub fn with_include_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> AopResult<Self> {
        self.include_patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|e| {
                    AopError::InvalidConfig(format!(
                        "invalid include pattern '{}': {}",
                        pattern.as_ref(),
                        e
                    ))
                })
            })
            .collect::<AopResult<Vec<_>>>()?;
        Ok(self)
    }

    pub fn cache(&self) -> &Arc<AdvisorCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<dyn ComponentRegistry> {
        &self.registry
    }

    /// 组件是否参与切面扫描
    pub fn is_eligible_component(&self, name: &str) -> bool {
        if !(self.eligibility)(name) {
            return false;
        }
        self.include_patterns.is_empty()
            || self.include_patterns.iter().any(|p| p.is_match(name))
    }

    /// 返回注册表中全部切面的通知器
    ///
    /// 同一切面的通知器按声明顺序排列，不同切面按注册顺序排列。
    pub fn build_advisors(&self) -> AopResult<Vec<Advisor>> {
        if let Some(names) = self.cache.aspect_names.get() {
            return self.advisors_from_cache(names);
        }

        let mut scanned: Option<Vec<Advisor>> = None;
        let names = self.cache.aspect_names.get_or_try_init(|| {
            let result = self.scan()?;
            self.cache.advisors.write().extend(result.cached_advisors);
            self.cache.factories.write().extend(result.factories);
            scanned = Some(result.advisors);
            Ok::<_, AopError>(result.aspect_names)
        })?;

        match scanned {
            Some(advisors) => Ok(advisors),
            // 其它线程已经完成了扫描
            None => self.advisors_from_cache(names),
        }
    }

    fn scan(&self) -> AopResult<ScanResult> {
        let mut result = ScanResult::default();

        for name in self.registry.names_assignable_to(&Class::object()) {
            if !self.is_eligible_component(&name) {
                continue;
            }
            // 类型未知的组件无法判断是否为切面
            let Some(class) = self.registry.resolve_type(&name) else {
                continue;
            };
            if !self.advisor_factory.is_aspect(&class) {
                continue;
            }

            result.aspect_names.push(name.clone());
            let metadata = AspectMetadata::new(&class, name.clone())?;

            if metadata.kind() == PerClauseKind::Singleton {
                let factory: Arc<dyn AspectInstanceFactory> = Arc::new(
                    SingletonAspectInstanceFactory::with_class(self.registry.clone(), name.clone(), &class)?,
                );
                let class_advisors = self.advisor_factory.get_advisors(factory.clone())?;
                if self.registry.is_singleton(&name)? {
                    result
                        .cached_advisors
                        .insert(name.clone(), class_advisors.clone());
                } else {
                    result.factories.insert(name.clone(), factory);
                }
                result.advisors.extend(class_advisors);
            } else {
                if self.registry.is_singleton(&name)? {
                    return Err(AopError::SingletonAspectMismatch(name));
                }
                let factory: Arc<dyn AspectInstanceFactory> = Arc::new(
                    PrototypeAspectInstanceFactory::new(self.registry.clone(), name.clone())?,
                );
                result.factories.insert(name.clone(), factory.clone());
                result.advisors.extend(self.advisor_factory.get_advisors(factory)?);
            }
            tracing::debug!("Discovered aspect component '{}' ({:?})", name, metadata.kind());
        }

        tracing::debug!(
            "Aspect scan finished: {} aspects, {} advisors",
            result.aspect_names.len(),
            result.advisors.len()
        );
        Ok(result)
    }

    fn advisors_from_cache(&self, names: &[String]) -> AopResult<Vec<Advisor>> {
        let mut advisors = Vec::new();
        for name in names {
            if let Some(cached) = self.cache.cached_advisors(name) {
                advisors.extend(cached);
            } else if let Some(factory) = self.cache.cached_factory(name) {
                advisors.extend(self.advisor_factory.get_advisors(factory)?);
            }
        }
        tracing::trace!("Resolved {} advisors from cache", advisors.len());
        Ok(advisors)
    }
}
