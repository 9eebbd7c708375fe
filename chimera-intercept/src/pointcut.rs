//! 切点（Pointcut）契约
//!
//! 切点由两部分组成：类型过滤（`matches_class`）与方法匹配（`matches_method`）。
//! 方法匹配可以是动态的：静态匹配只是必要条件，每次调用时还要用实际参数再判断一次。

use crate::expression::{pattern_matches, PointcutExpression};
use crate::metadata::{Class, Method, Value};
use std::sync::Arc;

/// 切点 Trait
pub trait Pointcut: Send + Sync {
    /// 类型过滤
    fn matches_class(&self, _class: &Class) -> bool {
        true
    }

    /// 静态方法匹配
    fn matches_method(&self, method: &Method, target_class: &Class) -> bool;

    /// 是否需要在每次调用时用实际参数重新匹配
    fn is_runtime(&self) -> bool {
        false
    }

    /// 调用时匹配，只有 `is_runtime()` 为 true 时才会被调用
    fn matches_invocation(&self, method: &Method, target_class: &Class, _args: &[Value]) -> bool {
        self.matches_method(method, target_class)
    }

    /// 匹配结果是否受引介通知影响
    fn is_introduction_aware(&self) -> bool {
        false
    }

    /// 考虑引介通知的静态方法匹配
    fn matches_method_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        _has_introductions: bool,
    ) -> bool {
        self.matches_method(method, target_class)
    }

    /// 调用时匹配，`introduced` 是代理通过引介通知获得的接口
    fn matches_invocation_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        args: &[Value],
        _introduced: &[Class],
    ) -> bool {
        self.matches_invocation(method, target_class, args)
    }
}

/// 类型过滤器，引介通知只按类型匹配
pub trait ClassFilter: Send + Sync {
    fn matches(&self, class: &Class) -> bool;
}

impl<F> ClassFilter for F
where
    F: Fn(&Class) -> bool + Send + Sync,
{
    fn matches(&self, class: &Class) -> bool {
        self(class)
    }
}

/// 匹配一切的切点
pub fn always() -> Arc<dyn Pointcut> {
    Arc::new(PointcutExpression::All)
}

/// 两个切点的并集
pub fn union(first: Arc<dyn Pointcut>, second: Arc<dyn Pointcut>) -> Arc<dyn Pointcut> {
    Arc::new(UnionPointcut { first, second })
}

/// 切点并集
///
/// 方法匹配会带上各自的类型过滤：一侧的方法匹配只在该侧类型过滤通过时才算数。
/// 因为每一项都是 `||`，并集满足交换律和结合律。
pub struct UnionPointcut {
    first: Arc<dyn Pointcut>,
    second: Arc<dyn Pointcut>,
}

impl UnionPointcut {
    fn side_matches_invocation(
        pointcut: &dyn Pointcut,
        method: &Method,
        target_class: &Class,
        args: &[Value],
        introduced: &[Class],
    ) -> bool {
        if !pointcut.matches_class(target_class) {
            return false;
        }
        if pointcut.is_runtime() {
            pointcut.matches_invocation_with_introductions(method, target_class, args, introduced)
        } else if pointcut.is_introduction_aware() {
            pointcut.matches_method_with_introductions(method, target_class, !introduced.is_empty())
        } else {
            pointcut.matches_method(method, target_class)
        }
    }
}

impl Pointcut for UnionPointcut {
    fn matches_class(&self, class: &Class) -> bool {
        self.first.matches_class(class) || self.second.matches_class(class)
    }

    fn matches_method(&self, method: &Method, target_class: &Class) -> bool {
        (self.first.matches_class(target_class) && self.first.matches_method(method, target_class))
            || (self.second.matches_class(target_class)
                && self.second.matches_method(method, target_class))
    }

    fn is_runtime(&self) -> bool {
        self.first.is_runtime() || self.second.is_runtime()
    }

    fn matches_invocation(&self, method: &Method, target_class: &Class, args: &[Value]) -> bool {
        self.matches_invocation_with_introductions(method, target_class, args, &[])
    }

    fn matches_invocation_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        args: &[Value],
        introduced: &[Class],
    ) -> bool {
        Self::side_matches_invocation(self.first.as_ref(), method, target_class, args, introduced)
            || Self::side_matches_invocation(self.second.as_ref(), method, target_class, args, introduced)
    }

    fn is_introduction_aware(&self) -> bool {
        self.first.is_introduction_aware() || self.second.is_introduction_aware()
    }

    fn matches_method_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        has_introductions: bool,
    ) -> bool {
        (self.first.matches_class(target_class)
            && self
                .first
                .matches_method_with_introductions(method, target_class, has_introductions))
            || (self.second.matches_class(target_class)
                && self.second.matches_method_with_introductions(
                    method,
                    target_class,
                    has_introductions,
                ))
    }
}

/// 按方法名匹配的静态切点，支持 `*` 通配符
#[derive(Debug, Clone, Default)]
pub struct NameMatchPointcut {
    names: Vec<String>,
}

impl NameMatchPointcut {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }
}

impl Pointcut for NameMatchPointcut {
    fn matches_method(&self, method: &Method, _target_class: &Class) -> bool {
        self.names
            .iter()
            .any(|pattern| pattern_matches(pattern, method.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> (Class, Class) {
        let service = Class::concrete("OrderService")
            .method("place", &["Order"])
            .method("cancel", &["u64"])
            .build();
        let repo = Class::concrete("OrderRepository")
            .method("save", &["Order"])
            .build();
        (service, repo)
    }

    fn union_pair() -> (Arc<dyn Pointcut>, Arc<dyn Pointcut>) {
        let a: Arc<dyn Pointcut> = Arc::new(PointcutExpression::Execution {
            type_pattern: "*Service".to_string(),
            method_pattern: "place".to_string(),
        });
        let b: Arc<dyn Pointcut> = Arc::new(PointcutExpression::TypePattern(
            "*Repository".to_string(),
        ));
        (a, b)
    }

    #[test]
    fn test_union_is_class_filter_aware() {
        let (service, repo) = classes();
        let (a, b) = union_pair();
        let pc = union(a, b);

        assert!(pc.matches_class(&service));
        assert!(pc.matches_class(&repo));
        assert!(pc.matches_method(&service.method("place").unwrap(), &service));
        // b 的方法匹配是任意方法，但 b 的类型过滤拒绝了 OrderService
        assert!(!pc.matches_method(&service.method("cancel").unwrap(), &service));
        assert!(pc.matches_method(&repo.method("save").unwrap(), &repo));
    }

    #[test]
    fn test_union_is_commutative() {
        let (service, repo) = classes();
        let (a, b) = union_pair();
        let ab = union(a.clone(), b.clone());
        let ba = union(b, a);

        for class in [&service, &repo] {
            assert_eq!(ab.matches_class(class), ba.matches_class(class));
            for method in class.all_methods() {
                assert_eq!(
                    ab.matches_method(&method, class),
                    ba.matches_method(&method, class)
                );
            }
        }
    }

    #[test]
    fn test_union_with_runtime_side() {
        let (service, _) = classes();
        let dynamic: Arc<dyn Pointcut> = Arc::new(PointcutExpression::Args(Arc::new(
            |args: &[Value]| args.first().and_then(|a| a.downcast_ref::<u64>()) == Some(&7),
        )));
        let pc = union(Arc::new(NameMatchPointcut::new(["place"])), dynamic);
        let cancel = service.method("cancel").unwrap();

        assert!(pc.is_runtime());
        assert!(pc.matches_method(&cancel, &service));
        assert!(pc.matches_invocation(&cancel, &service, &[crate::metadata::value(7u64)]));
        assert!(!pc.matches_invocation(&cancel, &service, &[crate::metadata::value(8u64)]));
    }

    #[test]
    fn test_name_match_pointcut() {
        let (service, _) = classes();
        let pc = NameMatchPointcut::new(["can*"]).add_name("nothing");
        assert!(pc.matches_method(&service.method("cancel").unwrap(), &service));
        assert!(!pc.matches_method(&service.method("place").unwrap(), &service));
    }

    #[test]
    fn test_closure_class_filter() {
        let (service, repo) = classes();
        let filter = |class: &Class| class.name().ends_with("Service");
        assert!(ClassFilter::matches(&filter, &service));
        assert!(!ClassFilter::matches(&filter, &repo));
    }
}
