//! 切点表达式
//!
//! 一个可组合的表达式树，实现 [`Pointcut`]。静态匹配使用三值逻辑
//! （总是/从不/可能），`Args` 节点只能在调用时根据实际参数确定。

use crate::metadata::{Class, Method, Value};
use crate::pointcut::Pointcut;
use regex::Regex;
use std::sync::Arc;

type ArgsPredicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;
type MethodPredicate = Arc<dyn Fn(&Method, &Class) -> bool + Send + Sync>;

/// 切点表达式
#[derive(Clone)]
pub enum PointcutExpression {
    /// 匹配所有方法
    All,

    /// 匹配类型层次中任一类型名
    /// 例如：TypePattern("*Service")
    TypePattern(String),

    /// 匹配方法名
    MethodPattern(String),

    /// 匹配特定类型的特定方法
    /// 例如：execution(* UserService.get_user(..))
    Execution {
        type_pattern: String,
        method_pattern: String,
    },

    /// 使用正则表达式匹配类型名
    TypeRegex(Regex),

    /// 使用正则表达式匹配方法名
    MethodRegex(Regex),

    /// 目标（或代理）是否属于某类型；存在引介通知时，代理可能获得该类型
    This(String),

    /// 根据调用参数匹配，动态
    Args(ArgsPredicate),

    /// 自定义静态匹配函数
    Custom(MethodPredicate),

    /// 与运算（AND）
    And(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 或运算（OR）
    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 非运算（NOT）
    Not(Box<PointcutExpression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShadowMatch {
    Always,
    Maybe,
    Never,
}

impl ShadowMatch {
    fn from_bool(matched: bool) -> Self {
        if matched {
            ShadowMatch::Always
        } else {
            ShadowMatch::Never
        }
    }
}

impl PointcutExpression {
    /// 创建 execution 表达式
    ///
    /// 格式：`返回类型 类型名.方法名(参数)`，外层的 `execution(...)` 可省略。
    /// 只解析类型和方法名。
    pub fn execution(expression: &str) -> Self {
        let expression = expression.trim();
        let expression = expression
            .strip_prefix("execution(")
            .and_then(|e| e.strip_suffix(')'))
            .unwrap_or(expression);

        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() < 2 {
            return PointcutExpression::All;
        }

        let method_part = parts[1];
        let method_part = method_part
            .find('(')
            .map(|idx| &method_part[..idx])
            .unwrap_or(method_part);

        match method_part.rsplit_once('.') {
            Some((type_pattern, method_pattern)) => PointcutExpression::Execution {
                type_pattern: type_pattern.to_string(),
                method_pattern: method_pattern.to_string(),
            },
            None => PointcutExpression::MethodPattern(method_part.to_string()),
        }
    }

    pub fn type_pattern(pattern: impl Into<String>) -> Self {
        PointcutExpression::TypePattern(pattern.into())
    }

    pub fn method_pattern(pattern: impl Into<String>) -> Self {
        PointcutExpression::MethodPattern(pattern.into())
    }

    pub fn this(type_name: impl Into<String>) -> Self {
        PointcutExpression::This(type_name.into())
    }

    /// 按实际参数匹配
    pub fn args<F>(predicate: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        PointcutExpression::Args(Arc::new(predicate))
    }

    pub fn and(self, other: PointcutExpression) -> Self {
        PointcutExpression::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: PointcutExpression) -> Self {
        PointcutExpression::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        PointcutExpression::Not(Box::new(self))
    }

    pub fn into_pointcut(self) -> Arc<dyn Pointcut> {
        Arc::new(self)
    }

    fn hierarchy_matches(pattern: &str, class: &Class) -> bool {
        class
            .type_hierarchy()
            .iter()
            .any(|c| pattern_matches(pattern, c.name()))
    }

    fn class_matches(&self, class: &Class) -> bool {
        match self {
            PointcutExpression::TypePattern(pattern)
            | PointcutExpression::Execution {
                type_pattern: pattern,
                ..
            } => Self::hierarchy_matches(pattern, class),
            PointcutExpression::TypeRegex(regex) => class
                .type_hierarchy()
                .iter()
                .any(|c| regex.is_match(c.name())),
            PointcutExpression::And(left, right) => {
                left.class_matches(class) && right.class_matches(class)
            }
            PointcutExpression::Or(left, right) => {
                left.class_matches(class) || right.class_matches(class)
            }
            // 其余节点在类型层面无法下结论
            _ => true,
        }
    }

    fn shadow_match(&self, method: &Method, class: &Class, has_introductions: bool) -> ShadowMatch {
        match self {
            PointcutExpression::All => ShadowMatch::Always,
            PointcutExpression::TypePattern(_) | PointcutExpression::TypeRegex(_) => {
                ShadowMatch::from_bool(self.class_matches(class))
            }
            PointcutExpression::MethodPattern(pattern) => {
                ShadowMatch::from_bool(pattern_matches(pattern, method.name()))
            }
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => ShadowMatch::from_bool(
                Self::hierarchy_matches(type_pattern, class)
                    && pattern_matches(method_pattern, method.name()),
            ),
            PointcutExpression::MethodRegex(regex) => {
                ShadowMatch::from_bool(regex.is_match(method.name()))
            }
            PointcutExpression::This(pattern) => ShadowMatch::from_bool(
                has_introductions || Self::hierarchy_matches(pattern, class),
            ),
            PointcutExpression::Args(_) => ShadowMatch::Maybe,
            PointcutExpression::Custom(func) => ShadowMatch::from_bool(func(method, class)),
            PointcutExpression::And(left, right) => {
                match (
                    left.shadow_match(method, class, has_introductions),
                    right.shadow_match(method, class, has_introductions),
                ) {
                    (ShadowMatch::Never, _) | (_, ShadowMatch::Never) => ShadowMatch::Never,
                    (ShadowMatch::Always, ShadowMatch::Always) => ShadowMatch::Always,
                    _ => ShadowMatch::Maybe,
                }
            }
            PointcutExpression::Or(left, right) => {
                match (
                    left.shadow_match(method, class, has_introductions),
                    right.shadow_match(method, class, has_introductions),
                ) {
                    (ShadowMatch::Always, _) | (_, ShadowMatch::Always) => ShadowMatch::Always,
                    (ShadowMatch::Never, ShadowMatch::Never) => ShadowMatch::Never,
                    _ => ShadowMatch::Maybe,
                }
            }
            PointcutExpression::Not(expr) => {
                match expr.shadow_match(method, class, has_introductions) {
                    ShadowMatch::Always => ShadowMatch::Never,
                    ShadowMatch::Never => ShadowMatch::Always,
                    ShadowMatch::Maybe => ShadowMatch::Maybe,
                }
            }
        }
    }

    fn evaluate(&self, method: &Method, class: &Class, args: &[Value], introduced: &[Class]) -> bool {
        match self {
            PointcutExpression::Args(predicate) => predicate(args),
            // 代理的类型包括引介进来的接口
            PointcutExpression::This(pattern) => {
                Self::hierarchy_matches(pattern, class)
                    || introduced.iter().any(|ifc| Self::hierarchy_matches(pattern, ifc))
            }
            PointcutExpression::And(left, right) => {
                left.evaluate(method, class, args, introduced)
                    && right.evaluate(method, class, args, introduced)
            }
            PointcutExpression::Or(left, right) => {
                left.evaluate(method, class, args, introduced)
                    || right.evaluate(method, class, args, introduced)
            }
            PointcutExpression::Not(expr) => !expr.evaluate(method, class, args, introduced),
            leaf => leaf.shadow_match(method, class, false) == ShadowMatch::Always,
        }
    }

    fn contains(&self, check: &dyn Fn(&PointcutExpression) -> bool) -> bool {
        if check(self) {
            return true;
        }
        match self {
            PointcutExpression::And(left, right) | PointcutExpression::Or(left, right) => {
                left.contains(check) || right.contains(check)
            }
            PointcutExpression::Not(expr) => expr.contains(check),
            _ => false,
        }
    }
}

impl Pointcut for PointcutExpression {
    fn matches_class(&self, class: &Class) -> bool {
        self.class_matches(class)
    }

    fn matches_method(&self, method: &Method, target_class: &Class) -> bool {
        self.shadow_match(method, target_class, false) != ShadowMatch::Never
    }

    fn is_runtime(&self) -> bool {
        self.contains(&|e: &PointcutExpression| matches!(e, PointcutExpression::Args(_)))
    }

    fn matches_invocation(&self, method: &Method, target_class: &Class, args: &[Value]) -> bool {
        self.evaluate(method, target_class, args, &[])
    }

    fn matches_invocation_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        args: &[Value],
        introduced: &[Class],
    ) -> bool {
        self.evaluate(method, target_class, args, introduced)
    }

    fn is_introduction_aware(&self) -> bool {
        self.contains(&|e: &PointcutExpression| matches!(e, PointcutExpression::This(_)))
    }

    fn matches_method_with_introductions(
        &self,
        method: &Method,
        target_class: &Class,
        has_introductions: bool,
    ) -> bool {
        self.shadow_match(method, target_class, has_introductions) != ShadowMatch::Never
    }
}

impl std::fmt::Debug for PointcutExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointcutExpression::All => write!(f, "All"),
            PointcutExpression::TypePattern(p) => write!(f, "TypePattern({})", p),
            PointcutExpression::MethodPattern(p) => write!(f, "MethodPattern({})", p),
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => write!(f, "Execution({}.{})", type_pattern, method_pattern),
            PointcutExpression::TypeRegex(r) => write!(f, "TypeRegex({})", r.as_str()),
            PointcutExpression::MethodRegex(r) => write!(f, "MethodRegex({})", r.as_str()),
            PointcutExpression::This(p) => write!(f, "This({})", p),
            PointcutExpression::Args(_) => write!(f, "Args(...)"),
            PointcutExpression::Custom(_) => write!(f, "Custom(...)"),
            PointcutExpression::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            PointcutExpression::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            PointcutExpression::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}

/// `*` 通配符匹配
///
/// - `*` 匹配任意字符串
/// - `User*` / `*Service` / `*Service*` 前缀、后缀、包含
/// - 其余字符按字面量匹配
pub(crate) fn pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if !pattern.contains('*') {
        return pattern == target;
    }

    let regex_pattern = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
    Regex::new(&regex_pattern)
        .map(|regex| regex.is_match(target))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::value;

    fn user_service() -> (Class, Class) {
        let api = Class::interface("UserApi").method("get_user", &["u32"]).build();
        let service = Class::concrete("UserServiceImpl")
            .implements(&api)
            .method("get_user", &["u32"])
            .method("delete_user", &["u32"])
            .build();
        (api, service)
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("User*", "UserService"));
        assert!(pattern_matches("*Service", "UserService"));
        assert!(pattern_matches("*Serv*", "UserService"));
        assert!(!pattern_matches("get.user", "getXuser"));
        assert!(!pattern_matches("User", "UserService"));
    }

    #[test]
    fn test_execution_parsing() {
        match PointcutExpression::execution("execution(* UserApi.get_*(..))") {
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => {
                assert_eq!(type_pattern, "UserApi");
                assert_eq!(method_pattern, "get_*");
            }
            other => panic!("unexpected expression: {:?}", other),
        }
        assert!(matches!(
            PointcutExpression::execution("* delete_user(..)"),
            PointcutExpression::MethodPattern(_)
        ));
        assert!(matches!(
            PointcutExpression::execution("garbage"),
            PointcutExpression::All
        ));
    }

    #[test]
    fn test_type_pattern_matches_hierarchy() {
        let (_, service) = user_service();
        let pc = PointcutExpression::execution("* UserApi.get_user(..)");
        assert!(pc.matches_class(&service));
        assert!(pc.matches_method(&service.method("get_user").unwrap(), &service));
        assert!(!pc.matches_method(&service.method("delete_user").unwrap(), &service));
    }

    #[test]
    fn test_not_is_conservative_at_class_level() {
        let (_, service) = user_service();
        let pc = PointcutExpression::MethodPattern("delete_*".to_string()).not();
        assert!(pc.matches_class(&service));
        assert!(pc.matches_method(&service.method("get_user").unwrap(), &service));
        assert!(!pc.matches_method(&service.method("delete_user").unwrap(), &service));
    }

    #[test]
    fn test_args_is_runtime() {
        let (_, service) = user_service();
        let method = service.method("get_user").unwrap();
        let pc = PointcutExpression::MethodPattern("get_*".to_string()).and(
            PointcutExpression::Args(Arc::new(|args: &[Value]| {
                args.first().and_then(|a| a.downcast_ref::<u32>()) == Some(&1)
            })),
        );

        assert!(pc.is_runtime());
        assert!(pc.matches_method(&method, &service));
        assert!(pc.matches_invocation(&method, &service, &[value(1u32)]));
        assert!(!pc.matches_invocation(&method, &service, &[value(2u32)]));

        // NOT(Args) 静态上仍然是"可能匹配"
        let negated = PointcutExpression::Args(Arc::new(|_: &[Value]| true)).not();
        assert!(negated.matches_method(&method, &service));
        assert!(!negated.matches_invocation(&method, &service, &[]));
    }

    #[test]
    fn test_this_is_introduction_aware() {
        let (_, service) = user_service();
        let method = service.method("get_user").unwrap();
        let pc = PointcutExpression::This("Auditable".to_string());

        assert!(pc.is_introduction_aware());
        assert!(!pc.matches_method(&method, &service));
        assert!(pc.matches_method_with_introductions(&method, &service, true));
        assert!(!pc.matches_method_with_introductions(&method, &service, false));
    }

    #[test]
    fn test_regex_variants() {
        let (_, service) = user_service();
        let pc = PointcutExpression::TypeRegex(Regex::new("^User.*Impl$").unwrap())
            .and(PointcutExpression::MethodRegex(Regex::new("^delete").unwrap()));
        assert!(pc.matches_class(&service));
        assert!(pc.matches_method(&service.method("delete_user").unwrap(), &service));
        assert!(!pc.matches_method(&service.method("get_user").unwrap(), &service));
    }
}
