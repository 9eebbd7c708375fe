//! 通知器优先级排序
//!
//! 先按 `order` 升序；同一切面内 order 相同的通知按声明顺序：
//! 一般是先声明者优先，但只要有一方是后置类通知，就改为后声明者优先。

use crate::advisor::Advisor;
use std::cmp::Ordering;

/// 比较两个通知器的优先级，`Less` 表示 `a` 先执行
pub fn compare_precedence(a: &Advisor, b: &Advisor) -> Ordering {
    let by_order = a.order().cmp(&b.order());
    if by_order != Ordering::Equal {
        return by_order;
    }

    let (Some(left), Some(right)) = (a.precedence(), b.precedence()) else {
        return Ordering::Equal;
    };
    if left.aspect_name() != right.aspect_name() {
        return Ordering::Equal;
    }

    let declared = left.declaration_order().cmp(&right.declaration_order());
    if left.is_after_advice() || right.is_after_advice() {
        declared.reverse()
    } else {
        declared
    }
}

/// 稳定排序
///
/// 混合前置/后置通知时比较关系不满足传递性，这里用插入排序，
/// 结果只取决于输入顺序。
pub fn sort_advisors(advisors: Vec<Advisor>) -> Vec<Advisor> {
    let mut sorted: Vec<Advisor> = Vec::with_capacity(advisors.len());
    for advisor in advisors {
        let mut idx = sorted.len();
        while idx > 0 && compare_precedence(&sorted[idx - 1], &advisor) == Ordering::Greater {
            idx -= 1;
        }
        sorted.insert(idx, advisor);
    }
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::Advice;
    use crate::advisor::{PointcutAdvisor, PrecedenceInformation, LOWEST_PRECEDENCE};
    use crate::pointcut::{always, Pointcut};
    use std::sync::Arc;

    struct Ranked {
        aspect: &'static str,
        declared: usize,
        after: bool,
        order: i32,
    }

    impl PrecedenceInformation for Ranked {
        fn aspect_name(&self) -> &str {
            self.aspect
        }

        fn declaration_order(&self) -> usize {
            self.declared
        }

        fn is_before_advice(&self) -> bool {
            !self.after
        }

        fn is_after_advice(&self) -> bool {
            self.after
        }
    }

    impl PointcutAdvisor for Ranked {
        fn pointcut(&self) -> Arc<dyn Pointcut> {
            always()
        }

        fn advice(&self) -> Advice {
            Advice::Empty
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn precedence(&self) -> Option<&dyn PrecedenceInformation> {
            Some(self)
        }
    }

    fn ranked(aspect: &'static str, declared: usize, after: bool, order: i32) -> Advisor {
        Advisor::Pointcut(Arc::new(Ranked {
            aspect,
            declared,
            after,
            order,
        }))
    }

    fn labels(advisors: &[Advisor]) -> Vec<String> {
        advisors
            .iter()
            .map(|a| match a.precedence() {
                Some(info) => format!("{}{}", info.aspect_name(), info.declaration_order()),
                None => "plain".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_sort_by_order_first() {
        let sorted = sort_advisors(vec![ranked("b", 0, false, 10), ranked("a", 0, false, 1)]);
        assert_eq!(labels(&sorted), vec!["a0", "b0"]);
    }

    #[test]
    fn test_before_advice_keeps_declaration_order() {
        let sorted = sort_advisors(vec![ranked("a", 1, false, 0), ranked("a", 0, false, 0)]);
        assert_eq!(labels(&sorted), vec!["a0", "a1"]);
    }

    #[test]
    fn test_after_advice_reverses_declaration_order() {
        let sorted = sort_advisors(vec![ranked("a", 0, true, 0), ranked("a", 1, true, 0)]);
        assert_eq!(labels(&sorted), vec!["a1", "a0"]);
    }

    #[test]
    fn test_unrelated_advisors_keep_input_order() {
        let sorted = sort_advisors(vec![
            ranked("x", 0, false, LOWEST_PRECEDENCE),
            Advisor::plain(Advice::Empty),
            ranked("y", 0, false, LOWEST_PRECEDENCE),
        ]);
        assert_eq!(labels(&sorted), vec!["x0", "plain", "y0"]);
    }
}
