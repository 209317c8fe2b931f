// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::atomic::{AtomicU64, Ordering};

/// 付费调用类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetKind {
    Vision,
    Fallback,
}

impl BudgetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetKind::Vision => "vision",
            BudgetKind::Fallback => "fallback",
        }
    }
}

/// 单次运行的调用预算
///
/// 无锁原子计数。`limit` 为 0 表示不限。超出预算不会报错，
/// 调用方据此跳过付费调用并降级。
#[derive(Debug)]
pub struct CallBudget {
    kind: BudgetKind,
    limit: u64,
    used: AtomicU64,
}

impl CallBudget {
    pub fn new(kind: BudgetKind, limit: u64) -> Self {
        Self {
            kind,
            limit,
            used: AtomicU64::new(0),
        }
    }

    pub fn unlimited(kind: BudgetKind) -> Self {
        Self::new(kind, 0)
    }

    /// 尝试占用一次调用额度，额度耗尽时返回 `false`
    pub fn try_acquire(&self) -> bool {
        if self.limit == 0 {
            self.used.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let acquired = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok();

        if !acquired {
            metrics::counter!("classifier_budget_denied_total", "kind" => self.kind.as_str())
                .increment(1);
        }
        acquired
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// 剩余额度，不限时为 `None`
    pub fn remaining(&self) -> Option<u64> {
        (self.limit > 0).then(|| self.limit.saturating_sub(self.used()))
    }

    pub fn kind(&self) -> BudgetKind {
        self.kind
    }
}
