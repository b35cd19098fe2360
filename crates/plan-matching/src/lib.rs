//! # Plan Matching
//!
//! 計劃與實際執行紀錄的對帳：步驟 ↔ 作業匹配、作業 ↔ 銷售 FIFO 利潤匹配

pub mod job_matcher;
pub mod profit_matcher;

// Re-export 主要類型
pub use job_matcher::{JobMatcher, MatchContext};
pub use profit_matcher::{
    ProfitMatcher, ProfitReport, ProfitRequest, ProfitSummary, UnmatchedJob, UnmatchedSale,
};

use plan_core::{PlanStep, StepJobMatch};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// 單一計劃的匹配結果
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// 計劃ID
    pub plan_id: Uuid,

    /// 匹配後（可能已調整並重算）的步驟
    pub steps: Vec<PlanStep>,

    /// 步驟與作業的關聯
    pub matches: Vec<StepJobMatch>,

    /// 運行次數依實際作業調整的步驟（已釘選）
    pub adapted: BTreeSet<Uuid>,

    /// 設施已自動校正的步驟
    pub corrected: BTreeSet<Uuid>,

    /// 重算後數量或運行次數改變的步驟
    pub changed: BTreeSet<Uuid>,

    /// 匹配信息
    pub messages: Vec<String>,
}

impl MatchOutcome {
    /// 創建沒有任何匹配的結果
    pub fn unmatched(plan_id: Uuid, steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id,
            steps,
            matches: Vec::new(),
            adapted: BTreeSet::new(),
            corrected: BTreeSet::new(),
            changed: BTreeSet::new(),
            messages: Vec::new(),
        }
    }

    /// 計劃是否因匹配而改變
    pub fn plan_changed(&self) -> bool {
        !self.adapted.is_empty() || !self.corrected.is_empty() || !self.changed.is_empty()
    }

    /// 已匹配作業的總運行次數
    pub fn matched_runs(&self, step_id: Uuid) -> u64 {
        self.matches
            .iter()
            .filter(|m| m.step_id == step_id)
            .map(|m| m.job_runs)
            .sum()
    }
}

/// 已完全對應實際作業的步驟：匹配作業運行次數總和等於步驟運行次數
///
/// 這些步驟在重算時保留自己的運行次數。
pub fn pinned_steps(steps: &[PlanStep], matches: &[StepJobMatch]) -> HashSet<Uuid> {
    let mut matched: HashMap<Uuid, u64> = HashMap::new();
    for m in matches {
        *matched.entry(m.step_id).or_insert(0) += m.job_runs;
    }
    steps
        .iter()
        .filter(|s| s.runs > 0 && matched.get(&s.id) == Some(&s.runs))
        .map(|s| s.id)
        .collect()
}
