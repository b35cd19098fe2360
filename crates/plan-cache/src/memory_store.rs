//! 記憶體計劃存放區
//!
//! 所有狀態放在同一把讀寫鎖之後，每次 `commit_*`/`replace_*` 在一次寫鎖內完成，
//! 讀取端不會看到寫到一半的結果。

use parking_lot::RwLock;
use plan_core::{
    JobId, MatchingCommit, MaterialId, PlanError, PlanStep, PlanStore, ProductionPlan, ProfitMatch,
    StepJobMatch, TimeWindow, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    plans: HashMap<Uuid, ProductionPlan>,
    job_matches: HashMap<Uuid, Vec<StepJobMatch>>,
    profit_matches: HashMap<UserId, Vec<ProfitMatch>>,
}

/// 記憶體中的 [`PlanStore`]
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    state: RwLock<StoreState>,
    /// 模擬寫入失敗（測試交易邊界用）
    fail_commits: AtomicBool,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之後的寫入一律失敗，狀態不變
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> plan_core::Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(PlanError::DataSource("存放區拒絕寫入".to_string()));
        }
        Ok(())
    }
}

impl PlanStore for InMemoryPlanStore {
    fn load_plan(&self, plan_id: Uuid) -> plan_core::Result<ProductionPlan> {
        self.state
            .read()
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or(PlanError::PlanNotFound(plan_id))
    }

    fn save_plan(&self, plan: ProductionPlan) -> plan_core::Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        // 整體取代時舊的匹配失效
        state.job_matches.remove(&plan.id);
        state.plans.insert(plan.id, plan);
        Ok(())
    }

    fn delete_plan(&self, plan_id: Uuid) -> plan_core::Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state
            .plans
            .remove(&plan_id)
            .ok_or(PlanError::PlanNotFound(plan_id))?;
        state.job_matches.remove(&plan_id);
        Ok(())
    }

    fn plans_for_user(&self, user: UserId) -> plan_core::Result<Vec<ProductionPlan>> {
        let state = self.state.read();
        let mut plans: Vec<ProductionPlan> = state
            .plans
            .values()
            .filter(|p| p.owner == user)
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.created_at, p.id));
        Ok(plans)
    }

    fn commit_recalculation(&self, plan_id: Uuid, steps: Vec<PlanStep>) -> plan_core::Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        let plan = state
            .plans
            .get_mut(&plan_id)
            .ok_or(PlanError::PlanNotFound(plan_id))?;
        plan.steps = steps;
        Ok(())
    }

    fn job_matches(&self, plan_id: Uuid) -> plan_core::Result<Vec<StepJobMatch>> {
        Ok(self
            .state
            .read()
            .job_matches
            .get(&plan_id)
            .cloned()
            .unwrap_or_default())
    }

    fn claimed_jobs(&self, user: UserId, except_plan: Option<Uuid>) -> plan_core::Result<HashSet<JobId>> {
        let state = self.state.read();
        Ok(state
            .plans
            .values()
            .filter(|p| p.owner == user && Some(p.id) != except_plan)
            .filter_map(|p| state.job_matches.get(&p.id))
            .flatten()
            .map(|m| m.job_id)
            .collect())
    }

    fn commit_matching_all(&self, commits: Vec<MatchingCommit>) -> plan_core::Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        // 先確認所有計劃都存在，再寫入
        if let Some(missing) = commits.iter().find(|c| !state.plans.contains_key(&c.plan_id)) {
            return Err(PlanError::PlanNotFound(missing.plan_id));
        }

        for commit in commits {
            if let Some(plan) = state.plans.get_mut(&commit.plan_id) {
                plan.steps = commit.steps;
            }
            state.job_matches.insert(commit.plan_id, commit.matches);
        }
        Ok(())
    }

    fn replace_profit_matches(
        &self,
        user: UserId,
        window: TimeWindow,
        material_ids: &[MaterialId],
        matches: Vec<ProfitMatch>,
    ) -> plan_core::Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        let stored = state.profit_matches.entry(user).or_default();
        stored.retain(|m| !(window.contains(m.sold_at) && material_ids.contains(&m.material_id)));
        stored.extend(matches);
        Ok(())
    }

    fn profit_matches(&self, user: UserId, window: TimeWindow) -> plan_core::Result<Vec<ProfitMatch>> {
        let state = self.state.read();
        Ok(state
            .profit_matches
            .get(&user)
            .map(|matches| {
                matches
                    .iter()
                    .filter(|m| window.contains(m.sold_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
