//! 計劃服務
//!
//! 把計算引擎接到 [`PlanStore`]：每一輪計算都先在記憶體中完成，再以一次
//! `save_plan`/`commit_*`/`replace_*` 寫入。同一計劃的重算由計劃鎖串行化，
//! 同一使用者的作業匹配與利潤計算由使用者鎖串行化。
//!
//! 鎖的順序固定為先使用者、後計劃（多個計劃按 id 排序）。

use chrono::{DateTime, Utc};
use plan_cache::{LockGuard, PlanLocks, Recalculation, StepEdit, StepRecalculator};
use plan_calc::{load_book_for_steps, PlanCalculator, PlanRequest, PlanResult, TimeScheduler};
use plan_core::{
    BonusResolver, CharacterId, EngineConfig, ExecutionJobSource, MatchingCommit, PlanStore,
    PriceSource, ProductionPlan, RecipeCatalog, Result, SaleSource, SkillSource, UserId,
};
use plan_matching::{
    pinned_steps, JobMatcher, MatchContext, MatchOutcome, ProfitMatcher, ProfitReport,
    ProfitRequest,
};
use std::collections::HashSet;
use uuid::Uuid;

/// 計劃服務
pub struct PlanService<S: PlanStore> {
    store: S,
    calculator: PlanCalculator,
    locks: PlanLocks,
}

impl<S: PlanStore> PlanService<S> {
    pub fn new(store: S, calculator: PlanCalculator) -> Self {
        Self {
            store,
            calculator,
            locks: PlanLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.calculator.config()
    }

    /// 計算新計劃的步驟並保存
    pub fn create_plan<C, B, K>(
        &self,
        mut plan: ProductionPlan,
        operators: &[CharacterId],
        catalog: &C,
        resolver: &B,
        skills: &K,
    ) -> Result<PlanResult>
    where
        C: RecipeCatalog + ?Sized,
        B: BonusResolver + ?Sized,
        K: SkillSource + ?Sized,
    {
        let request = PlanRequest::from_plan(&plan).with_operators(operators.iter().copied());
        let result = self.calculator.calculate(&request, catalog, resolver, skills)?;

        // 使用者鎖確保匹配進行中不會出現新計劃
        let _user_guard = self.locks.user(plan.owner);
        let _plan_guard = self.locks.plan(plan.id);
        plan.steps = result.steps.clone();
        tracing::info!("保存計劃 {} ({} 個步驟)", plan.id, plan.steps.len());
        self.store.save_plan(plan)?;

        Ok(result)
    }

    /// 修改單一步驟並重算整個計劃
    ///
    /// 已完全對應實際作業的步驟保留自己的運行次數，也不會被拆分；
    /// 其他超過時間上限的步驟依建立計劃時的規則拆分。
    #[allow(clippy::too_many_arguments)]
    pub fn update_step<C, B, K>(
        &self,
        plan_id: Uuid,
        step_id: Uuid,
        edit: &StepEdit,
        operators: &[CharacterId],
        catalog: &C,
        resolver: &B,
        skills: &K,
    ) -> Result<Recalculation>
    where
        C: RecipeCatalog + ?Sized,
        B: BonusResolver + ?Sized,
        K: SkillSource + ?Sized,
    {
        let _guard = self.locks.plan(plan_id);
        let plan = self.store.load_plan(plan_id)?;
        let owner = plan.owner;

        let steps = StepRecalculator::apply_edit(plan.steps, step_id, edit, resolver, owner)?;
        let book = load_book_for_steps(catalog, &steps)?;
        let pinned = pinned_steps(&steps, &self.store.job_matches(plan_id)?);

        let mut recalculation = StepRecalculator::recalculate(steps, &book, &pinned);

        let scheduler = TimeScheduler::from_sources(
            self.calculator.config(),
            self.calculator.skill_table(),
            skills,
            operators,
        )?;
        scheduler.attach_durations(&mut recalculation.steps, &book);

        let unsplit: HashSet<Uuid> = recalculation
            .steps
            .iter()
            .filter(|s| !s.is_split())
            .map(|s| s.id)
            .collect();
        let known: HashSet<Uuid> = recalculation.steps.iter().map(|s| s.id).collect();
        recalculation.steps =
            scheduler.split_except(std::mem::take(&mut recalculation.steps), &pinned);
        for step in recalculation.steps.iter().filter(|s| s.is_split()) {
            if unsplit.contains(&step.id) || !known.contains(&step.id) {
                recalculation.changed.insert(step.id);
            }
        }

        self.store
            .commit_recalculation(plan_id, recalculation.steps.clone())?;
        tracing::info!(
            "計劃 {} 步驟 {} 修改完成: {} 個步驟變更",
            plan_id,
            step_id,
            recalculation.changed.len()
        );

        Ok(recalculation)
    }

    /// 刪除計劃（連同作業匹配）
    pub fn delete_plan(&self, plan_id: Uuid) -> Result<()> {
        let _guard = self.locks.plan(plan_id);
        self.store.delete_plan(plan_id)
    }

    /// 重新匹配使用者所有計劃的外部作業
    ///
    /// 整輪持有使用者鎖與每個計劃的鎖，所有計劃完成匹配後以一次
    /// `commit_matching_all` 寫入；任何失敗都不會留下部分結果。
    pub fn match_jobs<C, J, B>(
        &self,
        user: UserId,
        characters: &[CharacterId],
        since: DateTime<Utc>,
        catalog: &C,
        jobs: &J,
        resolver: &B,
    ) -> Result<Vec<MatchOutcome>>
    where
        C: RecipeCatalog + ?Sized,
        J: ExecutionJobSource + ?Sized,
        B: BonusResolver + ?Sized,
    {
        let _user_guard = self.locks.user(user);
        let mut plan_ids: Vec<Uuid> = self
            .store
            .plans_for_user(user)?
            .iter()
            .map(|p| p.id)
            .collect();
        plan_ids.sort_unstable();
        let _plan_guards: Vec<LockGuard> = plan_ids.iter().map(|&id| self.locks.plan(id)).collect();

        // 取得計劃鎖後重新讀取，確保以最新的步驟匹配
        let plans = self.store.plans_for_user(user)?;
        let matcher = JobMatcher::new(self.calculator.config());
        let context = MatchContext::new(user, characters, since);

        let mut claimed = HashSet::new();
        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in &plans {
            let book = load_book_for_steps(catalog, &plan.steps)?;
            outcomes.push(matcher.match_plan(plan, &book, &context, &mut claimed, jobs, resolver)?);
        }

        self.store.commit_matching_all(
            outcomes
                .iter()
                .map(|outcome| MatchingCommit {
                    plan_id: outcome.plan_id,
                    steps: outcome.steps.clone(),
                    matches: outcome.matches.clone(),
                })
                .collect(),
        )?;

        tracing::info!(
            "使用者 {} 作業匹配完成: {} 個計劃, {} 個作業",
            user,
            outcomes.len(),
            claimed.len()
        );

        Ok(outcomes)
    }

    /// 重新匹配單一計劃；使用者其他計劃已認領的作業不再分配
    pub fn match_plan_jobs<C, J, B>(
        &self,
        plan_id: Uuid,
        characters: &[CharacterId],
        since: DateTime<Utc>,
        catalog: &C,
        jobs: &J,
        resolver: &B,
    ) -> Result<MatchOutcome>
    where
        C: RecipeCatalog + ?Sized,
        J: ExecutionJobSource + ?Sized,
        B: BonusResolver + ?Sized,
    {
        let owner = self.store.load_plan(plan_id)?.owner;
        let _user_guard = self.locks.user(owner);
        let _plan_guard = self.locks.plan(plan_id);
        let plan = self.store.load_plan(plan_id)?;

        let mut claimed = self.store.claimed_jobs(plan.owner, Some(plan_id))?;
        let book = load_book_for_steps(catalog, &plan.steps)?;
        let context = MatchContext::new(plan.owner, characters, since);
        let outcome = JobMatcher::new(self.calculator.config())
            .match_plan(&plan, &book, &context, &mut claimed, jobs, resolver)?;

        self.store
            .commit_matching(plan_id, outcome.steps.clone(), outcome.matches.clone())?;
        Ok(outcome)
    }

    /// 計算利潤並取代窗口內這些產品既有的利潤匹配
    pub fn compute_profit<C, J, T, P>(
        &self,
        request: &ProfitRequest<'_>,
        catalog: &C,
        jobs: &J,
        sales: &T,
        prices: &P,
    ) -> Result<ProfitReport>
    where
        C: RecipeCatalog + ?Sized,
        J: ExecutionJobSource + ?Sized,
        T: SaleSource + ?Sized,
        P: PriceSource + ?Sized,
    {
        let _guard = self.locks.user(request.user);
        let report = ProfitMatcher::new(self.calculator.config())
            .compute(request, catalog, jobs, sales, prices)?;

        self.store
            .replace_profit_matches(
                request.user,
                request.window,
                request.materials,
                report.matches.clone(),
            )?;
        Ok(report)
    }
}
