//! 步驟與外部作業匹配
//!
//! 每個可匹配的步驟依「最舊優先」貪婪認領作業，運行次數不足時最多再取一個
//! 會超出的作業。匹配結果可依 [`MatchAdaptation`](plan_core::MatchAdaptation)
//! 回寫步驟的運行次數，並依實際執行設施校正加成。

use chrono::{DateTime, Utc};
use plan_cache::StepRecalculator;
use plan_core::{
    BonusResolver, CharacterId, EngineConfig, ExecutionJob, ExecutionJobSource, FacilityDrift,
    FacilityId, JobId, PlanError, PlanStep, ProductionPlan, RecipeBook, RecipeId, Result,
    StepJobMatch, UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use uuid::Uuid;

use crate::MatchOutcome;

/// 匹配範圍
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// 計劃擁有者
    pub user: UserId,
    /// 納入的角色（空 = 全部）
    pub characters: &'a [CharacterId],
    /// 只看這個時間之後開始的作業
    pub since: DateTime<Utc>,
}

impl<'a> MatchContext<'a> {
    pub fn new(user: UserId, characters: &'a [CharacterId], since: DateTime<Utc>) -> Self {
        Self {
            user,
            characters,
            since,
        }
    }
}

/// 設施校正候選：群組（或單一步驟）內最近一次在其他設施執行的作業
#[derive(Debug, Clone, Copy)]
struct Correction {
    facility_id: FacilityId,
    started_at: DateTime<Utc>,
    job_id: JobId,
}

/// 作業匹配器
pub struct JobMatcher<'a> {
    config: &'a EngineConfig,
}

impl<'a> JobMatcher<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// 匹配單一計劃
    ///
    /// `claimed` 是使用者其他計劃與本輪先前步驟已認領的作業；本計劃新認領的作業會加入其中，
    /// 呼叫端依序處理同一使用者的多個計劃即可保證每個作業只被認領一次。
    pub fn match_plan<J, B>(
        &self,
        plan: &ProductionPlan,
        book: &RecipeBook,
        context: &MatchContext<'_>,
        claimed: &mut HashSet<JobId>,
        jobs: &J,
        resolver: &B,
    ) -> Result<MatchOutcome>
    where
        J: ExecutionJobSource + ?Sized,
        B: BonusResolver + ?Sized,
    {
        let start_time = Instant::now();
        tracing::info!("開始匹配計劃 {} ({} 個步驟)", plan.id, plan.steps.len());

        let mut steps = plan.steps.clone();
        let mut outcome = MatchOutcome::unmatched(plan.id, Vec::new());
        let mut candidates: HashMap<RecipeId, Vec<ExecutionJob>> = HashMap::new();
        let mut corrections: BTreeMap<Uuid, Correction> = BTreeMap::new();

        for index in Self::match_order(&steps) {
            let step = &steps[index];
            if step.purchased || step.is_copy() || !step.auto_match || step.runs == 0 {
                continue;
            }

            if !candidates.contains_key(&step.recipe_id) {
                let mut found = jobs.jobs_for(step.recipe_id, context.characters, context.since)?;
                found.retain(ExecutionJob::is_matchable);
                found.sort_by_key(|j| (j.started_at, j.id));
                candidates.insert(step.recipe_id, found);
            }
            let pool: Vec<&ExecutionJob> = candidates
                .get(&step.recipe_id)
                .map(|found| {
                    found
                        .iter()
                        .filter(|j| j.activity == step.activity && !claimed.contains(&j.id))
                        .collect()
                })
                .unwrap_or_default();

            let taken = select_jobs(&pool, step.runs);
            if taken.is_empty() {
                continue;
            }

            let matched_runs: u64 = taken.iter().map(|j| j.runs).sum();
            let drift_key = step.group_id().unwrap_or(step.id);
            for job in &taken {
                claimed.insert(job.id);
                outcome.matches.push(StepJobMatch {
                    plan_id: plan.id,
                    step_id: step.id,
                    job_id: job.id,
                    job_runs: job.runs,
                    drift: Self::drift(step, job),
                });

                if let Some(facility_id) = job.facility_id.filter(|f| Some(*f) != step.facility_id) {
                    let candidate = Correction {
                        facility_id,
                        started_at: job.started_at,
                        job_id: job.id,
                    };
                    corrections
                        .entry(drift_key)
                        .and_modify(|current| {
                            if (candidate.started_at, candidate.job_id)
                                > (current.started_at, current.job_id)
                            {
                                *current = candidate;
                            }
                        })
                        .or_insert(candidate);
                }
            }

            tracing::debug!(
                "步驟 {} ({}) 匹配 {} 個作業: {} / {} 次",
                step.id,
                step.product_id,
                taken.len(),
                matched_runs,
                step.runs
            );

            if self
                .config
                .match_adaptation
                .should_adapt(step.runs, matched_runs)
            {
                let step = &mut steps[index];
                outcome.messages.push(format!(
                    "物料 {} 的運行次數依實際作業調整: {} -> {}",
                    step.product_id, step.runs, matched_runs
                ));
                step.runs = matched_runs;
                step.quantity = matched_runs.saturating_mul(step.output_per_run);
                outcome.adapted.insert(step.id);
            }
        }

        for (key, correction) in corrections {
            self.apply_correction(&mut steps, key, correction, context.user, resolver, &mut outcome)?;
        }

        if outcome.adapted.is_empty() && outcome.corrected.is_empty() {
            outcome.steps = steps;
        } else {
            let pinned = crate::pinned_steps(&steps, &outcome.matches);
            let recalculation = StepRecalculator::recalculate(steps, book, &pinned);
            outcome.changed = recalculation.changed;
            outcome.steps = recalculation.steps;
        }

        tracing::info!(
            "計劃 {} 匹配完成: {} 個作業, {} 個步驟調整, {} 個設施校正, 耗時 {}ms",
            plan.id,
            outcome.matches.len(),
            outcome.adapted.len(),
            outcome.corrected.len(),
            start_time.elapsed().as_millis()
        );

        Ok(outcome)
    }

    /// 匹配順序：由淺到深，同層依配方、作業類型與拆分索引
    fn match_order(steps: &[PlanStep]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..steps.len()).collect();
        order.sort_by_key(|&i| {
            let step = &steps[i];
            (
                step.depth,
                step.recipe_id,
                step.activity,
                step.split.map(|s| s.index).unwrap_or(0),
            )
        });
        order
    }

    /// 作業設施與步驟設定不同時，記錄原設定的加成
    fn drift(step: &PlanStep, job: &ExecutionJob) -> Option<FacilityDrift> {
        let observed = job.facility_id?;
        if Some(observed) == step.facility_id {
            return None;
        }
        Some(FacilityDrift {
            configured_facility: step.facility_id,
            observed_facility: observed,
            configured_material_bonus_pct: step.material_bonus_pct,
            configured_time_bonus_pct: step.time_bonus_pct,
        })
    }

    /// 將步驟（或整個拆分群組）切換到實際執行的設施
    fn apply_correction<B>(
        &self,
        steps: &mut [PlanStep],
        key: Uuid,
        correction: Correction,
        user: UserId,
        resolver: &B,
        outcome: &mut MatchOutcome,
    ) -> Result<()>
    where
        B: BonusResolver + ?Sized,
    {
        let Some(head) = steps
            .iter()
            .find(|s| s.id == key || s.group_id() == Some(key))
        else {
            return Ok(());
        };

        let bonus = match resolver.bonus_at(
            correction.facility_id,
            head.product_id,
            head.activity.is_conversion(),
            user,
        ) {
            Ok(bonus) => bonus,
            Err(PlanError::BonusUnavailable(reason)) => {
                tracing::warn!(
                    "作業 {} 的設施 {} 無法解析加成，保留原設定: {}",
                    correction.job_id,
                    correction.facility_id,
                    reason
                );
                outcome.messages.push(format!(
                    "物料 {} 的設施 {} 不在設施清單中",
                    head.product_id, correction.facility_id
                ));
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        for step in steps
            .iter_mut()
            .filter(|s| s.id == key || s.group_id() == Some(key))
        {
            tracing::debug!(
                "步驟 {} 設施校正: {:?} -> {}",
                step.id,
                step.facility_id,
                correction.facility_id
            );
            step.apply_bonus(bonus);
            step.facility_id = Some(correction.facility_id);
            outcome.corrected.insert(step.id);
        }
        Ok(())
    }
}

/// 依序貪婪認領 `job.runs ≤ 剩餘次數` 的作業；仍有剩餘時，
/// 再取第一個未認領的作業（必然超出）
fn select_jobs<'j>(pool: &[&'j ExecutionJob], runs: u64) -> Vec<&'j ExecutionJob> {
    let mut remaining = runs;
    let mut taken = Vec::new();
    let mut skipped = Vec::new();

    for &job in pool {
        if remaining == 0 {
            break;
        }
        if job.runs <= remaining {
            remaining -= job.runs;
            taken.push(job);
        } else {
            skipped.push(job);
        }
    }

    // 略過的作業都大於當時的剩餘次數，取第一個即最舊的超出作業
    if remaining > 0 {
        if let Some(&job) = skipped.first() {
            taken.push(job);
        }
    }
    taken
}
