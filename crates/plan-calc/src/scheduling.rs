//! 作業時間與拆分
//!
//! 為每個步驟計算每次運行時間，並把總時間超過上限的步驟拆分為一個拆分群組。

use plan_core::{
    ActivityKind, CharacterId, EngineConfig, PlanStep, RecipeBook, SkillBonusTable, SkillSource,
    SplitInfo, SplitStrategy,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::formula;

/// 時間排程器
pub struct TimeScheduler<'a> {
    config: &'a EngineConfig,
    /// 每種作業類型的最佳技能乘數
    skill_multipliers: HashMap<ActivityKind, Decimal>,
}

impl<'a> TimeScheduler<'a> {
    /// 不套用技能加成
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            skill_multipliers: HashMap::new(),
        }
    }

    /// 依候選執行者的技能取每種作業的最佳（最小）乘數
    pub fn from_sources<S>(
        config: &'a EngineConfig,
        table: &SkillBonusTable,
        skills: &S,
        operators: &[CharacterId],
    ) -> plan_core::Result<Self>
    where
        S: SkillSource + ?Sized,
    {
        let mut scheduler = Self::new(config);

        for &character_id in operators {
            let levels = skills.levels(character_id)?;
            for activity in [
                ActivityKind::Build,
                ActivityKind::Convert,
                ActivityKind::Duplicate,
                ActivityKind::Invent,
            ] {
                let multiplier = table.multiplier(activity, &levels);
                scheduler
                    .skill_multipliers
                    .entry(activity)
                    .and_modify(|best| *best = (*best).min(multiplier))
                    .or_insert(multiplier);
            }
        }

        tracing::debug!(
            "技能乘數: {} 位執行者, {:?}",
            operators.len(),
            scheduler.skill_multipliers
        );

        Ok(scheduler)
    }

    /// 建構器模式：直接指定作業類型的技能乘數
    pub fn with_skill_multiplier(mut self, activity: ActivityKind, multiplier: Decimal) -> Self {
        self.skill_multipliers.insert(activity, multiplier);
        self
    }

    pub fn skill_multiplier(&self, activity: ActivityKind) -> Decimal {
        self.skill_multipliers
            .get(&activity)
            .copied()
            .unwrap_or(Decimal::ONE)
    }

    /// 計算每次運行時間；找不到配方的步驟保持 None
    pub fn attach_durations(&self, steps: &mut [PlanStep], book: &RecipeBook) {
        for step in steps.iter_mut() {
            step.duration_per_run_secs = book.get(step.recipe_id, step.activity).map(|recipe| {
                formula::duration_per_run(
                    recipe.base_duration_secs,
                    step.activity,
                    step.time_efficiency,
                    step.time_bonus_pct,
                    self.skill_multiplier(step.activity),
                )
            });
        }
    }

    /// 拆分超過時間上限的步驟（拷貝步驟不拆分）
    pub fn split(&self, steps: Vec<PlanStep>) -> Vec<PlanStep> {
        self.split_except(steps, &HashSet::new())
    }

    /// 同 [`split`](Self::split)，但 `keep` 中的步驟保持原樣
    pub fn split_except(&self, steps: Vec<PlanStep>, keep: &HashSet<Uuid>) -> Vec<PlanStep> {
        let Some(ceiling) = self.config.max_job_duration_secs else {
            return steps;
        };

        let mut result = Vec::with_capacity(steps.len());
        for step in steps {
            match step.duration_per_run_secs {
                Some(duration)
                    if !step.is_copy()
                        && !step.is_split()
                        && !keep.contains(&step.id)
                        && duration > 0
                        && duration.saturating_mul(step.runs) > ceiling =>
                {
                    let max_runs = (ceiling / duration).max(1);
                    let parts = split_runs(step.runs, max_runs, self.config.split_strategy);
                    tracing::debug!(
                        "步驟 {} 拆分為 {} 個作業: {:?}",
                        step.product_id,
                        parts.len(),
                        parts
                    );
                    result.extend(split_step(step, &parts));
                }
                _ => result.push(step),
            }
        }
        result
    }

    /// 計算時間後拆分
    pub fn schedule(&self, mut steps: Vec<PlanStep>, book: &RecipeBook) -> Vec<PlanStep> {
        self.attach_durations(&mut steps, book);
        self.split(steps)
    }
}

/// 把 `runs` 分配成每份不超過 `max_runs` 的多份
pub fn split_runs(runs: u64, max_runs: u64, strategy: SplitStrategy) -> Vec<u64> {
    let max_runs = max_runs.max(1);
    if runs <= max_runs {
        return vec![runs];
    }

    let jobs = runs.div_ceil(max_runs);
    match strategy {
        SplitStrategy::Even => {
            let base = runs / jobs;
            let remainder = runs % jobs;
            (0..jobs)
                .map(|i| if i < remainder { base + 1 } else { base })
                .collect()
        }
        SplitStrategy::Fill => (0..jobs)
            .map(|i| if i + 1 < jobs { max_runs } else { runs - max_runs * (jobs - 1) })
            .collect(),
    }
}

/// 依運行次數拆出群組成員；數量按 `runs_i × 產量` 分配，最後一個成員取餘數
fn split_step(step: PlanStep, parts: &[u64]) -> Vec<PlanStep> {
    let group_id = Uuid::new_v4();
    let total_runs = step.runs;
    let total_quantity = step.quantity;
    let last = parts.len().saturating_sub(1);

    let mut assigned = 0u64;
    parts
        .iter()
        .enumerate()
        .map(|(index, &runs)| {
            let mut member = step.clone();
            if index > 0 {
                member.id = Uuid::new_v4();
                member.target_quantity = 0;
            }

            member.runs = runs;
            member.quantity = if index == last {
                total_quantity.saturating_sub(assigned)
            } else {
                (runs * step.output_per_run).min(total_quantity.saturating_sub(assigned))
            };
            assigned += member.quantity;

            member.split = Some(SplitInfo {
                group_id,
                index: index as u32,
                total_group_runs: total_runs,
            });
            member
        })
        .collect()
}
