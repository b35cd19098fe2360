//! 增量重算
//!
//! 計劃持久化後，使用者修改效率或設施時，由淺到深逐層重新傳遞子件需求。
//! 拆分群組視為一個邏輯步驟，依成員原本的運行次數比例重新分配。

use plan_calc::formula;
use plan_core::{
    ActivityKind, BonusResolver, FacilityBonus, FacilityId, MaterialId, PlanError, PlanStep,
    RecipeBook, RecipeId, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

use crate::dirty_tracking::DirtyTracker;

/// 設施指派變更
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacilityChange {
    Assign(FacilityId),
    Clear,
}

/// 使用者對單一步驟的修改（拆分群組的所有成員一起套用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEdit {
    pub material_efficiency: Option<u8>,
    pub time_efficiency: Option<u8>,
    pub facility: Option<FacilityChange>,
    pub purchased: Option<bool>,
    pub auto_match: Option<bool>,
}

impl StepEdit {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：設置材料效率
    pub fn material_efficiency(mut self, value: u8) -> Self {
        self.material_efficiency = Some(value);
        self
    }

    /// 建構器模式：設置時間效率
    pub fn time_efficiency(mut self, value: u8) -> Self {
        self.time_efficiency = Some(value);
        self
    }

    /// 建構器模式：指派設施
    pub fn facility(mut self, facility_id: FacilityId) -> Self {
        self.facility = Some(FacilityChange::Assign(facility_id));
        self
    }

    /// 建構器模式：清除設施
    pub fn clear_facility(mut self) -> Self {
        self.facility = Some(FacilityChange::Clear);
        self
    }

    /// 建構器模式：設置直接購買
    pub fn purchased(mut self, value: bool) -> Self {
        self.purchased = Some(value);
        self
    }

    /// 建構器模式：設置自動匹配
    pub fn auto_match(mut self, value: bool) -> Self {
        self.auto_match = Some(value);
        self
    }

    fn validate(&self) -> plan_core::Result<()> {
        for value in [self.material_efficiency, self.time_efficiency].into_iter().flatten() {
            if value > 100 {
                return Err(PlanError::InvalidInput(format!("效率超出範圍: {}", value)));
            }
        }
        Ok(())
    }
}

/// 重算結果
#[derive(Debug, Clone)]
pub struct Recalculation {
    pub steps: Vec<PlanStep>,
    /// 數量或運行次數實際改變的步驟
    pub changed: BTreeSet<Uuid>,
}

impl Recalculation {
    /// 沒有任何變更即為穩定
    pub fn is_stable(&self) -> bool {
        self.changed.is_empty()
    }
}

/// 邏輯步驟：單一步驟或一整個拆分群組
#[derive(Debug)]
struct LogicalStep {
    /// 依拆分索引排序的成員
    members: Vec<usize>,
    depth: u32,
}

/// 步驟重算器
pub struct StepRecalculator;

impl StepRecalculator {
    /// 套用使用者修改
    pub fn apply_edit<B>(
        steps: Vec<PlanStep>,
        step_id: Uuid,
        edit: &StepEdit,
        resolver: &B,
        user: UserId,
    ) -> plan_core::Result<Vec<PlanStep>>
    where
        B: BonusResolver + ?Sized,
    {
        edit.validate()?;

        let target = steps
            .iter()
            .find(|s| s.id == step_id)
            .ok_or(PlanError::StepNotFound(step_id))?;
        let group = target.group_id();
        let product_id = target.product_id;
        let is_conversion = target.activity.is_conversion();

        let bonus = match edit.facility {
            Some(FacilityChange::Assign(facility_id)) => Some(Some(resolver.bonus_at(
                facility_id,
                product_id,
                is_conversion,
                user,
            )?)),
            Some(FacilityChange::Clear) => Some(None),
            None => None,
        };

        let mut steps = steps;
        for step in steps
            .iter_mut()
            .filter(|s| s.id == step_id || (group.is_some() && s.group_id() == group))
        {
            if let Some(value) = edit.material_efficiency {
                step.material_efficiency = value;
            }
            if let Some(value) = edit.time_efficiency {
                step.time_efficiency = value;
            }
            if let Some(value) = edit.purchased {
                step.purchased = value;
            }
            if let Some(value) = edit.auto_match {
                step.auto_match = value;
            }
            match bonus {
                Some(Some(found)) => step.apply_bonus(found),
                Some(None) => {
                    step.apply_bonus(FacilityBonus::zero());
                    step.bonus_missing = true;
                }
                None => {}
            }
        }

        tracing::debug!("步驟 {} 已套用修改: {:?}", step_id, edit);
        Ok(steps)
    }

    /// 由淺到深重新傳遞需求
    ///
    /// `pinned` 中的步驟保留自己的運行次數（已對應實際作業），但仍對子件產生需求。
    pub fn recalculate(
        steps: Vec<PlanStep>,
        book: &RecipeBook,
        pinned: &HashSet<Uuid>,
    ) -> Recalculation {
        let mut steps = steps;
        let mut tracker = DirtyTracker::new();
        let logical = Self::logical_steps(&steps);

        let mut owner: HashMap<MaterialId, usize> = HashMap::new();
        for (index, step) in logical.iter().enumerate() {
            owner.entry(steps[step.members[0]].product_id).or_insert(index);
        }

        let mut demand: HashMap<usize, u64> = HashMap::new();

        for (index, step) in logical.iter().enumerate() {
            let target: u64 = step.members.iter().map(|&m| steps[m].target_quantity).sum();
            let is_pinned = step.members.iter().any(|&m| pinned.contains(&steps[m].id));
            let consumed = demand.get(&index).copied();

            if !is_pinned && (consumed.is_some() || target > 0) {
                let quantity = target + consumed.unwrap_or(0);
                let runs = formula::runs_for(quantity, steps[step.members[0]].output_per_run);
                Self::assign(&mut steps, &step.members, quantity, runs, &mut tracker);
            }

            let head = &steps[step.members[0]];
            if head.purchased {
                continue;
            }
            let Some(recipe) = book.get(head.recipe_id, head.activity) else {
                tracing::debug!("配方 {} 不在配方表中，略過子件需求", head.recipe_id);
                continue;
            };

            let total_runs: u64 = step.members.iter().map(|&m| steps[m].runs).sum();
            let inputs: BTreeSet<MaterialId> = recipe.inputs.iter().map(|i| i.material_id).collect();
            for material_id in inputs {
                let Some(&child) = owner.get(&material_id) else {
                    continue;
                };
                if child == index {
                    continue;
                }
                let base = recipe.input_quantity(material_id).unwrap_or(0);
                let need = formula::required_quantity(
                    base,
                    total_runs,
                    head.activity,
                    head.material_efficiency,
                    head.material_bonus_pct,
                );
                *demand.entry(child).or_insert(0) += need;
            }
        }

        Self::heal_groups(&mut steps, &logical);
        Self::follow_copies(&mut steps, &logical, &mut tracker);

        let changed = tracker.take();
        tracing::debug!("重算完成: {} 個步驟變更", changed.len());

        Recalculation { steps, changed }
    }

    fn logical_steps(steps: &[PlanStep]) -> Vec<LogicalStep> {
        let mut logical: Vec<LogicalStep> = Vec::new();
        let mut groups: HashMap<Uuid, usize> = HashMap::new();

        for (index, step) in steps.iter().enumerate().filter(|(_, s)| !s.is_copy()) {
            match step.group_id() {
                Some(group_id) => match groups.get(&group_id) {
                    Some(&slot) => {
                        logical[slot].members.push(index);
                        logical[slot].depth = logical[slot].depth.max(step.depth);
                    }
                    None => {
                        groups.insert(group_id, logical.len());
                        logical.push(LogicalStep {
                            members: vec![index],
                            depth: step.depth,
                        });
                    }
                },
                None => logical.push(LogicalStep {
                    members: vec![index],
                    depth: step.depth,
                }),
            }
        }

        for step in &mut logical {
            step.members
                .sort_by_key(|&m| steps[m].split.map(|s| s.index).unwrap_or(0));
        }
        logical.sort_by_key(|l| {
            let head = &steps[l.members[0]];
            (l.depth, head.recipe_id, head.activity)
        });
        logical
    }

    /// 寫入邏輯步驟的新總量；拆分群組依成員原本的運行次數比例分配
    fn assign(
        steps: &mut [PlanStep],
        members: &[usize],
        quantity: u64,
        runs: u64,
        tracker: &mut DirtyTracker,
    ) {
        let previous: Vec<u64> = members.iter().map(|&m| steps[m].runs).collect();
        let basis: u64 = previous.iter().sum();
        let last = members.len() - 1;

        let mut assigned_runs = 0u64;
        let mut assigned_quantity = 0u64;
        for (position, &member) in members.iter().enumerate() {
            let (member_runs, member_quantity) = if position == last {
                (
                    runs.saturating_sub(assigned_runs),
                    quantity.saturating_sub(assigned_quantity),
                )
            } else {
                let share = if basis == 0 {
                    runs / members.len() as u64
                } else {
                    (runs as u128 * previous[position] as u128 / basis as u128) as u64
                };
                let share_quantity = share
                    .saturating_mul(steps[member].output_per_run)
                    .min(quantity.saturating_sub(assigned_quantity));
                (share, share_quantity)
            };
            assigned_runs += member_runs;
            assigned_quantity += member_quantity;

            let step = &mut steps[member];
            if step.runs != member_runs || step.quantity != member_quantity {
                tracing::debug!(
                    "步驟 {} ({}): {} -> {} ({} 次)",
                    step.id,
                    step.product_id,
                    step.quantity,
                    member_quantity,
                    member_runs
                );
                step.runs = member_runs;
                step.quantity = member_quantity;
                tracker.mark_dirty(step.id);
            }
        }
    }

    /// 修正群組記錄的總運行次數，使其等於成員實際加總
    fn heal_groups(steps: &mut [PlanStep], logical: &[LogicalStep]) {
        for step in logical {
            if !steps[step.members[0]].is_split() {
                continue;
            }
            let total: u64 = step.members.iter().map(|&m| steps[m].runs).sum();
            for &member in &step.members {
                if let Some(info) = steps[member].split.as_mut() {
                    if info.total_group_runs != total {
                        tracing::debug!(
                            "拆分群組 {} 總運行次數修正: {} -> {}",
                            info.group_id,
                            info.total_group_runs,
                            total
                        );
                        info.total_group_runs = total;
                    }
                }
            }
        }
    }

    /// 拷貝步驟跟隨主步驟的運行次數
    fn follow_copies(steps: &mut [PlanStep], logical: &[LogicalStep], tracker: &mut DirtyTracker) {
        let primary_runs: HashMap<RecipeId, u64> = logical
            .iter()
            .filter(|l| steps[l.members[0]].activity == ActivityKind::Build)
            .map(|l| {
                let total = l.members.iter().map(|&m| steps[m].runs).sum();
                (steps[l.members[0]].recipe_id, total)
            })
            .collect();

        for copy in steps.iter_mut().filter(|s| s.is_copy()) {
            let Some(&runs) = primary_runs.get(&copy.recipe_id) else {
                continue;
            };
            if copy.runs != runs || copy.quantity != runs {
                copy.runs = runs;
                copy.quantity = runs;
                tracker.mark_dirty(copy.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_calc::{FacilityBonusResolver, FacilityRegistry};
    use plan_core::{Facility, FacilityRule, Recipe, SplitInfo};
    use rust_decimal::Decimal;

    fn book() -> RecipeBook {
        [
            // P(500): 每次 1 個，投入 C(600) × 15、X(700) × 10
            Recipe::new(1000, ActivityKind::Build, 600)
                .with_input(600, 15)
                .with_input(700, 10)
                .with_output(500, 1),
            Recipe::new(1000, ActivityKind::Duplicate, 600),
            // X(700): 每次 10 個
            Recipe::new(1100, ActivityKind::Build, 7200)
                .with_input(34, 10)
                .with_output(700, 10),
            // C(600): 反應，每次 200 個
            Recipe::new(2000, ActivityKind::Convert, 10800)
                .with_input(16634, 100)
                .with_output(600, 200),
        ]
        .into_iter()
        .collect()
    }

    fn split_members(runs: &[u64], total_runs: u64, depth: u32) -> Vec<PlanStep> {
        let group_id = Uuid::new_v4();
        runs.iter()
            .enumerate()
            .map(|(index, &r)| {
                let mut step = PlanStep::new(1100, ActivityKind::Build, 700, depth)
                    .with_quantity(r * 10, r, 10);
                step.split = Some(SplitInfo {
                    group_id,
                    index: index as u32,
                    total_group_runs: total_runs,
                });
                step
            })
            .collect()
    }

    /// P 50 個，X 拆成 [17, 17, 16]，C 一個步驟
    fn plan() -> Vec<PlanStep> {
        let mut steps = vec![
            PlanStep::new(1000, ActivityKind::Build, 500, 0)
                .with_quantity(50, 50, 1)
                .with_target_quantity(50),
            PlanStep::new(1000, ActivityKind::Duplicate, 500, 0).with_quantity(50, 50, 1),
            PlanStep::new(2000, ActivityKind::Convert, 600, 1).with_quantity(750, 4, 200),
        ];
        steps.extend(split_members(&[17, 17, 16], 50, 1));
        steps
    }

    fn find(steps: &[PlanStep], product_id: MaterialId) -> Vec<&PlanStep> {
        steps
            .iter()
            .filter(|s| s.product_id == product_id && !s.is_copy())
            .collect()
    }

    #[test]
    fn test_consistent_plan_is_stable() {
        let steps = plan();
        let result = StepRecalculator::recalculate(steps.clone(), &book(), &HashSet::new());

        assert!(result.is_stable(), "changed: {:?}", result.changed);
        assert_eq!(result.steps, steps);
    }

    #[test]
    fn test_efficiency_change_propagates_and_redistributes() {
        let steps = plan();
        let root = steps[0].id;
        let steps = StepRecalculator::apply_edit(
            steps,
            root,
            &StepEdit::new().material_efficiency(10),
            &FacilityBonusResolver::new(),
            1,
        )
        .unwrap();

        let first = StepRecalculator::recalculate(steps, &book(), &HashSet::new());

        // C: 15 × 50 × 0.9 = 675，4 次
        let reaction = find(&first.steps, 600);
        assert_eq!(reaction[0].quantity, 675);
        assert_eq!(reaction[0].runs, 4);

        // X: 10 × 50 × 0.9 = 450 => 45 次，依 17:17:16 分配
        let members = find(&first.steps, 700);
        let runs: Vec<u64> = members.iter().map(|s| s.runs).collect();
        assert_eq!(runs, vec![15, 15, 15]);
        let quantities: Vec<u64> = members.iter().map(|s| s.quantity).collect();
        assert_eq!(quantities.iter().sum::<u64>(), 450);
        assert!(members.iter().all(|s| s.split.map(|i| i.total_group_runs) == Some(45)));

        assert_eq!(first.changed.len(), 4);

        // 第二次重算不應有任何變更
        let second = StepRecalculator::recalculate(first.steps, &book(), &HashSet::new());
        assert!(second.is_stable());
    }

    #[test]
    fn test_stale_group_total_self_heals() {
        let mut steps = vec![PlanStep::new(1000, ActivityKind::Build, 500, 0)
            .with_quantity(50, 50, 1)
            .with_target_quantity(50)];
        steps.extend(split_members(&[17, 17, 16], 60, 1));

        let result = StepRecalculator::recalculate(steps, &book(), &HashSet::new());

        let members = find(&result.steps, 700);
        assert_eq!(members.iter().map(|s| s.runs).sum::<u64>(), 50);
        assert!(members.iter().all(|s| s.split.map(|i| i.total_group_runs) == Some(50)));
        assert!(result.is_stable());
    }

    #[test]
    fn test_uneven_redistribution_last_member_absorbs() {
        let mut steps = vec![PlanStep::new(1000, ActivityKind::Build, 500, 0)
            .with_quantity(25, 25, 1)
            .with_target_quantity(25)];
        steps.extend(split_members(&[17, 17, 16], 50, 1));

        let result = StepRecalculator::recalculate(steps, &book(), &HashSet::new());

        // 250 => 25 次：17/50 × 25 = 8.5 => 8, 8, 9
        let runs: Vec<u64> = find(&result.steps, 700).iter().map(|s| s.runs).collect();
        assert_eq!(runs, vec![8, 8, 9]);
        let quantities: Vec<u64> = find(&result.steps, 700).iter().map(|s| s.quantity).collect();
        assert_eq!(quantities, vec![80, 80, 90]);
    }

    #[test]
    fn test_pinned_step_keeps_runs_but_pushes_demand() {
        let mut steps = plan();
        steps[0].runs = 60;
        steps[0].quantity = 60;
        let pinned = HashSet::from([steps[0].id]);

        let result = StepRecalculator::recalculate(steps, &book(), &pinned);

        assert_eq!(find(&result.steps, 500)[0].runs, 60);
        // 15 × 60 = 900 => 5 次
        assert_eq!(find(&result.steps, 600)[0].runs, 5);
        // 拷貝步驟跟隨主步驟
        let copy = result.steps.iter().find(|s| s.is_copy()).unwrap();
        assert_eq!(copy.runs, 60);
    }

    #[test]
    fn test_purchased_step_places_no_demand() {
        let steps = plan();
        let root = steps[0].id;
        let steps = StepRecalculator::apply_edit(
            steps,
            root,
            &StepEdit::new().purchased(true).material_efficiency(10),
            &FacilityBonusResolver::new(),
            1,
        )
        .unwrap();

        let result = StepRecalculator::recalculate(steps, &book(), &HashSet::new());

        // 子件沒有消費者，保持不變
        assert_eq!(find(&result.steps, 600)[0].quantity, 750);
        assert!(result.is_stable());
    }

    #[test]
    fn test_facility_edit_uses_registry() {
        let resolver = FacilityBonusResolver::new().with_registry(
            1,
            FacilityRegistry::new().with_facility(Facility::new(20, "Tatara").with_rule(
                FacilityRule::for_activity(ActivityKind::Convert, Decimal::from(2), Decimal::from(25)),
            )),
        );
        let steps = plan();
        let reaction = steps[2].id;

        let steps =
            StepRecalculator::apply_edit(steps, reaction, &StepEdit::new().facility(20), &resolver, 1)
                .unwrap();
        let edited = steps.iter().find(|s| s.id == reaction).unwrap();
        assert_eq!(edited.facility_id, Some(20));
        assert_eq!(edited.material_bonus_pct, Decimal::from(2));

        let steps =
            StepRecalculator::apply_edit(steps, reaction, &StepEdit::new().clear_facility(), &resolver, 1)
                .unwrap();
        let edited = steps.iter().find(|s| s.id == reaction).unwrap();
        assert_eq!(edited.facility_id, None);
        assert!(edited.bonus_missing);
    }

    #[test]
    fn test_edit_applies_to_whole_group() {
        let steps = plan();
        let member = steps[4].id;

        let steps = StepRecalculator::apply_edit(
            steps,
            member,
            &StepEdit::new().time_efficiency(10).auto_match(false),
            &FacilityBonusResolver::new(),
            1,
        )
        .unwrap();

        let members = find(&steps, 700);
        assert!(members.iter().all(|s| s.time_efficiency == 10 && !s.auto_match));
        assert_eq!(find(&steps, 500)[0].time_efficiency, 0);
    }

    #[test]
    fn test_edit_errors() {
        let resolver = FacilityBonusResolver::new();

        let err = StepRecalculator::apply_edit(plan(), Uuid::new_v4(), &StepEdit::new(), &resolver, 1)
            .unwrap_err();
        assert!(matches!(err, PlanError::StepNotFound(_)));

        let steps = plan();
        let root = steps[0].id;
        let err = StepRecalculator::apply_edit(
            steps.clone(),
            root,
            &StepEdit::new().material_efficiency(150),
            &resolver,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidInput(_)));

        let err = StepRecalculator::apply_edit(steps, root, &StepEdit::new().facility(99), &resolver, 1)
            .unwrap_err();
        assert!(matches!(err, PlanError::BonusUnavailable(_)));
    }
}
