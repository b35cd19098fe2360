//! 步驟合併
//!
//! 把生產樹（森林）壓平成以 `(配方, 作業類型)` 為鍵的步驟清單。
//! 重複出現的步驟累加數量後重新計算運行次數，不直接加總運行次數。

use plan_core::{ActivityKind, EngineConfig, PlanStep, ProductionNode, RecipeId};
use std::collections::HashMap;

use crate::formula;
use crate::snapshot::CatalogSnapshot;

/// 合併中的步驟
struct Accumulated {
    step: PlanStep,
    /// 效率與加成來源節點的深度
    shallowest: u32,
}

/// 步驟合併器
pub struct StepConsolidator;

impl StepConsolidator {
    /// 合併森林並產生拷貝步驟
    ///
    /// 輸出依 `(深度, 配方, 作業類型)` 排序，與走訪順序無關。
    pub fn consolidate(
        forest: &[ProductionNode],
        snapshot: &CatalogSnapshot,
        config: &EngineConfig,
    ) -> Vec<PlanStep> {
        let mut merged: HashMap<(RecipeId, ActivityKind), Accumulated> = HashMap::new();

        for root in forest {
            root.visit(&mut |node| Self::merge(&mut merged, node));
            if let Some(entry) = merged.get_mut(&(root.recipe_id, root.activity)) {
                entry.step.target_quantity += root.quantity;
            }
        }

        let mut steps: Vec<PlanStep> = merged.into_values().map(|a| a.step).collect();

        if config.include_copy_steps {
            let copies: Vec<PlanStep> = steps
                .iter()
                .filter(|s| s.activity == ActivityKind::Build)
                .filter(|s| snapshot.duplicate_of(s.recipe_id).is_some())
                .map(Self::copy_companion)
                .collect();
            steps.extend(copies);
        }

        steps.sort_by_key(|s| (s.depth, s.recipe_id, s.activity));

        tracing::debug!("合併完成: {} 個步驟", steps.len());
        steps
    }

    fn merge(merged: &mut HashMap<(RecipeId, ActivityKind), Accumulated>, node: &ProductionNode) {
        let key = (node.recipe_id, node.activity);

        match merged.get_mut(&key) {
            None => {
                let mut step = PlanStep::new(node.recipe_id, node.activity, node.material_id, node.depth)
                    .with_quantity(node.quantity, node.runs, node.output_per_run)
                    .with_efficiency(node.material_efficiency, node.time_efficiency)
                    .with_bonus(node.bonus);
                step.bonus_missing = node.bonus_missing;
                merged.insert(
                    key,
                    Accumulated {
                        step,
                        shallowest: node.depth,
                    },
                );
            }
            Some(entry) => {
                let step = &mut entry.step;
                step.quantity += node.quantity;
                step.runs = formula::runs_for(step.quantity, step.output_per_run);
                step.depth = step.depth.max(node.depth);

                let shallower = node.depth < entry.shallowest
                    || (node.depth == entry.shallowest
                        && node.material_efficiency > step.material_efficiency);
                if shallower {
                    entry.shallowest = node.depth;
                    step.material_efficiency = node.material_efficiency;
                    step.time_efficiency = node.time_efficiency;
                    step.apply_bonus(node.bonus);
                    step.bonus_missing = node.bonus_missing;
                }
            }
        }
    }

    /// 拷貝步驟：數量 = 主步驟運行次數，每次產出 1
    fn copy_companion(primary: &PlanStep) -> PlanStep {
        PlanStep::new(
            primary.recipe_id,
            ActivityKind::Duplicate,
            primary.product_id,
            primary.depth,
        )
        .with_quantity(primary.runs, primary.runs, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_core::{FacilityBonus, MaterialRequirement, RequirementSource};

    fn node(
        material_id: u32,
        recipe_id: u32,
        activity: ActivityKind,
        quantity: u64,
        output_per_run: u64,
        depth: u32,
        requirements: Vec<MaterialRequirement>,
    ) -> ProductionNode {
        ProductionNode {
            material_id,
            recipe_id,
            activity,
            quantity,
            runs: formula::runs_for(quantity, output_per_run),
            output_per_run,
            depth,
            material_efficiency: if depth == 0 { 10 } else { 0 },
            time_efficiency: 20,
            bonus: FacilityBonus::zero(),
            bonus_missing: true,
            requirements,
        }
    }

    fn produced(child: ProductionNode) -> MaterialRequirement {
        MaterialRequirement {
            material_id: child.material_id,
            base_quantity: 1,
            quantity: child.quantity,
            source: RequirementSource::Produced(Box::new(child)),
        }
    }

    fn forest() -> Vec<ProductionNode> {
        // 兩個分支各自需要反應產物 C(600)：150 與 90
        let a = node(
            501,
            1001,
            ActivityKind::Build,
            10,
            1,
            0,
            vec![produced(node(600, 2000, ActivityKind::Convert, 150, 200, 1, vec![]))],
        );
        let b = node(
            502,
            1002,
            ActivityKind::Build,
            5,
            1,
            0,
            vec![produced(node(
                700,
                1003,
                ActivityKind::Build,
                3,
                1,
                1,
                vec![produced(node(600, 2000, ActivityKind::Convert, 90, 200, 2, vec![]))],
            ))],
        );
        vec![a, b]
    }

    #[test]
    fn test_repeated_steps_sum_quantity_not_runs() {
        let steps = StepConsolidator::consolidate(
            &forest(),
            &CatalogSnapshot::default(),
            &EngineConfig::default(),
        );

        let reaction: Vec<&PlanStep> = steps.iter().filter(|s| s.product_id == 600).collect();
        assert_eq!(reaction.len(), 1);
        assert_eq!(reaction[0].quantity, 240);
        assert_eq!(reaction[0].runs, 2);
        // 取最深的出現位置
        assert_eq!(reaction[0].depth, 2);
    }

    #[test]
    fn test_roots_carry_direct_demand() {
        let steps = StepConsolidator::consolidate(
            &forest(),
            &CatalogSnapshot::default(),
            &EngineConfig::default(),
        );

        let root = steps.iter().find(|s| s.product_id == 501).unwrap();
        assert_eq!(root.target_quantity, 10);
        assert_eq!(root.material_efficiency, 10);
        assert!(root.bonus_missing);

        let intermediate = steps.iter().find(|s| s.product_id == 700).unwrap();
        assert_eq!(intermediate.target_quantity, 0);
    }

    #[test]
    fn test_sorted_and_order_independent() {
        let config = EngineConfig::default();
        let forward = StepConsolidator::consolidate(&forest(), &CatalogSnapshot::default(), &config);

        let mut reversed_forest = forest();
        reversed_forest.reverse();
        let reversed =
            StepConsolidator::consolidate(&reversed_forest, &CatalogSnapshot::default(), &config);

        fn keys(steps: &[PlanStep]) -> Vec<(u32, u32, ActivityKind, u64, u64)> {
            steps
                .iter()
                .map(|s| (s.depth, s.recipe_id, s.activity, s.quantity, s.runs))
                .collect()
        }
        assert_eq!(keys(&forward), keys(&reversed));
        assert!(forward.windows(2).all(|w| w[0].depth <= w[1].depth));
    }
}
