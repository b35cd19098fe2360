//! 反應產物需求校正
//!
//! 合併後，消費者的運行次數以合併總量重新計算，反應步驟的數量因此可能與
//! 實際下游需求不符。此處依下游消費者目前的運行次數、效率與加成重新加總需求。

use plan_core::{ActivityKind, MaterialId, PlanError, PlanStep, RecipeBook};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::formula;

/// 反應需求校正器
pub struct ReactionReconciler;

impl ReactionReconciler {
    /// 校正所有反應步驟，返回新的步驟清單
    pub fn reconcile(steps: Vec<PlanStep>, book: &RecipeBook) -> plan_core::Result<Vec<PlanStep>> {
        Self::detect_cycles(&steps, book)?;

        let mut steps = steps;
        let mut order: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.activity == ActivityKind::Convert)
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| (steps[i].depth, steps[i].recipe_id));

        let mut corrected = 0;
        for index in order {
            let product_id = steps[index].product_id;
            let demand = Self::downstream_demand(&steps, book, index, product_id);

            let step = &mut steps[index];
            if demand == 0 && step.target_quantity == 0 {
                continue;
            }

            let quantity = step.target_quantity + demand;
            let runs = formula::runs_for(quantity, step.output_per_run);
            if quantity != step.quantity || runs != step.runs {
                tracing::debug!(
                    "反應步驟 {} 校正: {} -> {} ({} 次)",
                    product_id,
                    step.quantity,
                    quantity,
                    runs
                );
                step.quantity = quantity;
                step.runs = runs;
                corrected += 1;
            }
        }

        tracing::debug!("反應校正完成: {} 個步驟變更", corrected);
        Ok(steps)
    }

    /// 其他非拷貝步驟對此產物的需求總和
    fn downstream_demand(
        steps: &[PlanStep],
        book: &RecipeBook,
        producer: usize,
        product_id: MaterialId,
    ) -> u64 {
        steps
            .iter()
            .enumerate()
            .filter(|(i, s)| *i != producer && !s.is_copy() && !s.purchased)
            .filter_map(|(_, consumer)| {
                let recipe = book.get(consumer.recipe_id, consumer.activity)?;
                let base = recipe.input_quantity(product_id)?;
                Some(formula::required_quantity(
                    base,
                    consumer.runs,
                    consumer.activity,
                    consumer.material_efficiency,
                    consumer.material_bonus_pct,
                ))
            })
            .sum()
    }

    /// 反應步驟之間的循環偵測（Kahn 演算法）
    ///
    /// 邊 A -> B 表示反應 B 消耗反應 A 的產物。
    pub fn detect_cycles(steps: &[PlanStep], book: &RecipeBook) -> plan_core::Result<()> {
        let conversions: Vec<&PlanStep> = steps
            .iter()
            .filter(|s| s.activity == ActivityKind::Convert)
            .collect();

        let producer_of: HashMap<MaterialId, usize> = conversions
            .iter()
            .enumerate()
            .map(|(i, s)| (s.product_id, i))
            .collect();

        let mut in_degree = vec![0usize; conversions.len()];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); conversions.len()];

        for (consumer, step) in conversions.iter().enumerate() {
            let Some(recipe) = book.get(step.recipe_id, step.activity) else {
                continue;
            };
            let inputs: BTreeSet<MaterialId> = recipe.inputs.iter().map(|i| i.material_id).collect();
            for material_id in inputs {
                if let Some(&producer) = producer_of.get(&material_id) {
                    edges[producer].push(consumer);
                    in_degree[consumer] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..conversions.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut visited = 0;

        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &next in &edges[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited < conversions.len() {
            let mut cycle: Vec<MaterialId> = (0..conversions.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| conversions[i].product_id)
                .collect();
            cycle.sort_unstable();
            tracing::warn!("反應步驟之間存在循環: {:?}", cycle);
            return Err(PlanError::CycleDetected(cycle));
        }

        Ok(())
    }
}
