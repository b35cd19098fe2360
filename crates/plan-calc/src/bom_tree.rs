//! 生產樹展開
//!
//! 從目標產品遞迴展開配方，逐層套用材料效率與設施加成。
//! 所有參考資料都來自預先載入的 [`CatalogSnapshot`]，展開過程不做任何 I/O。

use plan_core::{
    EngineConfig, FacilityBonus, MaterialId, MaterialRequirement, PlanError, PlanTarget,
    ProductionNode, Recipe, RequirementSource,
};
use rayon::prelude::*;
use std::collections::BTreeSet;

use crate::formula;
use crate::snapshot::CatalogSnapshot;

/// 生產樹建構器
pub struct BomTreeBuilder<'a> {
    snapshot: &'a CatalogSnapshot,
    config: &'a EngineConfig,
    excluded: &'a BTreeSet<MaterialId>,
}

impl<'a> BomTreeBuilder<'a> {
    pub fn new(
        snapshot: &'a CatalogSnapshot,
        config: &'a EngineConfig,
        excluded: &'a BTreeSet<MaterialId>,
    ) -> Self {
        Self {
            snapshot,
            config,
            excluded,
        }
    }

    /// 展開單一目標
    pub fn build(&self, target: &PlanTarget) -> plan_core::Result<ProductionNode> {
        let recipe = self
            .snapshot
            .producer_of(target.material_id)
            .ok_or(PlanError::NoProducer(target.material_id))?;

        let mut path = Vec::new();
        let root = self.expand(
            recipe,
            target.material_id,
            target.quantity,
            0,
            (target.material_efficiency, target.time_efficiency),
            &mut path,
        )?;

        tracing::debug!(
            "物料 {} 展開完成: {} 個節點，最大深度 {}",
            target.material_id,
            root.node_count(),
            root.max_depth()
        );

        Ok(root)
    }

    /// 並行展開多個目標（快照不可變，各樹互不相依）
    pub fn build_forest(&self, targets: &[PlanTarget]) -> plan_core::Result<Vec<ProductionNode>> {
        targets.par_iter().map(|t| self.build(t)).collect()
    }

    fn expand(
        &self,
        recipe: &Recipe,
        material_id: MaterialId,
        quantity: u64,
        depth: u32,
        (material_efficiency, time_efficiency): (u8, u8),
        path: &mut Vec<MaterialId>,
    ) -> plan_core::Result<ProductionNode> {
        if depth > self.config.max_depth {
            return Err(PlanError::DepthExceeded(self.config.max_depth));
        }

        path.push(material_id);

        let output_per_run = recipe.output_per_run(material_id).unwrap_or(1).max(1);
        let runs = formula::runs_for(quantity, output_per_run);

        let found = self
            .snapshot
            .bonus_for(material_id, recipe.activity.is_conversion());
        let bonus_missing = found.is_none();
        let bonus = found.unwrap_or_else(FacilityBonus::zero);

        if bonus_missing {
            tracing::debug!("物料 {} 沒有可用設施，加成以 0 計算", material_id);
        }

        let mut requirements = Vec::with_capacity(recipe.inputs.len());
        for input in &recipe.inputs {
            let required = formula::required_quantity(
                input.quantity,
                runs,
                recipe.activity,
                material_efficiency,
                bonus.material_bonus_pct,
            );

            let source = if self.excluded.contains(&input.material_id) {
                RequirementSource::Excluded
            } else if path.contains(&input.material_id) {
                let mut cycle = path.clone();
                cycle.push(input.material_id);
                return Err(PlanError::CycleDetected(cycle));
            } else {
                match self.snapshot.producer_of(input.material_id) {
                    None => RequirementSource::Raw,
                    Some(child) => {
                        let efficiency = (
                            self.config
                                .child_material_efficiency(child.activity.is_conversion()),
                            self.config.child_time_efficiency,
                        );
                        let node = self.expand(
                            child,
                            input.material_id,
                            required,
                            depth + 1,
                            efficiency,
                            path,
                        )?;
                        RequirementSource::Produced(Box::new(node))
                    }
                }
            };

            requirements.push(MaterialRequirement {
                material_id: input.material_id,
                base_quantity: input.quantity,
                quantity: required,
                source,
            });
        }

        path.pop();

        Ok(ProductionNode {
            material_id,
            recipe_id: recipe.id,
            activity: recipe.activity,
            quantity,
            runs,
            output_per_run,
            depth,
            material_efficiency,
            time_efficiency,
            bonus,
            bonus_missing,
            requirements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bonus::FacilityBonusResolver;
    use crate::snapshot::SnapshotRequest;
    use plan_core::{ActivityKind, MemorySources};
    use std::collections::HashMap;

    fn snapshot_for(sources: &MemorySources, roots: &[MaterialId], config: &EngineConfig) -> CatalogSnapshot {
        let excluded = BTreeSet::new();
        let overrides = HashMap::new();
        CatalogSnapshot::load(
            sources,
            &FacilityBonusResolver::new(),
            SnapshotRequest {
                user: 1,
                roots,
                excluded: &excluded,
                overrides: &overrides,
            },
            config,
        )
        .unwrap()
    }

    fn product_chain() -> MemorySources {
        MemorySources::new()
            // P(500): 每次 10 個，投入 M(34) × 100、C(600) × 5
            .with_recipe(
                Recipe::new(1000, ActivityKind::Build, 3600)
                    .with_input(34, 100)
                    .with_input(600, 5)
                    .with_output(500, 10),
            )
            // C(600): 反應，每次 200 個
            .with_recipe(
                Recipe::new(2000, ActivityKind::Convert, 10800)
                    .with_input(16634, 100)
                    .with_output(600, 200),
            )
    }

    #[test]
    fn test_root_quantities() {
        let sources = product_chain();
        let config = EngineConfig::default();
        let snapshot = snapshot_for(&sources, &[500], &config);
        let excluded = BTreeSet::new();
        let builder = BomTreeBuilder::new(&snapshot, &config, &excluded);

        let root = builder
            .build(&PlanTarget::new(500, 25).with_efficiency(10, 20))
            .unwrap();

        assert_eq!(root.runs, 3);
        assert_eq!(root.depth, 0);
        assert!(root.bonus_missing);

        let minerals = &root.requirements[0];
        assert_eq!(minerals.quantity, 270);
        assert!(minerals.is_leaf());

        // 5 × 3 × 0.9 = 13.5 => 14
        let reaction = root.requirements[1].child().unwrap();
        assert_eq!(reaction.quantity, 14);
        assert_eq!(reaction.runs, 1);
        assert_eq!(reaction.depth, 1);
        assert_eq!(reaction.material_efficiency, 0);
        assert_eq!(reaction.time_efficiency, 20);
        // 反應不套用效率
        assert_eq!(reaction.requirements[0].quantity, 100);
    }

    #[test]
    fn test_excluded_input_is_leaf() {
        let sources = product_chain();
        let config = EngineConfig::default();
        let snapshot = snapshot_for(&sources, &[500], &config);
        let excluded = BTreeSet::from([600]);
        let builder = BomTreeBuilder::new(&snapshot, &config, &excluded);

        let root = builder.build(&PlanTarget::new(500, 10)).unwrap();

        assert_eq!(root.requirements[1].source, RequirementSource::Excluded);
        assert_eq!(root.node_count(), 1);
    }

    #[test]
    fn test_missing_root_recipe() {
        let sources = product_chain();
        let config = EngineConfig::default();
        let snapshot = snapshot_for(&sources, &[34], &config);
        let excluded = BTreeSet::new();
        let builder = BomTreeBuilder::new(&snapshot, &config, &excluded);

        let err = builder.build(&PlanTarget::new(34, 10)).unwrap_err();
        assert!(matches!(err, PlanError::NoProducer(34)));
    }

    #[test]
    fn test_cycle_is_detected() {
        let sources = MemorySources::new()
            .with_recipe(Recipe::new(1, ActivityKind::Build, 60).with_input(20, 1).with_output(10, 1))
            .with_recipe(Recipe::new(2, ActivityKind::Build, 60).with_input(30, 1).with_output(20, 1))
            .with_recipe(Recipe::new(3, ActivityKind::Build, 60).with_input(10, 1).with_output(30, 1));
        let config = EngineConfig::default();
        let snapshot = snapshot_for(&sources, &[10], &config);
        let excluded = BTreeSet::new();
        let builder = BomTreeBuilder::new(&snapshot, &config, &excluded);

        let err = builder.build(&PlanTarget::new(10, 1)).unwrap_err();
        match err {
            PlanError::CycleDetected(path) => assert_eq!(path, vec![10, 20, 30, 10]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_depth_limit() {
        // 線性鏈 0 <- 1 <- 2 <- ... <- 6
        let sources = (0..6u32).fold(MemorySources::new(), |s, i| {
            s.with_recipe(
                Recipe::new(100 + i, ActivityKind::Build, 60)
                    .with_input(i + 1, 1)
                    .with_output(i, 1),
            )
        });
        let excluded = BTreeSet::new();

        let shallow = EngineConfig::default().with_max_depth(3);
        let snapshot = snapshot_for(&sources, &[0], &shallow);
        let err = BomTreeBuilder::new(&snapshot, &shallow, &excluded)
            .build(&PlanTarget::new(0, 1))
            .unwrap_err();
        assert!(matches!(err, PlanError::DepthExceeded(3)));

        let deep = EngineConfig::default().with_max_depth(5);
        let snapshot = snapshot_for(&sources, &[0], &deep);
        let root = BomTreeBuilder::new(&snapshot, &deep, &excluded)
            .build(&PlanTarget::new(0, 1))
            .unwrap();
        assert_eq!(root.max_depth(), 5);
        assert_eq!(root.leaf_materials().get(&6), Some(&1));
    }

    #[test]
    fn test_forest_preserves_target_order() {
        let sources = product_chain();
        let config = EngineConfig::default();
        let snapshot = snapshot_for(&sources, &[500, 600], &config);
        let excluded = BTreeSet::new();
        let builder = BomTreeBuilder::new(&snapshot, &config, &excluded);

        let forest = builder
            .build_forest(&[PlanTarget::new(500, 10), PlanTarget::new(600, 400)])
            .unwrap();

        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].material_id, 500);
        assert_eq!(forest[1].runs, 2);
    }
}
