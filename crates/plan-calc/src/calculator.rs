//! 生產計劃主計算器

use plan_core::{
    BonusResolver, CharacterId, EngineConfig, FacilityBonus, MaterialId, PlanError, PlanStep,
    PlanTarget, ProductionPlan, RecipeBook, RecipeCatalog, SkillBonusTable, SkillSource, UserId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::bom_tree::BomTreeBuilder;
use crate::consolidation::StepConsolidator;
use crate::formula;
use crate::reaction::ReactionReconciler;
use crate::scheduling::TimeScheduler;
use crate::snapshot::{CatalogSnapshot, SnapshotRequest};
use crate::{PlanResult, PlanWarning};

/// 計算請求
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub user: UserId,
    pub targets: Vec<PlanTarget>,
    pub excluded: BTreeSet<MaterialId>,
    /// 指定物料的設施加成（優先於自動選擇）
    pub overrides: HashMap<MaterialId, FacilityBonus>,
    /// 候選執行者（決定技能乘數）
    pub operators: Vec<CharacterId>,
}

impl PlanRequest {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            ..Default::default()
        }
    }

    /// 以既有計劃的目標與排除清單建立請求
    pub fn from_plan(plan: &ProductionPlan) -> Self {
        Self {
            user: plan.owner,
            targets: plan.targets.clone(),
            excluded: plan.excluded.clone(),
            ..Default::default()
        }
    }

    /// 建構器模式：添加目標
    pub fn with_target(mut self, target: PlanTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// 建構器模式：排除物料
    pub fn with_excluded(mut self, materials: impl IntoIterator<Item = MaterialId>) -> Self {
        self.excluded.extend(materials);
        self
    }

    /// 建構器模式：覆寫物料的設施加成
    pub fn with_override(mut self, material_id: MaterialId, bonus: FacilityBonus) -> Self {
        self.overrides.insert(material_id, bonus);
        self
    }

    /// 建構器模式：設置候選執行者
    pub fn with_operators(mut self, operators: impl IntoIterator<Item = CharacterId>) -> Self {
        self.operators.extend(operators);
        self
    }

    fn validate(&self) -> plan_core::Result<()> {
        if self.targets.is_empty() {
            return Err(PlanError::InvalidInput("計劃沒有目標產品".to_string()));
        }

        for target in &self.targets {
            if target.quantity == 0 {
                return Err(PlanError::InvalidInput(format!(
                    "物料 {} 的需求數量必須大於 0",
                    target.material_id
                )));
            }
            if target.material_efficiency > 100 || target.time_efficiency > 100 {
                return Err(PlanError::InvalidInput(format!(
                    "物料 {} 的效率超出範圍",
                    target.material_id
                )));
            }
        }

        Ok(())
    }
}

/// 生產計劃計算器
#[derive(Debug, Clone, Default)]
pub struct PlanCalculator {
    config: EngineConfig,
    skill_table: SkillBonusTable,
}

impl PlanCalculator {
    /// 創建新的計算器（使用標準技能表）
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            skill_table: SkillBonusTable::standard(),
        }
    }

    /// 建構器模式：設置技能表
    pub fn with_skill_table(mut self, table: SkillBonusTable) -> Self {
        self.skill_table = table;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn skill_table(&self) -> &SkillBonusTable {
        &self.skill_table
    }

    /// 主計算入口
    pub fn calculate<C, B, S>(
        &self,
        request: &PlanRequest,
        catalog: &C,
        resolver: &B,
        skills: &S,
    ) -> plan_core::Result<PlanResult>
    where
        C: RecipeCatalog + ?Sized,
        B: BonusResolver + ?Sized,
        S: SkillSource + ?Sized,
    {
        request.validate()?;

        tracing::info!(
            "開始計劃計算：使用者 {}，目標 {} 個，排除 {} 個",
            request.user,
            request.targets.len(),
            request.excluded.len()
        );

        let start_time = std::time::Instant::now();

        // Step 1: 批次載入參考資料
        let roots: Vec<MaterialId> = request.targets.iter().map(|t| t.material_id).collect();
        let snapshot = CatalogSnapshot::load(
            catalog,
            resolver,
            SnapshotRequest {
                user: request.user,
                roots: &roots,
                excluded: &request.excluded,
                overrides: &request.overrides,
            },
            &self.config,
        )?;

        // Step 2: 展開生產樹
        let builder = BomTreeBuilder::new(&snapshot, &self.config, &request.excluded);
        let trees = builder.build_forest(&request.targets)?;
        tracing::debug!("生產樹: {} 棵", trees.len());

        // Step 3: 合併步驟
        let steps = StepConsolidator::consolidate(&trees, &snapshot, &self.config);

        // Step 4: 反應需求校正
        let steps = ReactionReconciler::reconcile(steps, snapshot.book())?;

        let raw_materials = raw_materials(&steps, snapshot.book());

        // Step 5: 時間與拆分
        let scheduler =
            TimeScheduler::from_sources(&self.config, &self.skill_table, skills, &request.operators)?;
        let steps = scheduler.schedule(steps, snapshot.book());

        let mut result = PlanResult::empty();
        result.warnings = collect_warnings(&steps);
        result.steps = steps;
        result.trees = trees;
        result.raw_materials = raw_materials;
        result.calculation_time_ms = Some(start_time.elapsed().as_millis());

        for warning in &result.warnings {
            tracing::warn!("物料 {}: {}", warning.material_id, warning.message);
        }

        tracing::info!("計劃計算完成，耗時 {:?}", start_time.elapsed());
        tracing::info!(
            "步驟數量: {}，原料種類: {}",
            result.steps.len(),
            result.raw_materials.len()
        );

        Ok(result)
    }
}

/// 不由計劃內任何步驟產出的投入物料總量
fn raw_materials(steps: &[PlanStep], book: &RecipeBook) -> BTreeMap<MaterialId, u64> {
    let produced: HashSet<MaterialId> = steps
        .iter()
        .filter(|s| !s.is_copy())
        .map(|s| s.product_id)
        .collect();

    let mut totals = BTreeMap::new();
    for step in steps.iter().filter(|s| !s.purchased) {
        let Some(recipe) = book.get(step.recipe_id, step.activity) else {
            continue;
        };
        for input in recipe
            .inputs
            .iter()
            .filter(|i| !produced.contains(&i.material_id))
        {
            *totals.entry(input.material_id).or_insert(0) += formula::required_quantity(
                input.quantity,
                step.runs,
                step.activity,
                step.material_efficiency,
                step.material_bonus_pct,
            );
        }
    }
    totals
}

fn collect_warnings(steps: &[PlanStep]) -> Vec<PlanWarning> {
    let mut warnings = Vec::new();
    let mut reported = HashSet::new();

    for step in steps {
        if step.bonus_missing && reported.insert(step.key()) {
            warnings.push(PlanWarning::warning(
                step.product_id,
                format!("配方 {} 沒有可用設施，加成以 0 計算", step.recipe_id),
            ));
        }
        if step.duration_per_run_secs.is_none() && reported.insert(step.key()) {
            warnings.push(PlanWarning::info(
                step.product_id,
                format!("配方 {} 缺少時間資料", step.recipe_id),
            ));
        }
    }

    warnings
}
