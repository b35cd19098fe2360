//! 生產計劃與計劃步驟模型

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::facility::FacilityBonus;
use crate::recipe::ActivityKind;
use crate::{FacilityId, MaterialId, RecipeId, UserId};

/// 拆分群組資訊
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInfo {
    /// 拆分群組ID
    pub group_id: Uuid,
    /// 群組內索引（0 起）
    pub index: u32,
    /// 拆分前的總運行次數
    pub total_group_runs: u64,
}

/// 計劃步驟（持久化的計劃單位）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 步驟ID
    pub id: Uuid,

    /// 配方ID
    pub recipe_id: RecipeId,

    /// 作業類型
    pub activity: ActivityKind,

    /// 產出物料
    pub product_id: MaterialId,

    /// 深度（根 = 0）
    pub depth: u32,

    /// 數量
    pub quantity: u64,

    /// 運行次數
    pub runs: u64,

    /// 每次運行產量
    pub output_per_run: u64,

    /// 使用者直接需求（僅計劃目標有值）
    pub target_quantity: u64,

    /// 材料效率（%）
    pub material_efficiency: u8,

    /// 時間效率（%）
    pub time_efficiency: u8,

    /// 指派的設施
    pub facility_id: Option<FacilityId>,

    /// 材料加成（%）
    pub material_bonus_pct: Decimal,

    /// 時間加成（%）
    pub time_bonus_pct: Decimal,

    /// 設施加成缺失（以 0 計算）
    pub bonus_missing: bool,

    /// 每次運行時間（秒）
    pub duration_per_run_secs: Option<u64>,

    /// 拆分群組
    pub split: Option<SplitInfo>,

    /// 直接購買（不生產，也不對子件產生需求）
    pub purchased: bool,

    /// 是否參與自動作業匹配
    pub auto_match: bool,
}

impl PlanStep {
    /// 創建新的計劃步驟
    pub fn new(
        recipe_id: RecipeId,
        activity: ActivityKind,
        product_id: MaterialId,
        depth: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipe_id,
            activity,
            product_id,
            depth,
            quantity: 0,
            runs: 0,
            output_per_run: 1,
            target_quantity: 0,
            material_efficiency: 0,
            time_efficiency: 0,
            facility_id: None,
            material_bonus_pct: Decimal::ZERO,
            time_bonus_pct: Decimal::ZERO,
            bonus_missing: false,
            duration_per_run_secs: None,
            split: None,
            purchased: false,
            auto_match: true,
        }
    }

    /// 建構器模式：設置數量與運行次數
    pub fn with_quantity(mut self, quantity: u64, runs: u64, output_per_run: u64) -> Self {
        self.quantity = quantity;
        self.runs = runs;
        self.output_per_run = output_per_run;
        self
    }

    /// 建構器模式：設置效率
    pub fn with_efficiency(mut self, material_efficiency: u8, time_efficiency: u8) -> Self {
        self.material_efficiency = material_efficiency;
        self.time_efficiency = time_efficiency;
        self
    }

    /// 建構器模式：設置設施加成
    pub fn with_bonus(mut self, bonus: FacilityBonus) -> Self {
        self.apply_bonus(bonus);
        self
    }

    /// 建構器模式：設置直接需求
    pub fn with_target_quantity(mut self, quantity: u64) -> Self {
        self.target_quantity = quantity;
        self
    }

    /// 套用設施加成
    pub fn apply_bonus(&mut self, bonus: FacilityBonus) {
        self.facility_id = bonus.facility_id;
        self.material_bonus_pct = bonus.material_bonus_pct;
        self.time_bonus_pct = bonus.time_bonus_pct;
        self.bonus_missing = false;
    }

    /// 目前的設施加成
    pub fn bonus(&self) -> FacilityBonus {
        FacilityBonus {
            material_bonus_pct: self.material_bonus_pct,
            time_bonus_pct: self.time_bonus_pct,
            facility_id: self.facility_id,
        }
    }

    /// 是否為拷貝步驟
    pub fn is_copy(&self) -> bool {
        self.activity == ActivityKind::Duplicate
    }

    /// 是否屬於拆分群組
    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }

    /// 拆分群組ID
    pub fn group_id(&self) -> Option<Uuid> {
        self.split.map(|s| s.group_id)
    }

    /// 合併鍵
    pub fn key(&self) -> (RecipeId, ActivityKind) {
        (self.recipe_id, self.activity)
    }

    /// 總時間（秒）
    pub fn total_duration_secs(&self) -> Option<u64> {
        self.duration_per_run_secs.map(|d| d.saturating_mul(self.runs))
    }
}

/// 計劃目標
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTarget {
    pub material_id: MaterialId,
    pub quantity: u64,
    /// 材料效率（%）
    pub material_efficiency: u8,
    /// 時間效率（%）
    pub time_efficiency: u8,
}

impl PlanTarget {
    pub fn new(material_id: MaterialId, quantity: u64) -> Self {
        Self {
            material_id,
            quantity,
            material_efficiency: 0,
            time_efficiency: 0,
        }
    }

    /// 建構器模式：設置效率
    pub fn with_efficiency(mut self, material_efficiency: u8, time_efficiency: u8) -> Self {
        self.material_efficiency = material_efficiency;
        self.time_efficiency = time_efficiency;
        self
    }
}

/// 生產計劃
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionPlan {
    /// 計劃ID
    pub id: Uuid,

    /// 擁有者
    pub owner: UserId,

    /// 名稱
    pub name: String,

    /// 建立時間
    pub created_at: DateTime<Utc>,

    /// 目標產品
    pub targets: Vec<PlanTarget>,

    /// 排除展開的物料
    pub excluded: BTreeSet<MaterialId>,

    /// 計劃步驟
    pub steps: Vec<PlanStep>,
}

impl ProductionPlan {
    /// 創建新的生產計劃
    pub fn new(owner: UserId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            name: name.into(),
            created_at: Utc::now(),
            targets: Vec::new(),
            excluded: BTreeSet::new(),
            steps: Vec::new(),
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

    /// 建構器模式：設置步驟
    pub fn with_steps(mut self, steps: Vec<PlanStep>) -> Self {
        self.steps = steps;
        self
    }

    /// 查找步驟
    pub fn step(&self, step_id: Uuid) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// 產出指定物料的非拷貝步驟
    pub fn steps_for_product(&self, material_id: MaterialId) -> impl Iterator<Item = &PlanStep> {
        self.steps
            .iter()
            .filter(move |s| s.product_id == material_id && !s.is_copy())
    }
}
