//! 外部協作者介面
//!
//! 引擎只透過這些窄介面讀取參考資料與執行紀錄，實作方式與引擎正確性無關。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::execution::{ExecutionJob, ProfitMatch, SaleTransaction, StepJobMatch};
use crate::facility::FacilityBonus;
use crate::plan::{PlanStep, ProductionPlan};
use crate::recipe::{ActivityKind, Recipe, RecipeInput};
use crate::{CharacterId, FacilityId, JobId, MaterialId, RecipeId, Result, SkillId, UserId};

/// 配方目錄
pub trait RecipeCatalog {
    /// 查找產出物料的配方（限定作業類型）
    fn find_producer(
        &self,
        material_id: MaterialId,
        kinds: &[ActivityKind],
    ) -> Result<Vec<Recipe>>;

    /// 批次查找：一次讀取多個物料的生產配方
    fn find_producers(
        &self,
        material_ids: &[MaterialId],
        kinds: &[ActivityKind],
    ) -> Result<HashMap<MaterialId, Vec<Recipe>>> {
        let mut found = HashMap::new();
        for &material_id in material_ids {
            let recipes = self.find_producer(material_id, kinds)?;
            if !recipes.is_empty() {
                found.insert(material_id, recipes);
            }
        }
        Ok(found)
    }

    /// 依鍵查找配方
    fn find_recipe(&self, recipe_id: RecipeId, activity: ActivityKind) -> Result<Option<Recipe>>;

    /// 批次依鍵查找配方（不存在的鍵略過）
    fn find_recipes(&self, keys: &[(RecipeId, ActivityKind)]) -> Result<Vec<Recipe>> {
        let mut recipes = Vec::with_capacity(keys.len());
        for &(recipe_id, activity) in keys {
            if let Some(recipe) = self.find_recipe(recipe_id, activity)? {
                recipes.push(recipe);
            }
        }
        Ok(recipes)
    }

    /// 配方投入
    fn find_inputs(&self, recipe_id: RecipeId, activity: ActivityKind) -> Result<Vec<RecipeInput>> {
        Ok(self
            .find_recipe(recipe_id, activity)?
            .map(|r| r.inputs)
            .unwrap_or_default())
    }

    /// 配方是否支援拷貝
    fn supports_duplicate(&self, recipe_id: RecipeId) -> Result<bool> {
        Ok(self
            .find_recipe(recipe_id, ActivityKind::Duplicate)?
            .is_some())
    }
}

/// 設施加成解析
pub trait BonusResolver {
    /// 使用者可用設施中的最佳加成；沒有設施涵蓋時返回 None
    fn best_bonus(
        &self,
        material_id: MaterialId,
        is_conversion: bool,
        user: UserId,
    ) -> Result<Option<FacilityBonus>>;

    /// 指定設施對物料的加成；設施不存在時返回 `BonusUnavailable`
    fn bonus_at(
        &self,
        facility_id: FacilityId,
        material_id: MaterialId,
        is_conversion: bool,
        user: UserId,
    ) -> Result<FacilityBonus>;
}

/// 技能資料來源
pub trait SkillSource {
    fn levels(&self, character_id: CharacterId) -> Result<HashMap<SkillId, u8>>;
}

/// 價格資料來源（缺價以 None 表示，不視為錯誤）
pub trait PriceSource {
    fn prices(&self, material_ids: &[MaterialId]) -> Result<HashMap<MaterialId, Option<Decimal>>>;
}

/// 外部作業來源
pub trait ExecutionJobSource {
    fn jobs_for(
        &self,
        recipe_id: RecipeId,
        character_ids: &[CharacterId],
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionJob>>;
}

/// 銷售交易來源
pub trait SaleSource {
    fn sales(
        &self,
        material_id: MaterialId,
        character_ids: &[CharacterId],
        since: DateTime<Utc>,
    ) -> Result<Vec<SaleTransaction>>;
}

/// 時間區間 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// 單一計劃的匹配寫入內容
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingCommit {
    pub plan_id: Uuid,
    pub steps: Vec<PlanStep>,
    pub matches: Vec<StepJobMatch>,
}

/// 計劃持久化
///
/// 每個 `commit_*`/`replace_*` 呼叫都是一個完整交易：要嘛全部寫入，要嘛不變。
pub trait PlanStore {
    fn load_plan(&self, plan_id: Uuid) -> Result<ProductionPlan>;

    /// 建立或整體取代計劃
    fn save_plan(&self, plan: ProductionPlan) -> Result<()>;

    fn delete_plan(&self, plan_id: Uuid) -> Result<()>;

    /// 使用者的所有計劃（按建立時間排序）
    fn plans_for_user(&self, user: UserId) -> Result<Vec<ProductionPlan>>;

    /// 一次寫入重算後的步驟
    fn commit_recalculation(&self, plan_id: Uuid, steps: Vec<PlanStep>) -> Result<()>;

    fn job_matches(&self, plan_id: Uuid) -> Result<Vec<StepJobMatch>>;

    /// 使用者其他計劃已認領的作業
    fn claimed_jobs(&self, user: UserId, except_plan: Option<Uuid>) -> Result<HashSet<JobId>>;

    /// 一次寫入單一計劃的匹配結果與調整後的步驟
    fn commit_matching(
        &self,
        plan_id: Uuid,
        steps: Vec<PlanStep>,
        matches: Vec<StepJobMatch>,
    ) -> Result<()> {
        self.commit_matching_all(vec![MatchingCommit {
            plan_id,
            steps,
            matches,
        }])
    }

    /// 一次寫入多個計劃的匹配結果；任一計劃失敗則全部不寫入
    fn commit_matching_all(&self, commits: Vec<MatchingCommit>) -> Result<()>;

    /// 刪除區間內這些產品的舊利潤匹配並寫入新結果，其他產品的匹配保留
    fn replace_profit_matches(
        &self,
        user: UserId,
        window: TimeWindow,
        material_ids: &[MaterialId],
        matches: Vec<ProfitMatch>,
    ) -> Result<()>;

    fn profit_matches(&self, user: UserId, window: TimeWindow) -> Result<Vec<ProfitMatch>>;
}
