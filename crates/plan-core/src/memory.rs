//! 記憶體資料來源（測試與示例用）

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::execution::{ExecutionJob, SaleTransaction};
use crate::recipe::{ActivityKind, Recipe};
use crate::sources::{ExecutionJobSource, PriceSource, RecipeCatalog, SaleSource, SkillSource};
use crate::{CharacterId, MaterialId, RecipeId, Result, SkillId};

/// 記憶體中的配方目錄、技能、價格、作業與銷售資料
#[derive(Debug, Default)]
pub struct MemorySources {
    recipes: Vec<Recipe>,
    skills: HashMap<CharacterId, HashMap<SkillId, u8>>,
    prices: HashMap<MaterialId, Decimal>,
    jobs: Vec<ExecutionJob>,
    sales: Vec<SaleTransaction>,
    catalog_reads: AtomicUsize,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：添加配方
    pub fn with_recipe(mut self, recipe: Recipe) -> Self {
        self.recipes.push(recipe);
        self
    }

    /// 建構器模式：設置角色技能
    pub fn with_skills(mut self, character_id: CharacterId, levels: HashMap<SkillId, u8>) -> Self {
        self.skills.insert(character_id, levels);
        self
    }

    /// 建構器模式：設置價格
    pub fn with_price(mut self, material_id: MaterialId, price: Decimal) -> Self {
        self.prices.insert(material_id, price);
        self
    }

    /// 建構器模式：添加作業紀錄
    pub fn with_job(mut self, job: ExecutionJob) -> Self {
        self.jobs.push(job);
        self
    }

    /// 建構器模式：添加銷售紀錄
    pub fn with_sale(mut self, sale: SaleTransaction) -> Self {
        self.sales.push(sale);
        self
    }

    /// 目錄讀取次數（每次批次查詢計一次）
    pub fn catalog_reads(&self) -> usize {
        self.catalog_reads.load(Ordering::Relaxed)
    }

    fn producers_of(&self, material_id: MaterialId, kinds: &[ActivityKind]) -> Vec<Recipe> {
        let mut recipes: Vec<Recipe> = self
            .recipes
            .iter()
            .filter(|r| kinds.contains(&r.activity) && r.produces(material_id))
            .cloned()
            .collect();
        recipes.sort_by_key(|r| (r.id, r.activity));
        recipes
    }

    fn character_matches(character_ids: &[CharacterId], character_id: CharacterId) -> bool {
        character_ids.is_empty() || character_ids.contains(&character_id)
    }
}

impl RecipeCatalog for MemorySources {
    fn find_producer(&self, material_id: MaterialId, kinds: &[ActivityKind]) -> Result<Vec<Recipe>> {
        self.catalog_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.producers_of(material_id, kinds))
    }

    fn find_producers(
        &self,
        material_ids: &[MaterialId],
        kinds: &[ActivityKind],
    ) -> Result<HashMap<MaterialId, Vec<Recipe>>> {
        self.catalog_reads.fetch_add(1, Ordering::Relaxed);
        Ok(material_ids
            .iter()
            .map(|&id| (id, self.producers_of(id, kinds)))
            .filter(|(_, recipes)| !recipes.is_empty())
            .collect())
    }

    fn find_recipe(&self, recipe_id: RecipeId, activity: ActivityKind) -> Result<Option<Recipe>> {
        Ok(self
            .recipes
            .iter()
            .find(|r| r.id == recipe_id && r.activity == activity)
            .cloned())
    }

    fn find_recipes(&self, keys: &[(RecipeId, ActivityKind)]) -> Result<Vec<Recipe>> {
        self.catalog_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .recipes
            .iter()
            .filter(|r| keys.contains(&(r.id, r.activity)))
            .cloned()
            .collect())
    }
}

impl SkillSource for MemorySources {
    fn levels(&self, character_id: CharacterId) -> Result<HashMap<SkillId, u8>> {
        Ok(self.skills.get(&character_id).cloned().unwrap_or_default())
    }
}

impl PriceSource for MemorySources {
    fn prices(&self, material_ids: &[MaterialId]) -> Result<HashMap<MaterialId, Option<Decimal>>> {
        Ok(material_ids
            .iter()
            .map(|id| (*id, self.prices.get(id).copied()))
            .collect())
    }
}

impl ExecutionJobSource for MemorySources {
    fn jobs_for(
        &self,
        recipe_id: RecipeId,
        character_ids: &[CharacterId],
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionJob>> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.recipe_id == recipe_id)
            .filter(|j| Self::character_matches(character_ids, j.character_id))
            .filter(|j| j.started_at >= since)
            .cloned()
            .collect())
    }
}

impl SaleSource for MemorySources {
    fn sales(
        &self,
        material_id: MaterialId,
        character_ids: &[CharacterId],
        since: DateTime<Utc>,
    ) -> Result<Vec<SaleTransaction>> {
        Ok(self
            .sales
            .iter()
            .filter(|s| s.material_id == material_id)
            .filter(|s| Self::character_matches(character_ids, s.character_id))
            .filter(|s| s.sold_at >= since)
            .cloned()
            .collect())
    }
}
