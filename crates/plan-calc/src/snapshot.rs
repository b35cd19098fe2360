//! 參考資料批次載入
//!
//! 展開前逐層（廣度優先）收集所有需要的物料，每層只發出一次目錄查詢，
//! 之後的遞迴完全在記憶體中進行。

use plan_core::{
    ActivityKind, BonusResolver, EngineConfig, FacilityBonus, MaterialId, PlanStep, Recipe,
    RecipeBook, RecipeCatalog, RecipeId, UserId,
};
use std::collections::{BTreeSet, HashMap, HashSet};

/// 可作為生產來源的作業類型（製造優先於反應）
const PRODUCING_KINDS: [ActivityKind; 2] = [ActivityKind::Build, ActivityKind::Convert];

/// 載入請求
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRequest<'a> {
    pub user: UserId,
    pub roots: &'a [MaterialId],
    pub excluded: &'a BTreeSet<MaterialId>,
    pub overrides: &'a HashMap<MaterialId, FacilityBonus>,
}

/// 不可變的參考資料快照
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    book: RecipeBook,
    producers: HashMap<MaterialId, (RecipeId, ActivityKind)>,
    bonuses: HashMap<(MaterialId, bool), FacilityBonus>,
    overrides: HashMap<MaterialId, FacilityBonus>,
    levels: usize,
}

impl CatalogSnapshot {
    /// 批次載入展開所需的配方、拷貝配方與設施加成
    pub fn load<C, B>(
        catalog: &C,
        resolver: &B,
        request: SnapshotRequest<'_>,
        config: &EngineConfig,
    ) -> plan_core::Result<Self>
    where
        C: RecipeCatalog + ?Sized,
        B: BonusResolver + ?Sized,
    {
        let mut snapshot = CatalogSnapshot {
            overrides: request.overrides.clone(),
            ..Default::default()
        };

        let mut seen: HashSet<MaterialId> = request.roots.iter().copied().collect();
        let mut frontier: Vec<MaterialId> = seen.iter().copied().collect();
        frontier.sort_unstable();

        // 多載入一層，讓展開器能偵測超出深度上限
        let max_levels = config.max_depth as usize + 2;

        while !frontier.is_empty() && snapshot.levels < max_levels {
            let found = catalog.find_producers(&frontier, &PRODUCING_KINDS)?;
            snapshot.levels += 1;

            tracing::debug!(
                "快照第 {} 層: 查詢 {} 個物料，找到 {} 個配方",
                snapshot.levels,
                frontier.len(),
                found.len()
            );

            let mut next = Vec::new();
            for material_id in frontier {
                let Some(recipe) = found
                    .get(&material_id)
                    .and_then(|recipes| Self::choose_producer(recipes))
                else {
                    continue;
                };

                for input in &recipe.inputs {
                    if !request.excluded.contains(&input.material_id)
                        && seen.insert(input.material_id)
                    {
                        next.push(input.material_id);
                    }
                }

                snapshot
                    .producers
                    .insert(material_id, (recipe.id, recipe.activity));
                snapshot.book.insert(recipe.clone());
            }

            next.sort_unstable();
            frontier = next;
        }

        if config.include_copy_steps {
            let keys: Vec<(RecipeId, ActivityKind)> = snapshot
                .book
                .iter()
                .filter(|r| r.activity == ActivityKind::Build)
                .map(|r| (r.id, ActivityKind::Duplicate))
                .collect();
            if !keys.is_empty() {
                let copies = catalog.find_recipes(&keys)?;
                snapshot.book.extend(copies);
            }
        }

        let mut lookups: Vec<(MaterialId, bool)> = snapshot
            .producers
            .iter()
            .filter(|(material_id, _)| !snapshot.overrides.contains_key(material_id))
            .map(|(material_id, (_, activity))| (*material_id, activity.is_conversion()))
            .collect();
        lookups.sort_unstable();

        for (material_id, is_conversion) in lookups {
            if let Some(bonus) = resolver.best_bonus(material_id, is_conversion, request.user)? {
                snapshot.bonuses.insert((material_id, is_conversion), bonus);
            }
        }

        tracing::debug!(
            "快照完成: {} 層, {} 個配方, {} 個加成",
            snapshot.levels,
            snapshot.book.len(),
            snapshot.bonuses.len()
        );

        Ok(snapshot)
    }

    /// 製造優先於反應；同類型取配方ID最小者
    fn choose_producer(recipes: &[Recipe]) -> Option<&Recipe> {
        recipes
            .iter()
            .filter(|r| PRODUCING_KINDS.contains(&r.activity))
            .min_by_key(|r| (r.activity != ActivityKind::Build, r.id))
    }

    /// 物料的生產配方
    pub fn producer_of(&self, material_id: MaterialId) -> Option<&Recipe> {
        self.producers
            .get(&material_id)
            .and_then(|(id, activity)| self.book.get(*id, *activity))
    }

    /// 配方的拷貝作業
    pub fn duplicate_of(&self, recipe_id: RecipeId) -> Option<&Recipe> {
        self.book.get(recipe_id, ActivityKind::Duplicate)
    }

    /// 物料的設施加成（覆寫優先）；None 表示沒有可用設施
    pub fn bonus_for(&self, material_id: MaterialId, is_conversion: bool) -> Option<FacilityBonus> {
        self.overrides
            .get(&material_id)
            .copied()
            .or_else(|| self.bonuses.get(&(material_id, is_conversion)).copied())
    }

    pub fn book(&self) -> &RecipeBook {
        &self.book
    }

    pub fn into_book(self) -> RecipeBook {
        self.book
    }

    /// 目錄查詢的層數
    pub fn levels(&self) -> usize {
        self.levels
    }
}

/// 為已持久化的步驟批次載入配方
pub fn load_book_for_steps<C>(catalog: &C, steps: &[PlanStep]) -> plan_core::Result<RecipeBook>
where
    C: RecipeCatalog + ?Sized,
{
    let mut keys: Vec<(RecipeId, ActivityKind)> = steps.iter().map(|s| s.key()).collect();
    keys.sort_unstable();
    keys.dedup();

    if keys.is_empty() {
        return Ok(RecipeBook::new());
    }

    Ok(catalog.find_recipes(&keys)?.into_iter().collect())
}
