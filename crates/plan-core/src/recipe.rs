//! 配方模型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{MaterialId, RecipeId};

/// 作業類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActivityKind {
    /// 製造
    Build,
    /// 反應（轉換，不受材料效率影響）
    Convert,
    /// 藍圖拷貝
    Duplicate,
    /// 發明
    Invent,
}

impl ActivityKind {
    /// 是否為轉換（反應）作業
    pub fn is_conversion(self) -> bool {
        self == ActivityKind::Convert
    }

    /// 材料/時間效率是否適用
    pub fn uses_efficiency(self) -> bool {
        self == ActivityKind::Build
    }
}

/// 配方投入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeInput {
    pub material_id: MaterialId,
    /// 每次運行的基礎用量
    pub quantity: u64,
}

/// 配方產出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeOutput {
    pub material_id: MaterialId,
    /// 每次運行的產量
    pub quantity: u64,
}

/// 配方（不可變參考資料）
///
/// 以 `(id, activity)` 識別：同一藍圖可同時具有製造與拷貝作業。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// 配方ID
    pub id: RecipeId,

    /// 作業類型
    pub activity: ActivityKind,

    /// 投入（保持原始順序）
    pub inputs: Vec<RecipeInput>,

    /// 產出
    pub outputs: Vec<RecipeOutput>,

    /// 每次運行的基礎時間（秒）
    pub base_duration_secs: u64,
}

impl Recipe {
    /// 創建新的配方
    pub fn new(id: RecipeId, activity: ActivityKind, base_duration_secs: u64) -> Self {
        Self {
            id,
            activity,
            inputs: Vec::new(),
            outputs: Vec::new(),
            base_duration_secs,
        }
    }

    /// 建構器模式：添加投入
    pub fn with_input(mut self, material_id: MaterialId, quantity: u64) -> Self {
        self.inputs.push(RecipeInput {
            material_id,
            quantity,
        });
        self
    }

    /// 建構器模式：添加產出
    pub fn with_output(mut self, material_id: MaterialId, quantity: u64) -> Self {
        self.outputs.push(RecipeOutput {
            material_id,
            quantity,
        });
        self
    }

    /// 主要產出
    pub fn primary_output(&self) -> Option<&RecipeOutput> {
        self.outputs.first()
    }

    /// 指定物料的每次運行產量
    pub fn output_per_run(&self, material_id: MaterialId) -> Option<u64> {
        self.outputs
            .iter()
            .find(|o| o.material_id == material_id)
            .map(|o| o.quantity)
    }

    /// 指定物料的每次運行基礎用量（重複列出時加總）
    pub fn input_quantity(&self, material_id: MaterialId) -> Option<u64> {
        let mut found = false;
        let mut total = 0u64;
        for input in self.inputs.iter().filter(|i| i.material_id == material_id) {
            found = true;
            total += input.quantity;
        }
        found.then_some(total)
    }

    /// 是否產出指定物料
    pub fn produces(&self, material_id: MaterialId) -> bool {
        self.outputs.iter().any(|o| o.material_id == material_id)
    }
}

/// 配方簿（批次載入後的唯讀查詢表）
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    recipes: HashMap<(RecipeId, ActivityKind), Recipe>,
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入配方（同鍵覆蓋）
    pub fn insert(&mut self, recipe: Recipe) {
        self.recipes.insert((recipe.id, recipe.activity), recipe);
    }

    pub fn get(&self, recipe_id: RecipeId, activity: ActivityKind) -> Option<&Recipe> {
        self.recipes.get(&(recipe_id, activity))
    }

    pub fn contains(&self, recipe_id: RecipeId, activity: ActivityKind) -> bool {
        self.recipes.contains_key(&(recipe_id, activity))
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }
}

impl FromIterator<Recipe> for RecipeBook {
    fn from_iter<T: IntoIterator<Item = Recipe>>(iter: T) -> Self {
        let mut book = RecipeBook::new();
        for recipe in iter {
            book.insert(recipe);
        }
        book
    }
}

impl Extend<Recipe> for RecipeBook {
    fn extend<T: IntoIterator<Item = Recipe>>(&mut self, iter: T) {
        for recipe in iter {
            self.insert(recipe);
        }
    }
}
