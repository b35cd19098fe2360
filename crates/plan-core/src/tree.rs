//! 生產樹模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::facility::FacilityBonus;
use crate::recipe::ActivityKind;
use crate::{MaterialId, RecipeId};

/// 需求來源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequirementSource {
    /// 原料（目錄中無生產配方）
    Raw,
    /// 使用者排除展開，視為原料
    Excluded,
    /// 可生產的中間品（子樹由父節點獨佔）
    Produced(Box<ProductionNode>),
}

/// 物料需求（父節點到原料或子節點的邊）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRequirement {
    /// 物料ID
    pub material_id: MaterialId,

    /// 每次運行的基礎用量
    pub base_quantity: u64,

    /// 套用效率與設施加成後的總用量
    pub quantity: u64,

    /// 來源
    pub source: RequirementSource,
}

impl MaterialRequirement {
    /// 是否為葉節點（原料或被排除）
    pub fn is_leaf(&self) -> bool {
        !matches!(self.source, RequirementSource::Produced(_))
    }

    /// 子節點
    pub fn child(&self) -> Option<&ProductionNode> {
        match &self.source {
            RequirementSource::Produced(node) => Some(node),
            _ => None,
        }
    }
}

/// 生產節點（一次配方展開）
///
/// 只存在於展開與合併之間，不會持久化為樹。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionNode {
    /// 目標物料
    pub material_id: MaterialId,

    /// 使用的配方
    pub recipe_id: RecipeId,

    /// 作業類型
    pub activity: ActivityKind,

    /// 需求數量
    pub quantity: u64,

    /// 運行次數
    pub runs: u64,

    /// 每次運行產量
    pub output_per_run: u64,

    /// 深度（根 = 0）
    pub depth: u32,

    /// 材料效率（%）
    pub material_efficiency: u8,

    /// 時間效率（%）
    pub time_efficiency: u8,

    /// 套用的設施加成
    pub bonus: FacilityBonus,

    /// 找不到設施加成（以 0 計算）
    pub bonus_missing: bool,

    /// 物料需求
    pub requirements: Vec<MaterialRequirement>,
}

impl ProductionNode {
    /// 直接子節點
    pub fn children(&self) -> impl Iterator<Item = &ProductionNode> {
        self.requirements.iter().filter_map(|r| r.child())
    }

    /// 前序走訪整棵樹
    pub fn visit<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a ProductionNode),
    {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// 節點總數
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    /// 最大深度
    pub fn max_depth(&self) -> u32 {
        let mut depth = 0;
        self.visit(&mut |node| depth = depth.max(node.depth));
        depth
    }

    /// 彙總所有葉節點物料（購物清單）
    pub fn leaf_materials(&self) -> BTreeMap<MaterialId, u64> {
        let mut totals = BTreeMap::new();
        self.visit(&mut |node| {
            for req in node.requirements.iter().filter(|r| r.is_leaf()) {
                *totals.entry(req.material_id).or_insert(0) += req.quantity;
            }
        });
        totals
    }
}
