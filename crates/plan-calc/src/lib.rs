//! # Plan Calculation Engine
//!
//! 生產計劃計算引擎：樹展開、步驟合併、反應校正、時間拆分

pub mod bom_tree;
pub mod bonus;
pub mod calculator;
pub mod consolidation;
pub mod formula;
pub mod reaction;
pub mod scheduling;
pub mod snapshot;

// Re-export 主要類型
pub use bom_tree::BomTreeBuilder;
pub use bonus::{FacilityBonusResolver, FacilityRegistry};
pub use calculator::{PlanCalculator, PlanRequest};
pub use consolidation::StepConsolidator;
pub use reaction::ReactionReconciler;
pub use scheduling::TimeScheduler;
pub use snapshot::{load_book_for_steps, CatalogSnapshot, SnapshotRequest};

use plan_core::{MaterialId, PlanStep, ProductionNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 計劃計算結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    /// 計劃步驟
    pub steps: Vec<PlanStep>,

    /// 生產樹（每個目標一棵）
    pub trees: Vec<ProductionNode>,

    /// 原料購物清單
    pub raw_materials: BTreeMap<MaterialId, u64>,

    /// 警告信息
    pub warnings: Vec<PlanWarning>,

    /// 計算耗時（毫秒）
    pub calculation_time_ms: Option<u128>,
}

impl PlanResult {
    /// 創建空的計算結果
    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            trees: Vec::new(),
            raw_materials: BTreeMap::new(),
            warnings: Vec::new(),
            calculation_time_ms: None,
        }
    }

    /// 添加警告
    pub fn add_warning(&mut self, warning: PlanWarning) {
        self.warnings.push(warning);
    }
}

/// 計劃警告（軟性失敗，不中斷計算）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanWarning {
    pub material_id: MaterialId,
    pub message: String,
    pub severity: WarningSeverity,
}

impl PlanWarning {
    pub fn new(material_id: MaterialId, message: String, severity: WarningSeverity) -> Self {
        Self {
            material_id,
            message,
            severity,
        }
    }

    pub fn info(material_id: MaterialId, message: String) -> Self {
        Self::new(material_id, message, WarningSeverity::Info)
    }

    pub fn warning(material_id: MaterialId, message: String) -> Self {
        Self::new(material_id, message, WarningSeverity::Warning)
    }

    pub fn error(material_id: MaterialId, message: String) -> Self {
        Self::new(material_id, message, WarningSeverity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningSeverity {
    Info,
    Warning,
    Error,
}
