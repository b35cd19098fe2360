//! # Prodplan
//!
//! 多階段生產計劃引擎：由目標產品展開生產樹、合併為步驟清單、校正反應需求、
//! 依時間上限拆分作業，並在修改與實際執行紀錄對帳時保持計劃一致。
//!
//! 各子 crate：
//! - [`plan_core`]：資料模型、配置、外部介面
//! - [`plan_calc`]：計劃計算
//! - [`plan_cache`]：增量重算、鎖、記憶體存放區
//! - [`plan_matching`]：作業匹配與利潤匹配

pub mod service;

pub use plan_cache;
pub use plan_calc;
pub use plan_core;
pub use plan_matching;

// Re-export 主要類型
pub use plan_cache::{InMemoryPlanStore, Recalculation, StepEdit};
pub use plan_calc::{PlanCalculator, PlanRequest, PlanResult, PlanWarning};
pub use plan_core::{EngineConfig, PlanError, PlanStep, ProductionPlan, Result};
pub use plan_matching::{MatchOutcome, ProfitReport, ProfitRequest};
pub use service::PlanService;
