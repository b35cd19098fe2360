//! # Plan Core
//!
//! 生產計劃核心資料模型、配置與外部介面定義

pub mod config;
pub mod execution;
pub mod facility;
pub mod memory;
pub mod plan;
pub mod recipe;
pub mod skills;
pub mod sources;
pub mod tree;

// Re-export 主要類型
pub use config::{EngineConfig, MatchAdaptation, SplitStrategy};
pub use execution::{
    CostSource, ExecutionJob, FacilityDrift, JobStatus, ProfitMatch, SaleTransaction, StepJobMatch,
};
pub use facility::{Facility, FacilityBonus, FacilityRule};
pub use memory::MemorySources;
pub use plan::{PlanStep, PlanTarget, ProductionPlan, SplitInfo};
pub use recipe::{ActivityKind, Recipe, RecipeBook, RecipeInput, RecipeOutput};
pub use skills::{SkillBonus, SkillBonusTable};
pub use sources::{
    BonusResolver, ExecutionJobSource, MatchingCommit, PlanStore, PriceSource, RecipeCatalog,
    SaleSource, SkillSource, TimeWindow,
};
pub use tree::{MaterialRequirement, ProductionNode, RequirementSource};

/// 物料（產品/原料）ID
pub type MaterialId = u32;
/// 配方ID（同一配方可有多種作業類型）
pub type RecipeId = u32;
/// 技能ID
pub type SkillId = u32;
/// 角色（作業執行者）ID
pub type CharacterId = u64;
/// 設施ID
pub type FacilityId = u64;
/// 使用者ID
pub type UserId = u64;
/// 外部生產作業ID
pub type JobId = u64;
/// 銷售交易ID
pub type TransactionId = u64;

/// 生產計劃錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("找不到物料 {0} 的生產配方")]
    NoProducer(MaterialId),

    #[error("找不到生產計劃: {0}")]
    PlanNotFound(uuid::Uuid),

    #[error("找不到計劃步驟: {0}")]
    StepNotFound(uuid::Uuid),

    #[error("設施/加成資料不可用: {0}")]
    BonusUnavailable(String),

    #[error("偵測到生產鏈循環: {0:?}")]
    CycleDetected(Vec<MaterialId>),

    #[error("展開深度超過上限 {0}")]
    DepthExceeded(u32),

    #[error("無效的輸入: {0}")]
    InvalidInput(String),

    #[error("資料讀取失敗（可重試）: {0}")]
    DataSource(String),

    #[error("計算錯誤: {0}")]
    CalculationError(String),
}

impl PlanError {
    /// 呼叫端可整批重試的錯誤（批次讀取失敗）
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlanError::DataSource(_))
    }
}

pub type Result<T> = std::result::Result<T, PlanError>;
