//! 執行紀錄模型（外部作業、銷售交易與匹配結果）

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recipe::ActivityKind;
use crate::{CharacterId, FacilityId, JobId, MaterialId, RecipeId, TransactionId};

/// 作業狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// 進行中
    Active,
    /// 暫停
    Paused,
    /// 已完成待交付
    Ready,
    /// 已交付
    Delivered,
    /// 已取消
    Cancelled,
    /// 已回退
    Reverted,
}

/// 外部觀察到的生產作業（唯讀）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionJob {
    /// 作業ID
    pub id: JobId,

    /// 配方ID
    pub recipe_id: RecipeId,

    /// 作業類型
    pub activity: ActivityKind,

    /// 產出物料
    pub product_id: MaterialId,

    /// 運行次數
    pub runs: u64,

    /// 狀態
    pub status: JobStatus,

    /// 開始時間
    pub started_at: DateTime<Utc>,

    /// 結束時間
    pub ended_at: Option<DateTime<Utc>>,

    /// 執行設施
    pub facility_id: Option<FacilityId>,

    /// 作業費用
    pub cost: Decimal,

    /// 執行角色
    pub character_id: CharacterId,
}

impl ExecutionJob {
    /// 創建新的作業紀錄
    pub fn new(
        id: JobId,
        recipe_id: RecipeId,
        activity: ActivityKind,
        product_id: MaterialId,
        runs: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            recipe_id,
            activity,
            product_id,
            runs,
            status: JobStatus::Active,
            started_at,
            ended_at: None,
            facility_id: None,
            cost: Decimal::ZERO,
            character_id: 0,
        }
    }

    /// 建構器模式：標記為已交付
    pub fn delivered_at(mut self, ended_at: DateTime<Utc>) -> Self {
        self.status = JobStatus::Delivered;
        self.ended_at = Some(ended_at);
        self
    }

    /// 建構器模式：設置狀態
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// 建構器模式：設置設施
    pub fn with_facility(mut self, facility_id: FacilityId) -> Self {
        self.facility_id = Some(facility_id);
        self
    }

    /// 建構器模式：設置費用
    pub fn with_cost(mut self, cost: Decimal) -> Self {
        self.cost = cost;
        self
    }

    /// 建構器模式：設置執行角色
    pub fn with_character(mut self, character_id: CharacterId) -> Self {
        self.character_id = character_id;
        self
    }

    /// 可參與計劃匹配（取消或回退的作業不計）
    pub fn is_matchable(&self) -> bool {
        !matches!(self.status, JobStatus::Cancelled | JobStatus::Reverted)
    }

    pub fn is_delivered(&self) -> bool {
        self.status == JobStatus::Delivered
    }
}

/// 銷售交易（唯讀）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleTransaction {
    pub id: TransactionId,
    pub material_id: MaterialId,
    pub quantity: u64,
    pub unit_price: Decimal,
    pub sold_at: DateTime<Utc>,
    pub character_id: CharacterId,
}

impl SaleTransaction {
    pub fn new(
        id: TransactionId,
        material_id: MaterialId,
        quantity: u64,
        unit_price: Decimal,
        sold_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            material_id,
            quantity,
            unit_price,
            sold_at,
            character_id: 0,
        }
    }

    /// 建構器模式：設置角色
    pub fn with_character(mut self, character_id: CharacterId) -> Self {
        self.character_id = character_id;
        self
    }
}

/// 設施偏移快照：若步驟使用原設定設施時應有的加成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityDrift {
    pub configured_facility: Option<FacilityId>,
    pub observed_facility: FacilityId,
    pub configured_material_bonus_pct: Decimal,
    pub configured_time_bonus_pct: Decimal,
}

/// 計劃步驟與外部作業的關聯
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepJobMatch {
    pub plan_id: Uuid,
    pub step_id: Uuid,
    pub job_id: JobId,
    /// 作業運行次數
    pub job_runs: u64,
    /// 設施偏移
    pub drift: Option<FacilityDrift>,
}

/// 單位成本來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostSource {
    /// 由投入物料價格計算
    Inputs,
    /// 投入價格缺失，以產品價格比例估算
    Fallback,
    /// 無法估算，以 0 計
    Unavailable,
}

/// 作業與銷售的 FIFO 分配結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitMatch {
    pub job_id: JobId,
    pub transaction_id: TransactionId,
    pub material_id: MaterialId,
    /// 分配數量
    pub quantity: u64,
    /// 營收
    pub revenue: Decimal,
    /// 材料成本
    pub material_cost: Decimal,
    /// 作業費用分攤
    pub job_cost_share: Decimal,
    /// 稅
    pub tax: Decimal,
    /// 利潤
    pub profit: Decimal,
    /// 銷售時間
    pub sold_at: DateTime<Utc>,
    /// 成本來源
    pub cost_source: CostSource,
}
