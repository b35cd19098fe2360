//! 引擎配置模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PlanError, Result};

/// 生產計劃引擎配置
///
/// 服務啟動時建立一次，以參考傳入各計算器，不存在隱藏的全域狀態。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 中間製造品的材料效率（%）
    pub child_build_efficiency: u8,

    /// 中間反應品的材料效率（%），反應不受效率影響，通常為 0
    pub child_convert_efficiency: u8,

    /// 中間製造品的時間效率（%）
    pub child_time_efficiency: u8,

    /// 單一作業的時間上限（秒），超過即拆分；None 表示不拆分
    pub max_job_duration_secs: Option<u64>,

    /// 拆分時的運行次數分配方式
    pub split_strategy: SplitStrategy,

    /// 配方支援拷貝時是否產生拷貝步驟
    pub include_copy_steps: bool,

    /// 展開深度上限
    pub max_depth: u32,

    /// 銷售稅率（0-1）
    pub sales_tax_rate: Decimal,

    /// 投入價格缺失時，以產品價格乘此比例估算單位成本
    pub fallback_cost_ratio: Option<Decimal>,

    /// 作業匹配後的計劃調整策略
    pub match_adaptation: MatchAdaptation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            child_build_efficiency: 10,
            child_convert_efficiency: 0,
            child_time_efficiency: 20,
            max_job_duration_secs: Some(2 * 24 * 3600),
            split_strategy: SplitStrategy::Even,
            include_copy_steps: true,
            max_depth: 20,
            sales_tax_rate: Decimal::new(36, 3),
            fallback_cost_ratio: None,
            match_adaptation: MatchAdaptation::OnAnyDifference,
        }
    }
}

impl EngineConfig {
    /// 創建預設配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 從 JSON 載入配置（缺少的欄位使用預設值）
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| PlanError::InvalidInput(format!("配置解析失敗: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 建構器模式：設置中間製造品材料效率
    pub fn with_child_build_efficiency(mut self, efficiency: u8) -> Self {
        self.child_build_efficiency = efficiency;
        self
    }

    /// 建構器模式：設置中間製造品時間效率
    pub fn with_child_time_efficiency(mut self, efficiency: u8) -> Self {
        self.child_time_efficiency = efficiency;
        self
    }

    /// 建構器模式：設置作業時間上限
    pub fn with_max_job_duration(mut self, secs: Option<u64>) -> Self {
        self.max_job_duration_secs = secs;
        self
    }

    /// 建構器模式：設置拆分分配方式
    pub fn with_split_strategy(mut self, strategy: SplitStrategy) -> Self {
        self.split_strategy = strategy;
        self
    }

    /// 建構器模式：設置是否產生拷貝步驟
    pub fn with_copy_steps(mut self, include: bool) -> Self {
        self.include_copy_steps = include;
        self
    }

    /// 建構器模式：設置展開深度上限
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// 建構器模式：設置銷售稅率
    pub fn with_sales_tax_rate(mut self, rate: Decimal) -> Self {
        self.sales_tax_rate = rate;
        self
    }

    /// 建構器模式：設置備援成本比例
    pub fn with_fallback_cost_ratio(mut self, ratio: Decimal) -> Self {
        self.fallback_cost_ratio = Some(ratio);
        self
    }

    /// 建構器模式：設置匹配調整策略
    pub fn with_match_adaptation(mut self, adaptation: MatchAdaptation) -> Self {
        self.match_adaptation = adaptation;
        self
    }

    /// 子節點使用的材料效率
    pub fn child_material_efficiency(&self, is_conversion: bool) -> u8 {
        if is_conversion {
            self.child_convert_efficiency
        } else {
            self.child_build_efficiency
        }
    }

    /// 檢查配置值範圍
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("child_build_efficiency", self.child_build_efficiency),
            ("child_convert_efficiency", self.child_convert_efficiency),
            ("child_time_efficiency", self.child_time_efficiency),
        ] {
            if value > 100 {
                return Err(PlanError::InvalidInput(format!(
                    "{} 超出範圍: {}",
                    name, value
                )));
            }
        }

        if self.sales_tax_rate < Decimal::ZERO || self.sales_tax_rate > Decimal::ONE {
            return Err(PlanError::InvalidInput(format!(
                "sales_tax_rate 超出範圍: {}",
                self.sales_tax_rate
            )));
        }

        if self.max_job_duration_secs == Some(0) {
            return Err(PlanError::InvalidInput(
                "max_job_duration_secs 必須大於 0".to_string(),
            ));
        }

        if self.max_depth == 0 {
            return Err(PlanError::InvalidInput("max_depth 必須大於 0".to_string()));
        }

        Ok(())
    }
}

/// 拆分時的運行次數分配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// 平均分配（各作業相差不超過 1 次）
    Even,
    /// 依序填滿單一作業上限，最後一個作業取餘數
    Fill,
}

/// 作業匹配後的計劃調整策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchAdaptation {
    /// 實際運行數與計劃不同就調整（預設）
    OnAnyDifference,
    /// 只在實際運行數超過計劃時調整
    OnOvershoot,
    /// 不調整
    Never,
}

impl MatchAdaptation {
    /// 依匹配結果判斷是否需要調整
    pub fn should_adapt(self, planned_runs: u64, matched_runs: u64) -> bool {
        if matched_runs == 0 {
            return false;
        }
        match self {
            MatchAdaptation::OnOvershoot => matched_runs > planned_runs,
            MatchAdaptation::OnAnyDifference => matched_runs != planned_runs,
            MatchAdaptation::Never => false,
        }
    }
}
