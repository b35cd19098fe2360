//! 作業與銷售的 FIFO 利潤匹配
//!
//! 每種物料分別處理：已交付作業依交付時間、銷售依成交時間排序，
//! 雙指標逐筆分配 `min(作業剩餘, 銷售剩餘)`。

use chrono::{DateTime, Duration, Utc};
use plan_core::{
    ActivityKind, CharacterId, CostSource, EngineConfig, ExecutionJob, ExecutionJobSource, JobId,
    MaterialId, PriceSource, ProfitMatch, Recipe, RecipeBook, RecipeCatalog, Result, SaleSource,
    SaleTransaction, TimeWindow, TransactionId, UserId,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// 作業查詢預設往前回溯的天數（窗口開始前開工、窗口內交付的作業）
const DEFAULT_JOB_LOOKBACK_DAYS: i64 = 30;

/// 利潤計算請求
#[derive(Debug, Clone)]
pub struct ProfitRequest<'a> {
    pub user: UserId,
    /// 要結算的產品
    pub materials: &'a [MaterialId],
    /// 納入的角色（空 = 全部）
    pub characters: &'a [CharacterId],
    /// 結算窗口
    pub window: TimeWindow,
    /// 作業查詢起點
    pub jobs_since: DateTime<Utc>,
}

impl<'a> ProfitRequest<'a> {
    pub fn new(
        user: UserId,
        materials: &'a [MaterialId],
        characters: &'a [CharacterId],
        window: TimeWindow,
    ) -> Self {
        Self {
            user,
            materials,
            characters,
            window,
            jobs_since: window.start - Duration::days(DEFAULT_JOB_LOOKBACK_DAYS),
        }
    }

    /// 建構器模式：設置作業查詢起點
    pub fn with_jobs_since(mut self, since: DateTime<Utc>) -> Self {
        self.jobs_since = since;
        self
    }
}

/// 未分配完的作業產出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedJob {
    pub job_id: JobId,
    pub material_id: MaterialId,
    pub units_left: u64,
}

/// 沒有對應作業的銷售數量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedSale {
    pub transaction_id: TransactionId,
    pub material_id: MaterialId,
    pub quantity_left: u64,
}

/// 單一物料的利潤彙總
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitSummary {
    pub material_id: MaterialId,
    /// 已分配數量
    pub units: u64,
    pub revenue: Decimal,
    pub material_cost: Decimal,
    pub job_cost: Decimal,
    pub tax: Decimal,
    pub profit: Decimal,
    /// 平均利潤率（%）
    pub margin_pct: Decimal,
    /// 成本以估算或 0 計的分配筆數
    pub estimated_lines: usize,
}

impl ProfitSummary {
    fn from_matches(material_id: MaterialId, matches: &[ProfitMatch]) -> Self {
        let mut summary = Self {
            material_id,
            units: 0,
            revenue: Decimal::ZERO,
            material_cost: Decimal::ZERO,
            job_cost: Decimal::ZERO,
            tax: Decimal::ZERO,
            profit: Decimal::ZERO,
            margin_pct: Decimal::ZERO,
            estimated_lines: 0,
        };

        for m in matches.iter().filter(|m| m.material_id == material_id) {
            summary.units += m.quantity;
            summary.revenue += m.revenue;
            summary.material_cost += m.material_cost;
            summary.job_cost += m.job_cost_share;
            summary.tax += m.tax;
            summary.profit += m.profit;
            if m.cost_source != CostSource::Inputs {
                summary.estimated_lines += 1;
            }
        }

        if summary.revenue > Decimal::ZERO {
            summary.margin_pct = money(summary.profit / summary.revenue * Decimal::ONE_HUNDRED);
        }
        summary
    }
}

/// 利潤匹配報表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub matches: Vec<ProfitMatch>,
    pub unmatched_jobs: Vec<UnmatchedJob>,
    pub unmatched_sales: Vec<UnmatchedSale>,
    pub summaries: Vec<ProfitSummary>,
}

impl ProfitReport {
    pub fn empty(window: TimeWindow) -> Self {
        Self {
            window_start: window.start,
            window_end: window.end,
            matches: Vec::new(),
            unmatched_jobs: Vec::new(),
            unmatched_sales: Vec::new(),
            summaries: Vec::new(),
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.window_start, self.window_end)
    }

    pub fn total_profit(&self) -> Decimal {
        self.summaries.iter().map(|s| s.profit).sum()
    }

    pub fn summary(&self, material_id: MaterialId) -> Option<&ProfitSummary> {
        self.summaries.iter().find(|s| s.material_id == material_id)
    }
}

/// 單一作業的可分配產出
#[derive(Debug)]
struct JobLot<'j> {
    job: &'j ExecutionJob,
    units: u64,
    units_left: u64,
    unit_cost: Decimal,
    cost_source: CostSource,
}

/// 利潤匹配器
pub struct ProfitMatcher<'a> {
    config: &'a EngineConfig,
}

impl<'a> ProfitMatcher<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// 讀取作業、銷售與價格並完成所有物料的匹配
    pub fn compute<C, J, S, P>(
        &self,
        request: &ProfitRequest<'_>,
        catalog: &C,
        jobs: &J,
        sales: &S,
        prices: &P,
    ) -> Result<ProfitReport>
    where
        C: RecipeCatalog + ?Sized,
        J: ExecutionJobSource + ?Sized,
        S: SaleSource + ?Sized,
        P: PriceSource + ?Sized,
    {
        let start_time = Instant::now();
        let materials: BTreeSet<MaterialId> = request.materials.iter().copied().collect();
        tracing::info!(
            "開始利潤匹配: 使用者 {}, {} 種物料, 窗口 {} ~ {}",
            request.user,
            materials.len(),
            request.window.start,
            request.window.end
        );

        let mut report = ProfitReport::empty(request.window);
        if materials.is_empty() {
            return Ok(report);
        }

        let material_list: Vec<MaterialId> = materials.iter().copied().collect();
        let producers = catalog
            .find_producers(&material_list, &[ActivityKind::Build, ActivityKind::Convert])?;
        let book: RecipeBook = producers.values().flatten().cloned().collect();

        let mut priced: BTreeSet<MaterialId> = materials.clone();
        priced.extend(book.iter().flat_map(|r| r.inputs.iter().map(|i| i.material_id)));
        let price_ids: Vec<MaterialId> = priced.into_iter().collect();
        let price_table = prices.prices(&price_ids)?;

        for &material_id in &materials {
            let recipe_ids: BTreeSet<_> = producers
                .get(&material_id)
                .map(|recipes| recipes.iter().map(|r| r.id).collect())
                .unwrap_or_default();

            let mut delivered = Vec::new();
            for recipe_id in recipe_ids {
                delivered.extend(
                    jobs.jobs_for(recipe_id, request.characters, request.jobs_since)?
                        .into_iter()
                        .filter(|j| j.product_id == material_id && j.is_delivered())
                        .filter(|j| j.ended_at.is_some_and(|at| request.window.contains(at))),
                );
            }

            let sold: Vec<SaleTransaction> = sales
                .sales(material_id, request.characters, request.window.start)?
                .into_iter()
                .filter(|s| request.window.contains(s.sold_at))
                .collect();

            self.match_material(material_id, delivered, sold, &book, &price_table, &mut report);
        }

        tracing::info!(
            "利潤匹配完成: {} 筆分配, {} 個作業與 {} 筆銷售未分配完, 耗時 {}ms",
            report.matches.len(),
            report.unmatched_jobs.len(),
            report.unmatched_sales.len(),
            start_time.elapsed().as_millis()
        );

        Ok(report)
    }

    /// 單一物料的 FIFO 分配，結果附加到報表
    pub fn match_material(
        &self,
        material_id: MaterialId,
        mut jobs: Vec<ExecutionJob>,
        mut sales: Vec<SaleTransaction>,
        book: &RecipeBook,
        prices: &HashMap<MaterialId, Option<Decimal>>,
        report: &mut ProfitReport,
    ) {
        jobs.sort_by_key(|j| (j.ended_at, j.id));
        sales.sort_by_key(|s| (s.sold_at, s.id));

        let mut lots: Vec<JobLot> = jobs
            .iter()
            .map(|job| self.lot(job, book.get(job.recipe_id, job.activity), prices))
            .filter(|lot| lot.units > 0)
            .collect();
        let mut sales_left: Vec<u64> = sales.iter().map(|s| s.quantity).collect();

        let first_new = report.matches.len();
        let (mut job_index, mut sale_index) = (0, 0);
        while job_index < lots.len() && sale_index < sales.len() {
            let lot = &mut lots[job_index];
            let sale = &sales[sale_index];
            let quantity = lot.units_left.min(sales_left[sale_index]);

            if quantity > 0 {
                report.matches.push(self.allocate(lot, sale, quantity));
                lot.units_left -= quantity;
                sales_left[sale_index] -= quantity;
            }

            if lot.units_left == 0 {
                job_index += 1;
            }
            if sales_left[sale_index] == 0 {
                sale_index += 1;
            }
        }

        for lot in lots.iter().filter(|l| l.units_left > 0) {
            report.unmatched_jobs.push(UnmatchedJob {
                job_id: lot.job.id,
                material_id,
                units_left: lot.units_left,
            });
        }
        for (sale, &left) in sales.iter().zip(&sales_left).filter(|(_, &left)| left > 0) {
            report.unmatched_sales.push(UnmatchedSale {
                transaction_id: sale.id,
                material_id,
                quantity_left: left,
            });
        }

        let summary = ProfitSummary::from_matches(material_id, &report.matches[first_new..]);
        tracing::debug!(
            "物料 {}: {} 個分配, 利潤 {}",
            material_id,
            summary.units,
            summary.profit
        );
        report.summaries.push(summary);
    }

    fn lot<'j>(
        &self,
        job: &'j ExecutionJob,
        recipe: Option<&Recipe>,
        prices: &HashMap<MaterialId, Option<Decimal>>,
    ) -> JobLot<'j> {
        let output_per_run = recipe
            .and_then(|r| r.output_per_run(job.product_id))
            .unwrap_or(1);
        let units = job.runs.saturating_mul(output_per_run);
        let (unit_cost, cost_source) = self.unit_cost(job, recipe, units, prices);

        JobLot {
            job,
            units,
            units_left: units,
            unit_cost,
            cost_source,
        }
    }

    /// 單位材料成本：投入基礎數量 × 運行次數 × 價格 / 產出數量
    fn unit_cost(
        &self,
        job: &ExecutionJob,
        recipe: Option<&Recipe>,
        units: u64,
        prices: &HashMap<MaterialId, Option<Decimal>>,
    ) -> (Decimal, CostSource) {
        let price_of = |material_id: MaterialId| prices.get(&material_id).copied().flatten();

        if let Some(recipe) = recipe {
            let total: Option<Decimal> = recipe.inputs.iter().try_fold(Decimal::ZERO, |sum, input| {
                price_of(input.material_id).map(|price| {
                    sum + Decimal::from(input.quantity) * Decimal::from(job.runs) * price
                })
            });
            if let Some(total) = total {
                return (total / Decimal::from(units), CostSource::Inputs);
            }
        }

        match (price_of(job.product_id), self.config.fallback_cost_ratio) {
            (Some(price), Some(ratio)) => {
                tracing::warn!("作業 {} 投入價格不完整，以產品價格估算成本", job.id);
                (price * ratio, CostSource::Fallback)
            }
            _ => {
                tracing::warn!("作業 {} 無法估算成本，以 0 計", job.id);
                (Decimal::ZERO, CostSource::Unavailable)
            }
        }
    }

    fn allocate(&self, lot: &JobLot, sale: &SaleTransaction, quantity: u64) -> ProfitMatch {
        let units = Decimal::from(quantity);
        let revenue = money(units * sale.unit_price);
        let material_cost = money(units * lot.unit_cost);
        let job_cost_share = money(lot.job.cost * units / Decimal::from(lot.units));
        let tax = money(revenue * self.config.sales_tax_rate);

        ProfitMatch {
            job_id: lot.job.id,
            transaction_id: sale.id,
            material_id: sale.material_id,
            quantity,
            revenue,
            material_cost,
            job_cost_share,
            tax,
            profit: revenue - material_cost - job_cost_share - tax,
            sold_at: sale.sold_at,
            cost_source: lot.cost_source,
        }
    }
}

/// 金額取到小數點後兩位（四捨五入）
fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
