//! 作業匹配與利潤報表示例
//!
//! 執行：`RUST_LOG=debug cargo run --example profit_report`

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use plan_cache::InMemoryPlanStore;
use plan_calc::{FacilityBonusResolver, FacilityRegistry, PlanCalculator};
use plan_core::{
    ActivityKind, EngineConfig, ExecutionJob, Facility, FacilityRule, MemorySources, PlanStore,
    PlanTarget, ProductionPlan, Recipe, SaleTransaction, TimeWindow,
};
use plan_matching::ProfitRequest;
use prodplan::PlanService;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== 作業匹配與利潤報表示例 ===\n");

    let month = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).single().unwrap_or_default();
    let delivered = |id, runs, hours| {
        let started = month + Duration::hours(hours);
        ExecutionJob::new(id, 1000, ActivityKind::Build, 500, runs, started)
            .with_facility(10)
            .with_cost(Decimal::from(25_000))
            .delivered_at(started + Duration::hours(30))
    };

    let sources = MemorySources::new()
        .with_recipe(
            Recipe::new(1000, ActivityKind::Build, 3600)
                .with_input(34, 1000)
                .with_input(35, 200)
                .with_output(500, 10),
        )
        .with_price(34, Decimal::new(55, 1))
        .with_price(35, Decimal::new(121, 1))
        .with_price(500, Decimal::from(1200))
        .with_job(delivered(1, 4, 0))
        .with_job(delivered(2, 4, 12))
        .with_job(delivered(3, 2, 48))
        .with_sale(SaleTransaction::new(101, 500, 25, Decimal::from(1250), month + Duration::days(3)))
        .with_sale(SaleTransaction::new(102, 500, 40, Decimal::from(1190), month + Duration::days(5)))
        .with_sale(SaleTransaction::new(103, 500, 50, Decimal::from(1215), month + Duration::days(9)));

    let resolver = FacilityBonusResolver::new().with_registry(
        1,
        FacilityRegistry::new().with_facility(Facility::new(10, "Azbel").with_rule(
            FacilityRule::for_activity(ActivityKind::Build, Decimal::ONE, Decimal::from(20)),
        )),
    );

    let config = EngineConfig::default().with_fallback_cost_ratio(Decimal::new(6, 1));
    let service = PlanService::new(InMemoryPlanStore::new(), PlanCalculator::new(config));

    let plan = ProductionPlan::new(1, "產品 ×90").with_target(PlanTarget::new(500, 90).with_efficiency(10, 20));
    let plan_id = plan.id;
    service.create_plan(plan, &[], &sources, &resolver, &sources)?;

    println!("作業匹配:");
    for outcome in service.match_jobs(1, &[], month, &sources, &sources, &resolver)? {
        for m in &outcome.matches {
            println!("  步驟 {} <- 作業 {} ({} 次)", m.step_id, m.job_id, m.job_runs);
        }
        for message in &outcome.messages {
            println!("  * {}", message);
        }
    }
    let plan = service.store().load_plan(plan_id)?;
    for step in plan.steps.iter().filter(|s| s.product_id == 500) {
        println!("  匹配後產品步驟: {} 次 / {} 個", step.runs, step.quantity);
    }

    let window = TimeWindow::new(month, month + Duration::days(30));
    let request = ProfitRequest::new(1, &[500], &[], window);
    let report = service.compute_profit(&request, &sources, &sources, &sources, &sources)?;

    println!("\n利潤分配:");
    for m in &report.matches {
        println!(
            "  作業 {} -> 銷售 {}: {:>3} 個 | 營收 {:>10} | 材料 {:>9} | 作業 {:>8} | 稅 {:>7} | 利潤 {:>10} ({:?})",
            m.job_id, m.transaction_id, m.quantity, m.revenue, m.material_cost, m.job_cost_share, m.tax, m.profit, m.cost_source
        );
    }
    for job in &report.unmatched_jobs {
        println!("  作業 {} 尚有 {} 個未售出", job.job_id, job.units_left);
    }
    for sale in &report.unmatched_sales {
        println!("  銷售 {} 有 {} 個沒有對應作業", sale.transaction_id, sale.quantity_left);
    }
    for summary in &report.summaries {
        println!(
            "\n物料 {}: {} 個, 營收 {}, 利潤 {}, 利潤率 {}%",
            summary.material_id, summary.units, summary.revenue, summary.profit, summary.margin_pct
        );
    }

    Ok(())
}
