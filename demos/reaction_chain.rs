//! 反應鏈計劃示例
//!
//! 兩個產品共用同一反應中間品：展開、合併、校正反應需求、拆分長作業，
//! 再修改一個步驟的效率並觀察重算結果。
//!
//! 執行：`RUST_LOG=debug cargo run --example reaction_chain`

use anyhow::Result;
use plan_cache::{InMemoryPlanStore, StepEdit};
use plan_calc::{FacilityBonusResolver, FacilityRegistry, PlanCalculator};
use plan_core::{
    ActivityKind, EngineConfig, Facility, FacilityRule, MemorySources, PlanStep, PlanTarget,
    ProductionPlan, Recipe, SplitStrategy,
};
use prodplan::PlanService;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;

fn catalog() -> MemorySources {
    MemorySources::new()
        // 艦船(500)：每次 1 個
        .with_recipe(
            Recipe::new(1000, ActivityKind::Build, 36000)
                .with_input(34, 25000)
                .with_input(600, 40)
                .with_input(700, 12)
                .with_output(500, 1),
        )
        .with_recipe(Recipe::new(1000, ActivityKind::Duplicate, 18000))
        // 組件(700)：每次 10 個
        .with_recipe(
            Recipe::new(1100, ActivityKind::Build, 9000)
                .with_input(35, 400)
                .with_input(600, 20)
                .with_output(700, 10),
        )
        // 複合材料(600)：反應，每次 200 個
        .with_recipe(
            Recipe::new(2000, ActivityKind::Convert, 10800)
                .with_input(16634, 100)
                .with_input(16635, 100)
                .with_output(600, 200),
        )
        .with_skills(1, HashMap::from([(plan_core::skills::SKILL_INDUSTRY, 5)]))
}

fn facilities() -> FacilityBonusResolver {
    FacilityBonusResolver::new().with_registry(
        1,
        FacilityRegistry::new()
            .with_facility(Facility::new(10, "Raitaru").with_rule(FacilityRule::for_activity(
                ActivityKind::Build,
                Decimal::ONE,
                Decimal::from(15),
            )))
            .with_facility(Facility::new(20, "Tatara").with_rule(FacilityRule::for_activity(
                ActivityKind::Convert,
                Decimal::ZERO,
                Decimal::from(25),
            ))),
    )
}

fn print_steps(steps: &[PlanStep]) {
    for step in steps {
        let split = step
            .split
            .map(|s| format!(" [拆分 {}/{}]", s.index + 1, s.total_group_runs))
            .unwrap_or_default();
        println!(
            "  深度 {} | 配方 {:>5} {:<9} | 物料 {:>5} | 數量 {:>6} | 次數 {:>4} | 每次 {:>6}s{}",
            step.depth,
            step.recipe_id,
            format!("{:?}", step.activity),
            step.product_id,
            step.quantity,
            step.runs,
            step.duration_per_run_secs.unwrap_or(0),
            split
        );
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== 反應鏈計劃示例 ===\n");

    let catalog = catalog();
    let resolver = facilities();
    let config = EngineConfig::default().with_split_strategy(SplitStrategy::Fill);
    let service = PlanService::new(InMemoryPlanStore::new(), PlanCalculator::new(config));

    let plan = ProductionPlan::new(1, "巡洋艦 ×20").with_target(PlanTarget::new(500, 20).with_efficiency(10, 20));
    let plan_id = plan.id;
    let result = service.create_plan(plan, &[1], &catalog, &resolver, &catalog)?;

    println!("計劃步驟:");
    print_steps(&result.steps);

    println!("\n原料清單:");
    for (material_id, quantity) in &result.raw_materials {
        println!("  - 物料 {:>5}: {}", material_id, quantity);
    }

    for warning in &result.warnings {
        println!("  ! {:?} 物料 {}: {}", warning.severity, warning.material_id, warning.message);
    }

    let Some(component) = result.steps.iter().find(|s| s.product_id == 700) else {
        return Ok(());
    };
    println!("\n將組件步驟的材料效率改為 0 後重算:");
    let update = service.update_step(
        plan_id,
        component.id,
        &StepEdit::new().material_efficiency(0),
        &[1],
        &catalog,
        &resolver,
        &catalog,
    )?;
    print_steps(&update.steps);
    println!("  變更步驟: {}", update.changed.len());

    Ok(())
}
