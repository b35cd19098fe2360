//! 集成測試

use chrono::{DateTime, Duration, TimeZone, Utc};
use plan_cache::{InMemoryPlanStore, StepEdit, StepRecalculator};
use plan_calc::{load_book_for_steps, FacilityBonusResolver, FacilityRegistry, PlanCalculator};
use plan_core::*;
use plan_matching::ProfitRequest;
use prodplan::PlanService;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;
use uuid::Uuid;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap()
}

fn recipes() -> Vec<Recipe> {
    vec![
        // P(500): 每次 10 個，投入 M(34) × 100、C(600) × 15
        Recipe::new(1000, ActivityKind::Build, 3600)
            .with_input(34, 100)
            .with_input(600, 15)
            .with_output(500, 10),
        Recipe::new(1000, ActivityKind::Duplicate, 1800),
        // Q(501): 每次 1 個，投入 C × 30
        Recipe::new(1001, ActivityKind::Build, 600)
            .with_input(600, 30)
            .with_output(501, 1),
        // X(510): 每次 1 個，投入 C × 15
        Recipe::new(1010, ActivityKind::Build, 60)
            .with_input(600, 15)
            .with_output(510, 1),
        // L(520): 每次 7200 秒
        Recipe::new(1020, ActivityKind::Build, 7200)
            .with_input(34, 1)
            .with_output(520, 1),
        // C(600): 反應，每次 200 個
        Recipe::new(2000, ActivityKind::Convert, 10800)
            .with_input(16634, 100)
            .with_input(16635, 100)
            .with_output(600, 200),
    ]
}

fn sources() -> MemorySources {
    recipes()
        .into_iter()
        .fold(MemorySources::new(), |sources, recipe| sources.with_recipe(recipe))
}

fn resolver() -> FacilityBonusResolver {
    FacilityBonusResolver::new().with_registry(
        1,
        FacilityRegistry::new()
            .with_facility(Facility::new(10, "Raitaru").with_rule(FacilityRule::for_activity(
                ActivityKind::Build,
                Decimal::ZERO,
                Decimal::from(15),
            )))
            .with_facility(Facility::new(20, "Tatara").with_rule(FacilityRule::for_activity(
                ActivityKind::Convert,
                Decimal::ZERO,
                Decimal::from(25),
            ))),
    )
}

fn service(config: EngineConfig) -> PlanService<InMemoryPlanStore> {
    PlanService::new(InMemoryPlanStore::new(), PlanCalculator::new(config))
}

fn product_step(steps: &[PlanStep], product_id: MaterialId) -> &PlanStep {
    steps
        .iter()
        .find(|s| s.product_id == product_id && !s.is_copy())
        .unwrap()
}

#[test]
fn test_root_quantities_and_raw_materials() {
    // 25 個 @ ME10：3 次，M = 3 × 100 × 0.9 = 270
    let sources = sources();
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "P").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    let plan_id = plan.id;

    let result = service
        .create_plan(plan, &[], &sources, &resolver(), &sources)
        .unwrap();

    let product = product_step(&result.steps, 500);
    assert_eq!(product.runs, 3);
    assert_eq!(product.quantity, 25);
    assert_eq!(result.raw_materials.get(&34), Some(&270));

    let stored = service.store().load_plan(plan_id).unwrap();
    assert_eq!(stored.steps, result.steps);
}

#[test]
fn test_reaction_demand_from_all_consumers() {
    // C 需求：X 10 × 15 = 150，Q 3 × 30 = 90 → 240，每次 200 → 2 次
    let sources = sources();
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "reactions")
        .with_target(PlanTarget::new(510, 10))
        .with_target(PlanTarget::new(501, 3));

    let result = service
        .create_plan(plan, &[], &sources, &resolver(), &sources)
        .unwrap();

    let reaction = product_step(&result.steps, 600);
    assert_eq!(reaction.quantity, 240);
    assert_eq!(reaction.runs, 2);
    assert_eq!(reaction.depth, 1);
    assert_eq!(reaction.facility_id, Some(20));
    assert_eq!(result.raw_materials.get(&16634), Some(&200));
}

#[test]
fn test_long_step_split_strategies() {
    // 7200 秒 × 50 次，上限兩天 → 每個作業最多 24 次
    let sources = sources();
    let plan = || ProductionPlan::new(1, "long").with_target(PlanTarget::new(520, 50));
    let no_facility = FacilityBonusResolver::new();

    let fill = service(EngineConfig::default().with_split_strategy(SplitStrategy::Fill))
        .create_plan(plan(), &[], &sources, &no_facility, &sources)
        .unwrap();
    let runs: Vec<u64> = fill.steps.iter().map(|s| s.runs).collect();
    assert_eq!(runs, vec![24, 24, 2]);

    let even = service(EngineConfig::default())
        .create_plan(plan(), &[], &sources, &no_facility, &sources)
        .unwrap();
    let runs: Vec<u64> = even.steps.iter().map(|s| s.runs).collect();
    assert_eq!(runs, vec![17, 17, 16]);
    assert_eq!(even.steps.iter().map(|s| s.quantity).sum::<u64>(), 50);

    // 沒有設施：加成缺失是警告而非錯誤
    assert!(even
        .warnings
        .iter()
        .any(|w| w.material_id == 520 && w.severity == plan_calc::WarningSeverity::Warning));
}

#[test]
fn test_edit_that_exceeds_ceiling_splits_step() {
    // 29 次 × 5760 秒（TE 20）未超過兩天；改為 TE 0 後 29 × 7200 超過
    let sources = sources();
    let no_facility = FacilityBonusResolver::new();
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "long").with_target(PlanTarget::new(520, 29).with_efficiency(0, 20));
    let plan_id = plan.id;
    let result = service
        .create_plan(plan, &[], &sources, &no_facility, &sources)
        .unwrap();
    assert_eq!(result.steps.len(), 1);
    let step_id = result.steps[0].id;

    let update = service
        .update_step(
            plan_id,
            step_id,
            &StepEdit::new().time_efficiency(0),
            &[],
            &sources,
            &no_facility,
            &sources,
        )
        .unwrap();

    let runs: Vec<u64> = update.steps.iter().map(|s| s.runs).collect();
    assert_eq!(runs, vec![15, 14]);
    assert_eq!(update.steps.iter().map(|s| s.quantity).sum::<u64>(), 29);
    assert_eq!(update.steps[0].id, step_id);
    assert!(update.steps.iter().all(|s| update.changed.contains(&s.id)));

    let stored = service.store().load_plan(plan_id).unwrap();
    assert_eq!(stored.steps, update.steps);
}

#[test]
fn test_cycle_fails_without_saving() {
    let sources = MemorySources::new()
        .with_recipe(Recipe::new(1, ActivityKind::Build, 60).with_input(20, 1).with_output(10, 1))
        .with_recipe(Recipe::new(2, ActivityKind::Build, 60).with_input(10, 1).with_output(20, 1));
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "cycle").with_target(PlanTarget::new(10, 1));

    let err = service
        .create_plan(plan, &[], &sources, &resolver(), &sources)
        .unwrap_err();

    assert!(matches!(err, PlanError::CycleDetected(_)));
    assert!(service.store().plans_for_user(1).unwrap().is_empty());
}

#[test]
fn test_edit_recalculates_and_commits() {
    let sources = sources();
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "P").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    let plan_id = plan.id;
    let result = service
        .create_plan(plan, &[], &sources, &resolver(), &sources)
        .unwrap();

    // C: 15 × 3 × 0.9 = 40.5 → 41
    assert_eq!(product_step(&result.steps, 600).quantity, 41);

    let product_id = product_step(&result.steps, 500).id;
    let update = service
        .update_step(
            plan_id,
            product_id,
            &StepEdit::new().material_efficiency(0),
            &[],
            &sources,
            &resolver(),
            &sources,
        )
        .unwrap();

    // ME 0：15 × 3 = 45
    let reaction = product_step(&update.steps, 600);
    assert_eq!(reaction.quantity, 45);
    assert!(update.changed.contains(&reaction.id));

    let stored = service.store().load_plan(plan_id).unwrap();
    assert_eq!(stored.steps, update.steps);

    // 已一致的計劃再重算不變
    let book = load_book_for_steps(&sources, &stored.steps).unwrap();
    let again = StepRecalculator::recalculate(stored.steps, &book, &HashSet::new());
    assert!(again.is_stable());
}

#[test]
fn test_failed_commit_keeps_previous_plan() {
    let sources = sources();
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "P").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    let plan_id = plan.id;
    let result = service
        .create_plan(plan, &[], &sources, &resolver(), &sources)
        .unwrap();
    let product_id = product_step(&result.steps, 500).id;

    service.store().set_fail_commits(true);
    let err = service
        .update_step(
            plan_id,
            product_id,
            &StepEdit::new().material_efficiency(0),
            &[],
            &sources,
            &resolver(),
            &sources,
        )
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(service.store().load_plan(plan_id).unwrap().steps, result.steps);
}

#[test]
fn test_unknown_step_and_facility_are_errors() {
    let sources = sources();
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "P").with_target(PlanTarget::new(500, 25));
    let plan_id = plan.id;
    let result = service
        .create_plan(plan, &[], &sources, &resolver(), &sources)
        .unwrap();

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        service.update_step(plan_id, missing, &StepEdit::new(), &[], &sources, &resolver(), &sources),
        Err(PlanError::StepNotFound(_))
    ));

    let product_id = product_step(&result.steps, 500).id;
    assert!(matches!(
        service.update_step(
            plan_id,
            product_id,
            &StepEdit::new().facility(999),
            &[],
            &sources,
            &resolver(),
            &sources
        ),
        Err(PlanError::BonusUnavailable(_))
    ));
}

fn build_job(id: JobId, runs: u64, hours: i64) -> ExecutionJob {
    let started = start() + Duration::hours(hours);
    ExecutionJob::new(id, 1000, ActivityKind::Build, 500, runs, started)
        .with_facility(10)
        .with_cost(Decimal::from(100))
        .delivered_at(started + Duration::hours(10))
}

#[test]
fn test_matching_adapts_plan_and_claims_once() {
    let sources = sources().with_job(build_job(1, 2, 0)).with_job(build_job(2, 2, 1));
    let service = service(EngineConfig::default());

    let mut first = ProductionPlan::new(1, "first").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    first.created_at = start();
    let mut second = ProductionPlan::new(1, "second").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    second.created_at = start() + Duration::minutes(1);
    let (first_id, second_id) = (first.id, second.id);

    service
        .create_plan(first, &[], &sources, &resolver(), &sources)
        .unwrap();
    service
        .create_plan(second, &[], &sources, &resolver(), &sources)
        .unwrap();

    let outcomes = service
        .match_jobs(1, &[], start(), &sources, &sources, &resolver())
        .unwrap();
    assert_eq!(outcomes.len(), 2);

    // 2 + 2 = 4 > 3：超出即調整並釘選
    let first_plan = service.store().load_plan(first_id).unwrap();
    let product = product_step(&first_plan.steps, 500);
    assert_eq!(product.runs, 4);
    assert_eq!(product.quantity, 40);
    // C: 15 × 4 × 0.9 = 54
    assert_eq!(product_step(&first_plan.steps, 600).quantity, 54);
    let copy = first_plan.steps.iter().find(|s| s.is_copy()).unwrap();
    assert_eq!(copy.runs, 4);

    let first_matches = service.store().job_matches(first_id).unwrap();
    assert_eq!(first_matches.len(), 2);
    assert!(service.store().job_matches(second_id).unwrap().is_empty());

    // 再匹配一次：結果相同，不再調整
    let again = service
        .match_jobs(1, &[], start(), &sources, &sources, &resolver())
        .unwrap();
    assert!(again[0].adapted.is_empty());
    assert_eq!(service.store().job_matches(first_id).unwrap(), first_matches);

    // 已對應作業的步驟在修改後保留運行次數
    let update = service
        .update_step(
            first_id,
            product.id,
            &StepEdit::new().material_efficiency(0),
            &[],
            &sources,
            &resolver(),
            &sources,
        )
        .unwrap();
    assert_eq!(product_step(&update.steps, 500).runs, 4);
    assert_eq!(product_step(&update.steps, 600).quantity, 60);
}

#[test]
fn test_single_plan_matching_respects_other_claims() {
    let sources = sources().with_job(build_job(1, 3, 0));
    let service = service(EngineConfig::default());

    let mut first = ProductionPlan::new(1, "first").with_target(PlanTarget::new(500, 25));
    first.created_at = start();
    let second = ProductionPlan::new(1, "second").with_target(PlanTarget::new(500, 25));
    let (first_id, second_id) = (first.id, second.id);
    service
        .create_plan(first, &[], &sources, &resolver(), &sources)
        .unwrap();
    service
        .create_plan(second, &[], &sources, &resolver(), &sources)
        .unwrap();

    let outcome = service
        .match_plan_jobs(first_id, &[], start(), &sources, &sources, &resolver())
        .unwrap();
    assert_eq!(outcome.matches.len(), 1);

    let outcome = service
        .match_plan_jobs(second_id, &[], start(), &sources, &sources, &resolver())
        .unwrap();
    assert!(outcome.matches.is_empty());
}

#[test]
fn test_profit_report_is_persisted_idempotently() {
    let sources = sources()
        .with_job(build_job(1, 2, 0))
        .with_job(build_job(2, 2, 1))
        .with_price(34, Decimal::from(5))
        .with_price(600, Decimal::from(10))
        .with_sale(SaleTransaction::new(
            1,
            500,
            25,
            Decimal::from(100),
            start() + Duration::days(2),
        ));
    let service = service(EngineConfig::default());
    let window = TimeWindow::new(start(), start() + Duration::days(30));
    let request = ProfitRequest::new(1, &[500], &[], window);

    let report = service
        .compute_profit(&request, &sources, &sources, &sources, &sources)
        .unwrap();

    let allocations: Vec<(JobId, u64)> = report.matches.iter().map(|m| (m.job_id, m.quantity)).collect();
    assert_eq!(allocations, vec![(1, 20), (2, 5)]);
    assert_eq!(report.unmatched_jobs.len(), 1);
    assert_eq!(report.unmatched_jobs[0].units_left, 15);
    assert!(report.unmatched_sales.is_empty());
    // (100 × 2 × 5 + 15 × 2 × 10) / 20 = 65
    assert_eq!(report.matches[0].material_cost, Decimal::from(1300));

    service
        .compute_profit(&request, &sources, &sources, &sources, &sources)
        .unwrap();
    let stored = service.store().profit_matches(1, window).unwrap();
    assert_eq!(stored, report.matches);
}

#[test]
fn test_profit_for_one_material_keeps_other_materials() {
    let sources = sources()
        .with_job(build_job(1, 2, 0))
        .with_job(
            ExecutionJob::new(3, 1001, ActivityKind::Build, 501, 2, start())
                .with_cost(Decimal::from(10))
                .delivered_at(start() + Duration::hours(1)),
        )
        .with_price(34, Decimal::from(5))
        .with_price(600, Decimal::from(10))
        .with_sale(SaleTransaction::new(1, 500, 5, Decimal::from(100), start() + Duration::days(2)))
        .with_sale(SaleTransaction::new(2, 501, 1, Decimal::from(500), start() + Duration::days(3)));
    let service = service(EngineConfig::default());
    let window = TimeWindow::new(start(), start() + Duration::days(30));

    service
        .compute_profit(&ProfitRequest::new(1, &[500], &[], window), &sources, &sources, &sources, &sources)
        .unwrap();
    service
        .compute_profit(&ProfitRequest::new(1, &[501], &[], window), &sources, &sources, &sources, &sources)
        .unwrap();

    let mut stored: Vec<(MaterialId, TransactionId)> = service
        .store()
        .profit_matches(1, window)
        .unwrap()
        .iter()
        .map(|m| (m.material_id, m.transaction_id))
        .collect();
    stored.sort_unstable();
    assert_eq!(stored, vec![(500, 1), (501, 2)]);
}

/// 第一次讀取作業時通知另一個執行緒，並稍候讓它嘗試修改計劃
struct SignallingJobs<'a> {
    inner: &'a MemorySources,
    started: Mutex<Option<mpsc::Sender<()>>>,
}

impl ExecutionJobSource for SignallingJobs<'_> {
    fn jobs_for(
        &self,
        recipe_id: RecipeId,
        character_ids: &[CharacterId],
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionJob>> {
        if let Some(sender) = self.started.lock().unwrap().take() {
            sender.send(()).unwrap();
            thread::sleep(StdDuration::from_millis(50));
        }
        self.inner.jobs_for(recipe_id, character_ids, since)
    }
}

#[test]
fn test_edit_during_matching_is_not_lost() {
    let sources = sources().with_job(build_job(1, 3, 0));
    let service = service(EngineConfig::default());
    let plan = ProductionPlan::new(1, "P").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    let plan_id = plan.id;
    let result = service
        .create_plan(plan, &[], &sources, &resolver(), &sources)
        .unwrap();
    let product_id = product_step(&result.steps, 500).id;

    let (sender, receiver) = mpsc::channel();
    let jobs = SignallingJobs {
        inner: &sources,
        started: Mutex::new(Some(sender)),
    };

    thread::scope(|scope| {
        let matching = scope.spawn(|| service.match_jobs(1, &[], start(), &sources, &jobs, &resolver()));

        // 匹配進行中修改：必須等匹配寫入後才套用
        receiver.recv().unwrap();
        service
            .update_step(
                plan_id,
                product_id,
                &StepEdit::new().material_efficiency(0),
                &[],
                &sources,
                &resolver(),
                &sources,
            )
            .unwrap();

        matching.join().unwrap().unwrap();
    });

    let stored = service.store().load_plan(plan_id).unwrap();
    let product = product_step(&stored.steps, 500);
    assert_eq!(product.material_efficiency, 0);
    assert_eq!(product.runs, 3);
    // ME 0：15 × 3 = 45
    assert_eq!(product_step(&stored.steps, 600).quantity, 45);
    assert_eq!(service.store().job_matches(plan_id).unwrap().len(), 1);
}

/// 讀取作業時直接從存放區刪除另一個計劃，使匹配寫入失敗
struct DeletingJobs<'a> {
    inner: &'a MemorySources,
    store: &'a InMemoryPlanStore,
    plan_id: Uuid,
}

impl ExecutionJobSource for DeletingJobs<'_> {
    fn jobs_for(
        &self,
        recipe_id: RecipeId,
        character_ids: &[CharacterId],
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionJob>> {
        if self.store.load_plan(self.plan_id).is_ok() {
            self.store.delete_plan(self.plan_id)?;
        }
        self.inner.jobs_for(recipe_id, character_ids, since)
    }
}

#[test]
fn test_failed_matching_pass_writes_nothing() {
    let sources = sources().with_job(build_job(1, 2, 0)).with_job(build_job(2, 2, 1));
    let service = service(EngineConfig::default());

    let mut first = ProductionPlan::new(1, "first").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    first.created_at = start();
    let mut second = ProductionPlan::new(1, "second").with_target(PlanTarget::new(500, 25).with_efficiency(10, 20));
    second.created_at = start() + Duration::minutes(1);
    let (first_id, second_id) = (first.id, second.id);

    let created = service
        .create_plan(first, &[], &sources, &resolver(), &sources)
        .unwrap();
    service
        .create_plan(second, &[], &sources, &resolver(), &sources)
        .unwrap();

    let jobs = DeletingJobs {
        inner: &sources,
        store: service.store(),
        plan_id: second_id,
    };
    let err = service
        .match_jobs(1, &[], start(), &sources, &jobs, &resolver())
        .unwrap_err();

    assert!(matches!(err, PlanError::PlanNotFound(id) if id == second_id));
    // 第一個計劃的匹配與調整都沒有寫入
    assert!(service.store().job_matches(first_id).unwrap().is_empty());
    assert_eq!(service.store().load_plan(first_id).unwrap().steps, created.steps);
}
