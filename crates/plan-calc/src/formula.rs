//! 數量與時間公式

use plan_core::ActivityKind;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// 運行次數 = ceil(數量 / 每次產量)
pub fn runs_for(quantity: u64, output_per_run: u64) -> u64 {
    quantity.div_ceil(output_per_run.max(1))
}

/// 套用材料效率與設施加成後的用量
///
/// `max(runs, ceil(round(base × runs × (1 − ME/100) × (1 − bonus/100), 2)))`
///
/// 下限 `runs` 保證每次運行至少一單位。
pub fn adjusted_quantity(
    base_quantity: u64,
    runs: u64,
    material_efficiency: u8,
    bonus_pct: Decimal,
) -> u64 {
    let me_factor = reduction_factor(Decimal::from(material_efficiency));
    let bonus_factor = reduction_factor(bonus_pct);

    let raw = Decimal::from(base_quantity)
        .checked_mul(Decimal::from(runs))
        .and_then(|v| v.checked_mul(me_factor))
        .and_then(|v| v.checked_mul(bonus_factor));

    let adjusted = match raw {
        Some(value) => value
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .ceil()
            .to_u64()
            .unwrap_or(0),
        // Decimal 溢位時不套用減免
        None => base_quantity.saturating_mul(runs),
    };

    adjusted.max(runs)
}

/// 依作業類型計算投入用量（效率只適用於製造）
pub fn required_quantity(
    base_quantity: u64,
    runs: u64,
    activity: ActivityKind,
    material_efficiency: u8,
    bonus_pct: Decimal,
) -> u64 {
    let efficiency = if activity.uses_efficiency() {
        material_efficiency
    } else {
        0
    };
    adjusted_quantity(base_quantity, runs, efficiency, bonus_pct)
}

/// 每次運行時間（秒）
///
/// `ceil(base × (1 − TE/100) × (1 − facility_time/100) × skill_multiplier)`，TE 只適用於製造。
pub fn duration_per_run(
    base_duration_secs: u64,
    activity: ActivityKind,
    time_efficiency: u8,
    facility_time_bonus_pct: Decimal,
    skill_multiplier: Decimal,
) -> u64 {
    let te_factor = if activity.uses_efficiency() {
        reduction_factor(Decimal::from(time_efficiency))
    } else {
        Decimal::ONE
    };

    (Decimal::from(base_duration_secs)
        * te_factor
        * reduction_factor(facility_time_bonus_pct)
        * skill_multiplier.max(Decimal::ZERO))
    .ceil()
    .to_u64()
    .unwrap_or(base_duration_secs)
}

/// `1 - pct/100`，不低於 0
fn reduction_factor(pct: Decimal) -> Decimal {
    (Decimal::ONE - pct / Decimal::ONE_HUNDRED).max(Decimal::ZERO)
}
