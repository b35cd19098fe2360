//! 技能時間加成表

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::recipe::ActivityKind;
use crate::SkillId;

/// 製造技能
pub const SKILL_INDUSTRY: SkillId = 3380;
/// 進階製造技能
pub const SKILL_ADVANCED_INDUSTRY: SkillId = 3388;
/// 科學技能（拷貝）
pub const SKILL_SCIENCE: SkillId = 3402;
/// 反應技能
pub const SKILL_REACTIONS: SkillId = 45746;

/// 單一技能的每級時間減免
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillBonus {
    pub skill_id: SkillId,
    /// 每級減免（%）
    pub pct_per_level: Decimal,
}

/// 技能加成表（按作業類型）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillBonusTable {
    pub bonuses: HashMap<ActivityKind, Vec<SkillBonus>>,
}

impl SkillBonusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 標準技能表
    pub fn standard() -> Self {
        Self::new()
            .with_bonus(ActivityKind::Build, SKILL_INDUSTRY, Decimal::from(4))
            .with_bonus(ActivityKind::Build, SKILL_ADVANCED_INDUSTRY, Decimal::from(3))
            .with_bonus(ActivityKind::Convert, SKILL_REACTIONS, Decimal::from(4))
            .with_bonus(ActivityKind::Duplicate, SKILL_SCIENCE, Decimal::from(5))
            .with_bonus(ActivityKind::Duplicate, SKILL_ADVANCED_INDUSTRY, Decimal::from(3))
    }

    /// 建構器模式：添加技能加成
    pub fn with_bonus(mut self, activity: ActivityKind, skill_id: SkillId, pct_per_level: Decimal) -> Self {
        self.bonuses.entry(activity).or_default().push(SkillBonus {
            skill_id,
            pct_per_level,
        });
        self
    }

    /// 計算時間乘數 `Π(1 - level × pct / 100)`
    ///
    /// 缺少的技能視為 0 級。
    pub fn multiplier(&self, activity: ActivityKind, levels: &HashMap<SkillId, u8>) -> Decimal {
        let Some(bonuses) = self.bonuses.get(&activity) else {
            return Decimal::ONE;
        };

        bonuses.iter().fold(Decimal::ONE, |acc, bonus| {
            let level = levels.get(&bonus.skill_id).copied().unwrap_or(0);
            let reduction = Decimal::from(level) * bonus.pct_per_level / Decimal::ONE_HUNDRED;
            acc * (Decimal::ONE - reduction).max(Decimal::ZERO)
        })
    }
}
