//! 設施與加成模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::recipe::ActivityKind;
use crate::{FacilityId, MaterialId};

/// 設施加成（材料/時間減免百分比）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityBonus {
    /// 材料減免（%）
    pub material_bonus_pct: Decimal,
    /// 時間減免（%）
    pub time_bonus_pct: Decimal,
    /// 提供加成的設施
    pub facility_id: Option<FacilityId>,
}

impl FacilityBonus {
    pub fn new(material_bonus_pct: Decimal, time_bonus_pct: Decimal) -> Self {
        Self {
            material_bonus_pct,
            time_bonus_pct,
            facility_id: None,
        }
    }

    /// 無加成
    pub fn zero() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO)
    }

    /// 建構器模式：設置設施
    pub fn with_facility(mut self, facility_id: FacilityId) -> Self {
        self.facility_id = Some(facility_id);
        self
    }

    /// 比較兩個加成：材料優先，其次時間，最後設施ID較小者
    pub fn is_better_than(&self, other: &FacilityBonus) -> bool {
        if self.material_bonus_pct != other.material_bonus_pct {
            return self.material_bonus_pct > other.material_bonus_pct;
        }
        if self.time_bonus_pct != other.time_bonus_pct {
            return self.time_bonus_pct > other.time_bonus_pct;
        }
        match (self.facility_id, other.facility_id) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

impl Default for FacilityBonus {
    fn default() -> Self {
        Self::zero()
    }
}

/// 設施加成規則（結構本身或安裝的改裝件）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityRule {
    /// 適用作業
    pub activity: ActivityKind,
    /// 適用物料；None 表示全部
    pub materials: Option<BTreeSet<MaterialId>>,
    pub material_bonus_pct: Decimal,
    pub time_bonus_pct: Decimal,
}

impl FacilityRule {
    /// 適用所有物料的規則
    pub fn for_activity(
        activity: ActivityKind,
        material_bonus_pct: Decimal,
        time_bonus_pct: Decimal,
    ) -> Self {
        Self {
            activity,
            materials: None,
            material_bonus_pct,
            time_bonus_pct,
        }
    }

    /// 建構器模式：限定適用物料
    pub fn limited_to(mut self, materials: impl IntoIterator<Item = MaterialId>) -> Self {
        self.materials = Some(materials.into_iter().collect());
        self
    }

    pub fn applies_to(&self, material_id: MaterialId, activity: ActivityKind) -> bool {
        self.activity == activity
            && self
                .materials
                .as_ref()
                .map_or(true, |set| set.contains(&material_id))
    }
}

/// 使用者設定的生產設施
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    /// 設施ID
    pub id: FacilityId,

    /// 名稱
    pub name: String,

    /// 加成規則
    pub rules: Vec<FacilityRule>,
}

impl Facility {
    /// 創建新的設施
    pub fn new(id: FacilityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// 建構器模式：添加加成規則
    pub fn with_rule(mut self, rule: FacilityRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// 是否有規則涵蓋此物料與作業
    pub fn covers(&self, material_id: MaterialId, activity: ActivityKind) -> bool {
        self.rules.iter().any(|r| r.applies_to(material_id, activity))
    }

    /// 計算此設施對物料的加成
    ///
    /// 多條規則以乘法疊加：`1 - Π(1 - b_i/100)`。沒有規則涵蓋時返回 None。
    pub fn bonus_for(&self, material_id: MaterialId, activity: ActivityKind) -> Option<FacilityBonus> {
        let hundred = Decimal::ONE_HUNDRED;
        let mut material_factor = Decimal::ONE;
        let mut time_factor = Decimal::ONE;
        let mut covered = false;

        for rule in self.rules.iter().filter(|r| r.applies_to(material_id, activity)) {
            covered = true;
            material_factor *= Decimal::ONE - rule.material_bonus_pct / hundred;
            time_factor *= Decimal::ONE - rule.time_bonus_pct / hundred;
        }

        covered.then(|| {
            FacilityBonus::new(
                ((Decimal::ONE - material_factor) * hundred).normalize(),
                ((Decimal::ONE - time_factor) * hundred).normalize(),
            )
            .with_facility(self.id)
        })
    }
}
