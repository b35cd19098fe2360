//! 設施加成解析

use plan_core::{
    ActivityKind, BonusResolver, Facility, FacilityBonus, FacilityId, MaterialId, PlanError,
    UserId,
};
use std::collections::{BTreeMap, HashMap};

/// 單一使用者的設施登錄表（啟動時建立，之後唯讀）
#[derive(Debug, Clone, Default)]
pub struct FacilityRegistry {
    facilities: BTreeMap<FacilityId, Facility>,
}

impl FacilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：登錄設施
    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facilities.insert(facility.id, facility);
        self
    }

    pub fn get(&self, facility_id: FacilityId) -> Option<&Facility> {
        self.facilities.get(&facility_id)
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }

    /// 所有涵蓋此物料的設施中最佳的加成
    pub fn best_for(&self, material_id: MaterialId, activity: ActivityKind) -> Option<FacilityBonus> {
        self.facilities
            .values()
            .filter_map(|f| f.bonus_for(material_id, activity))
            .fold(None, |best: Option<FacilityBonus>, candidate| match best {
                Some(current) if !candidate.is_better_than(&current) => Some(current),
                _ => Some(candidate),
            })
    }

    /// 指定設施的加成；設施存在但沒有規則涵蓋時返回零加成
    pub fn bonus_at(
        &self,
        facility_id: FacilityId,
        material_id: MaterialId,
        activity: ActivityKind,
    ) -> plan_core::Result<FacilityBonus> {
        let facility = self.get(facility_id).ok_or_else(|| {
            PlanError::BonusUnavailable(format!("設施 {} 不存在", facility_id))
        })?;

        Ok(facility
            .bonus_for(material_id, activity)
            .unwrap_or_else(|| FacilityBonus::zero().with_facility(facility_id)))
    }
}

/// 依使用者設施登錄表解析加成
#[derive(Debug, Clone, Default)]
pub struct FacilityBonusResolver {
    registries: HashMap<UserId, FacilityRegistry>,
}

impl FacilityBonusResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：設置使用者的設施
    pub fn with_registry(mut self, user: UserId, registry: FacilityRegistry) -> Self {
        self.registries.insert(user, registry);
        self
    }

    fn activity(is_conversion: bool) -> ActivityKind {
        if is_conversion {
            ActivityKind::Convert
        } else {
            ActivityKind::Build
        }
    }
}

impl BonusResolver for FacilityBonusResolver {
    fn best_bonus(
        &self,
        material_id: MaterialId,
        is_conversion: bool,
        user: UserId,
    ) -> plan_core::Result<Option<FacilityBonus>> {
        Ok(self
            .registries
            .get(&user)
            .and_then(|r| r.best_for(material_id, Self::activity(is_conversion))))
    }

    fn bonus_at(
        &self,
        facility_id: FacilityId,
        material_id: MaterialId,
        is_conversion: bool,
        user: UserId,
    ) -> plan_core::Result<FacilityBonus> {
        let registry = self.registries.get(&user).ok_or_else(|| {
            PlanError::BonusUnavailable(format!("使用者 {} 沒有設定設施", user))
        })?;
        registry.bonus_at(facility_id, material_id, Self::activity(is_conversion))
    }
}
