//! 髒標記追蹤

use std::collections::BTreeSet;
use uuid::Uuid;

/// 追蹤數量或運行次數實際改變的步驟
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    dirty_steps: BTreeSet<Uuid>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 標記步驟為髒
    pub fn mark_dirty(&mut self, step_id: Uuid) {
        self.dirty_steps.insert(step_id);
    }

    pub fn is_dirty(&self, step_id: &Uuid) -> bool {
        self.dirty_steps.contains(step_id)
    }

    pub fn len(&self) -> usize {
        self.dirty_steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_steps.is_empty()
    }

    /// 清除所有髒標記
    pub fn clear(&mut self) {
        self.dirty_steps.clear();
    }

    /// 取出所有髒步驟並清空
    pub fn take(&mut self) -> BTreeSet<Uuid> {
        std::mem::take(&mut self.dirty_steps)
    }
}
