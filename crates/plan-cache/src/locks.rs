//! 計劃與使用者層級的鎖
//!
//! 同一計劃的重算互斥；同一使用者的作業匹配互斥（匹配會讀取使用者所有計劃的認領狀態）。

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use plan_core::UserId;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// 持有中的鎖，離開作用域即釋放
pub type LockGuard = ArcMutexGuard<RawMutex, ()>;

/// 依鍵建立的鎖表
#[derive(Debug)]
struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, key: K) -> LockGuard {
        // 鎖表只在取出鎖時持有
        let lock = self.locks.lock().entry(key).or_default().clone();
        lock.lock_arc()
    }

    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// 計劃鎖與使用者鎖
#[derive(Debug)]
pub struct PlanLocks {
    plans: KeyedLocks<Uuid>,
    users: KeyedLocks<UserId>,
}

impl PlanLocks {
    pub fn new() -> Self {
        Self {
            plans: KeyedLocks::new(),
            users: KeyedLocks::new(),
        }
    }

    /// 計劃鎖（重算用）
    pub fn plan(&self, plan_id: Uuid) -> LockGuard {
        self.plans.acquire(plan_id)
    }

    /// 使用者鎖（作業匹配與利潤計算用）
    pub fn user(&self, user: UserId) -> LockGuard {
        self.users.acquire(user)
    }

    /// 已建立的鎖數量（計劃, 使用者）
    pub fn counts(&self) -> (usize, usize) {
        (self.plans.len(), self.users.len())
    }
}

impl Default for PlanLocks {
    fn default() -> Self {
        Self::new()
    }
}
