//! 虚拟用户与身份分配

use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::TaskTracker;

/// 用户 ID 分配器
///
/// 由调度器持有并显式传递；自增与读取是同一个原子操作，ID 从 1 开始且永不复用。
#[derive(Debug, Default)]
pub struct UserIdAllocator {
    last: AtomicU64,
}

impl UserIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 已分配的 ID 数量
    pub fn allocated(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// 虚拟用户
///
/// 会话状态只有异步图片任务的跟踪器；只在所属用户的执行流中被访问。
#[derive(Debug)]
pub struct VirtualUser {
    id: u64,
    task: TaskTracker,
}

impl VirtualUser {
    pub fn new(ids: &UserIdAllocator) -> Self {
        Self {
            id: ids.allocate(),
            task: TaskTracker::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task(&self) -> &TaskTracker {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut TaskTracker {
        &mut self.task
    }

    /// 当前挂起的图片任务 ID
    pub fn pending_task_id(&self) -> Option<&str> {
        self.task.pending_task_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let ids = UserIdAllocator::new();
        let a = VirtualUser::new(&ids);
        let b = VirtualUser::new(&ids);
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert!(a.pending_task_id().is_none());
    }

    #[test]
    fn test_ids_not_reused_after_drop() {
        let ids = UserIdAllocator::new();
        drop(VirtualUser::new(&ids));
        let user = VirtualUser::new(&ids);
        assert_eq!(user.id(), 2);
        assert_eq!(ids.allocated(), 2);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(UserIdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..1000).map(|_| ids.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "重复的用户 ID: {}", id);
            }
        }
        assert_eq!(seen.len(), 8000);
        assert_eq!(ids.allocated(), 8000);
    }
}
