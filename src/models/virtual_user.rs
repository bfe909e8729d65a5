use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VirtualUserState {
    Starting = 0,
    Running = 1,
    Sleeping = 2,
    Stopping = 3,
    Stopped = 4,
}

impl VirtualUserState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => VirtualUserState::Starting,
            1 => VirtualUserState::Running,
            2 => VirtualUserState::Sleeping,
            3 => VirtualUserState::Stopping,
            _ => VirtualUserState::Stopped,
        }
    }

    // 占用并发名额的状态
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            VirtualUserState::Starting | VirtualUserState::Running | VirtualUserState::Sleeping
        )
    }
}

// 调度器和虚拟用户任务共享的状态
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn new() -> Self {
        SharedState(AtomicU8::new(VirtualUserState::Starting as u8))
    }

    pub fn get(&self) -> VirtualUserState {
        VirtualUserState::from_u8(self.0.load(Ordering::Acquire))
    }

    // Stopping/Stopped 之后不再回到运行态
    pub fn advance(&self, state: VirtualUserState) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let current = VirtualUserState::from_u8(current);
                if current.is_active() || state == VirtualUserState::Stopped {
                    Some(state as u8)
                } else {
                    None
                }
            });
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
