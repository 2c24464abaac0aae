//! # 活跃会话表（LiveSessionRegistry）
//!
//! ## 设计思路
//!
//! 同一个逻辑图片被多个 UI 元素同时使用时，只允许存在一个解码会话。
//! 会话是否在表中只取决于它有没有监听器，与宿主自身的图片缓存无关
//! （宿主缓存可能被配置成 0 容量）。
//!
//! ## 实现思路
//!
//! - 所有访问都发生在协调线程上，表本身不加锁；全局实例是线程局部值。
//! - `register` 不会覆盖同键下另一个活跃会话，调用方应先 `lookup`。
//! - `unregister` 只移除“就是这个会话”的条目，旧代际的迟到卸载不会误删新会话。
//! - 被移除的会话在借用结束后才析构。
//! - 已创建但尚未挂载的会话以 `Weak` 记为“待挂载”：挂载前再次解析同键时复用它，
//!   不会为同一个键并行创建两个 codec。待挂载条目不延长会话寿命，首次挂载时转正。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::key::ImageKey;
use crate::session::DecodeSession;

#[derive(Default)]
pub struct LiveSessionRegistry {
    sessions: HashMap<ImageKey, Rc<DecodeSession>>,
    pending: HashMap<ImageKey, Weak<DecodeSession>>,
}

impl LiveSessionRegistry {
    pub fn lookup(&self, key: &ImageKey) -> Option<Rc<DecodeSession>> {
        self.sessions.get(key).cloned()
    }

    /// 活跃会话优先，其次是仍存活的待挂载会话。
    pub fn lookup_or_pending(&self, key: &ImageKey) -> Option<Rc<DecodeSession>> {
        self.lookup(key)
            .or_else(|| self.pending.get(key).and_then(Weak::upgrade))
    }

    /// 记录一个尚未挂载的新会话，同时清理已经析构的待挂载条目。
    pub fn track_pending(&mut self, key: ImageKey, session: &Rc<DecodeSession>) {
        self.pending.retain(|_, weak| weak.strong_count() > 0);
        self.pending.insert(key, Rc::downgrade(session));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().filter(|weak| weak.strong_count() > 0).count()
    }

    /// 登记会话。同键下已有其他会话时保持原状并返回 `false`。
    ///
    /// 登记成功时移除该键的待挂载条目（若指向本会话或已失效）。
    pub fn register(&mut self, key: ImageKey, session: Rc<DecodeSession>) -> bool {
        let stale_pending = self
            .pending
            .get(&key)
            .map(|weak| weak.strong_count() == 0 || Weak::ptr_eq(weak, &Rc::downgrade(&session)))
            .unwrap_or(false);

        match self.sessions.get(&key) {
            Some(existing) if Rc::ptr_eq(existing, &session) => true,
            Some(_) => {
                log::warn!("⚠️ 同键已存在活跃会话，拒绝覆盖: {}", key.locator());
                false
            }
            None => {
                if stale_pending {
                    self.pending.remove(&key);
                }
                self.sessions.insert(key, session);
                true
            }
        }
    }

    /// 仅当表中登记的正是 `session` 时移除并返回它。
    pub fn unregister(&mut self, key: &ImageKey, session: &Rc<DecodeSession>) -> Option<Rc<DecodeSession>> {
        match self.sessions.get(key) {
            Some(existing) if Rc::ptr_eq(existing, session) => self.sessions.remove(key),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

thread_local! {
    static LIVE_SESSIONS: RefCell<LiveSessionRegistry> = RefCell::new(LiveSessionRegistry::default());
}

fn with_registry<R>(f: impl FnOnce(&mut LiveSessionRegistry) -> R) -> R {
    LIVE_SESSIONS.with(|registry| f(&mut registry.borrow_mut()))
}

pub fn lookup(key: &ImageKey) -> Option<Rc<DecodeSession>> {
    with_registry(|registry| registry.lookup(key))
}

pub(crate) fn lookup_or_pending(key: &ImageKey) -> Option<Rc<DecodeSession>> {
    with_registry(|registry| registry.lookup_or_pending(key))
}

pub(crate) fn track_pending(key: ImageKey, session: &Rc<DecodeSession>) {
    with_registry(|registry| registry.track_pending(key, session))
}

/// 已创建、尚未挂载且仍存活的会话数。
pub fn pending_session_count() -> usize {
    with_registry(|registry| registry.pending_len())
}

pub fn register(key: ImageKey, session: Rc<DecodeSession>) -> bool {
    with_registry(|registry| registry.register(key, session))
}

pub fn unregister(key: &ImageKey, session: &Rc<DecodeSession>) -> bool {
    let removed = with_registry(|registry| registry.unregister(key, session));
    removed.is_some()
}

pub fn live_session_count() -> usize {
    with_registry(|registry| registry.len())
}
