//! # 尺寸元数据缓存（MetadataCache）
//!
//! ## 设计思路
//!
//! 同一张图被反复查询尺寸时，避免每次都让 codec 重新解析。
//! 缓存值是固定 5 字段记录 `ImageInfo`，容量有界（默认 200），按最近最少使用淘汰。
//!
//! ## 实现思路
//!
//! - 底层使用 `lru::LruCache`，`get` 与 `put` 都会刷新新近度，淘汰在插入时自动完成。
//! - 进程级实例是协调线程上的线程局部值：首次访问时按当前配置容量创建，从不显式销毁。
//! - 被淘汰的条目在借用结束后才析构，避免键里的占位图提供者析构时重入缓存。

use std::cell::RefCell;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::key::ImageKey;

/// 尺寸与动画元数据。
///
/// `repetition_count`：-1 表示无限循环（或不适用），0 表示只播放一次，N 表示重复 N 次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub total_duration_ms: u64,
    pub repetition_count: i32,
}

impl ImageInfo {
    pub const REPEAT_INFINITE: i32 = -1;

    /// 单帧静态图的记录：帧数 1、时长 0、重复次数取“不适用”哨兵 -1。
    pub fn single_frame(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 1,
            total_duration_ms: 0,
            repetition_count: Self::REPEAT_INFINITE,
        }
    }

    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    /// 是否是可以分发给监听器的合法记录。
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.frame_count >= 1
            && self.repetition_count >= Self::REPEAT_INFINITE
    }

    /// 按 `[width, height, frameCount, totalDurationMs, repetitionCount]` 顺序输出。
    pub fn to_fields(&self) -> [i64; 5] {
        [
            self.width as i64,
            self.height as i64,
            self.frame_count as i64,
            self.total_duration_ms as i64,
            self.repetition_count as i64,
        ]
    }

    /// 从 5 字段数组还原；长度不符或取值越界时返回 `None`。
    pub fn from_fields(fields: &[i64]) -> Option<Self> {
        let [width, height, frame_count, total_duration_ms, repetition_count] = fields else {
            return None;
        };

        let info = Self {
            width: u32::try_from(*width).ok()?,
            height: u32::try_from(*height).ok()?,
            frame_count: u32::try_from(*frame_count).ok()?,
            total_duration_ms: u64::try_from(*total_duration_ms).ok()?,
            repetition_count: i32::try_from(*repetition_count).ok()?,
        };

        info.is_well_formed().then_some(info)
    }
}

/// 有界 LRU 元数据缓存。
pub struct MetadataCache {
    entries: LruCache<ImageKey, ImageInfo>,
}

impl MetadataCache {
    /// 容量为 0 时按 1 处理。
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// 命中时刷新新近度。
    pub fn get(&mut self, key: &ImageKey) -> Option<ImageInfo> {
        self.entries.get(key).copied()
    }

    /// 只读查询，不刷新新近度。
    pub fn contains(&self, key: &ImageKey) -> bool {
        self.entries.contains(key)
    }

    /// 插入或覆盖；超出容量时返回被淘汰的最旧条目。
    pub fn put(&mut self, key: ImageKey, info: ImageInfo) -> Option<(ImageKey, ImageInfo)> {
        match self.entries.push(key, info) {
            Some((old_key, _)) if self.entries.contains(&old_key) => None,
            evicted => evicted,
        }
    }

    pub fn remove(&mut self, key: &ImageKey) -> Option<ImageInfo> {
        self.entries.pop(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn resize(&mut self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        self.entries.resize(capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

thread_local! {
    static METADATA_CACHE: RefCell<MetadataCache> =
        RefCell::new(MetadataCache::new(config::config_snapshot().metadata_cache_capacity));
}

/// 在协调线程的全局元数据缓存上执行 `f`。
///
/// `f` 内部不得再次访问全局缓存。
pub fn with_metadata_cache<R>(f: impl FnOnce(&mut MetadataCache) -> R) -> R {
    METADATA_CACHE.with(|cache| f(&mut cache.borrow_mut()))
}

pub fn cached_info(key: &ImageKey) -> Option<ImageInfo> {
    with_metadata_cache(|cache| cache.get(key))
}

pub fn store_info(key: ImageKey, info: ImageInfo) {
    let evicted = with_metadata_cache(|cache| cache.put(key, info));
    if let Some((evicted_key, _)) = evicted {
        log::debug!("🗂️ 元数据缓存淘汰: {}", evicted_key.locator());
    }
}

pub fn evict_info(key: &ImageKey) -> Option<ImageInfo> {
    with_metadata_cache(|cache| cache.remove(key))
}

pub fn cached_entry_count() -> usize {
    with_metadata_cache(|cache| cache.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32) -> ImageInfo {
        ImageInfo::single_frame(width, width)
    }

    #[test]
    fn overflow_evicts_least_recently_touched() {
        let mut cache = MetadataCache::new(2);
        cache.put(ImageKey::new("a"), info(1));
        cache.put(ImageKey::new("b"), info(2));

        assert_eq!(cache.get(&ImageKey::new("a")), Some(info(1)));

        let evicted = cache.put(ImageKey::new("c"), info(3));
        assert_eq!(evicted.map(|(k, _)| k), Some(ImageKey::new("b")));
        assert!(cache.contains(&ImageKey::new("a")));
        assert!(cache.contains(&ImageKey::new("c")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwrite_is_not_reported_as_eviction() {
        let mut cache = MetadataCache::new(2);
        cache.put(ImageKey::new("a"), info(1));

        assert!(cache.put(ImageKey::new("a"), info(9)).is_none());
        assert_eq!(cache.get(&ImageKey::new("a")), Some(info(9)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let mut cache = MetadataCache::new(0);
        cache.put(ImageKey::new("a"), info(1));
        cache.put(ImageKey::new("b"), info(2));

        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&ImageKey::new("b")));
    }

    #[test]
    fn fields_roundtrip_rejects_malformed_records() {
        let animated = ImageInfo {
            width: 10,
            height: 20,
            frame_count: 3,
            total_duration_ms: 300,
            repetition_count: 0,
        };

        assert_eq!(ImageInfo::from_fields(&animated.to_fields()), Some(animated));
        assert_eq!(ImageInfo::from_fields(&[10, 20, 3, 300]), None);
        assert_eq!(ImageInfo::from_fields(&[0, 20, 1, 0, -1]), None);
        assert_eq!(ImageInfo::from_fields(&[10, 20, 1, 0, -2]), None);
    }

    #[test]
    fn global_cache_starts_with_configured_capacity() {
        let capacity = with_metadata_cache(|cache| cache.capacity());
        assert_eq!(capacity, config::DEFAULT_METADATA_CACHE_CAPACITY);
    }
}
