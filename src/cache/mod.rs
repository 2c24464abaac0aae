//! # 缓存模块
//!
//! - `registry`：活跃解码会话表，按键去重并发中的解码会话
//! - `metadata`：有界 LRU 尺寸元数据缓存

pub mod metadata;
pub mod registry;

pub use metadata::{ImageInfo, MetadataCache};
pub use registry::LiveSessionRegistry;
