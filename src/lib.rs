//! # 外部图片流：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  宿主 UI（协调线程 / LocalSet）           │
//! │                                                          │
//! │  图片组件 ── ImageStreamListener ── PlaceholderProvider  │
//! │       │                                                  │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ add_listener / remove_listener (ListenerToken)
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕                                                  │
//! │  provider ──── ExternalImageProvider (resolve 复用会话)   │
//! │  │                                                       │
//! │  ├─ key ─────── ImageKey (相等性决定会话 / 缓存复用)       │
//! │  ├─ session ─── DecodeSession (解码·动画节奏·拆除重建)     │
//! │  │   ├─ decode       codec 初始化 / 尺寸单元 / 像素单元    │
//! │  │   ├─ animation    帧时钟节奏 + 重复次数                 │
//! │  │   └─ placeholder  占位图首帧                           │
//! │  ├─ cache                                                │
//! │  │   ├─ registry     活跃会话表（去重）                    │
//! │  │   └─ metadata     尺寸元数据 LRU（默认 200）            │
//! │  ├─ codec ───── Codec / CodecProvider + 内置 image codec  │
//! │  ├─ frame_clock  帧回调调度（手动泵送 / tokio 自驱动）     │
//! │  └─ diagnostics  非致命错误上报                           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | `CodecError` 与会话错误分类 `ImageStreamError` |
//! | [`config`] | 进程级配置（元数据缓存容量、解码限制、缩放档位） |
//! | [`key`] | 请求键 `ImageKey` 与解析配置 `ImageConfiguration` |
//! | [`listener`] | 监听器、图片流与占位图契约 |
//! | [`cache`] | 活跃会话表与尺寸元数据缓存 |
//! | [`codec`] | 编解码器契约与基于 `image` 的内置实现 |
//! | [`frame_clock`] | 帧时钟接口与两种实现 |
//! | [`diagnostics`] | 诊断接收器与错误上报 |
//! | [`session`] | 解码会话状态机 |
//! | [`provider`] | 使用方入口 |
//!
//! 所有会话、缓存与诊断状态都只在一个协调线程上访问（`Rc` / `RefCell` / 线程局部值），
//! 异步工作通过 `tokio::task::spawn_local` 运行，调用方需要提供 `LocalSet`。

pub mod error;
pub mod config;
pub mod key;
pub mod listener;
pub mod cache;
pub mod codec;
pub mod frame_clock;
pub mod diagnostics;
pub mod session;
pub mod provider;
