//! # 诊断通道
//!
//! ## 设计思路
//!
//! 图片子系统里的所有错误都只做“非致命上报”：描述上下文、错误本身、可选堆栈、
//! 附加信息与严重程度，交给宿主的诊断接收器，不中断宿主。
//!
//! ## 实现思路
//!
//! - `DiagnosticsSink` 是唯一的接入点；默认实现 `LogDiagnostics` 走 `log` 门面。
//! - 接收器安装在协调线程上（线程局部），宿主或测试可以替换。
//! - 调用接收器前先克隆出 `Rc`，接收器内部可以安全地再次上报或替换自己。

use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ImageStreamError;

/// 一次错误上报。
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// 发生错误时正在做什么，例如“解析图片 codec”。
    pub context: String,
    pub error: ImageStreamError,
    /// 仅在环境开启 backtrace 时采集。
    pub stack_trace: Option<String>,
    pub extra_info: Vec<(String, String)>,
    /// `true` 表示静默级别：记录但不打扰用户。
    pub silent: bool,
}

impl ErrorReport {
    pub fn new(context: impl Into<String>, error: ImageStreamError) -> Self {
        let backtrace = Backtrace::capture();
        let stack_trace = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };

        Self {
            context: context.into(),
            error,
            stack_trace,
            extra_info: Vec::new(),
            silent: false,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_info(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_info.push((name.into(), value.into()));
        self
    }
}

pub trait DiagnosticsSink {
    fn report(&self, report: &ErrorReport);
}

/// 通过 `log` 输出的默认接收器。
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl DiagnosticsSink for LogDiagnostics {
    fn report(&self, report: &ErrorReport) {
        let info = report
            .extra_info
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");

        if report.silent {
            log::warn!(
                "⚠️ {} - [{}] {} {}",
                report.context,
                report.error.code(),
                report.error,
                info
            );
        } else {
            log::error!(
                "❌ {} - [{}] {} {}",
                report.context,
                report.error.code(),
                report.error,
                info
            );
        }

        if let Some(stack) = &report.stack_trace {
            log::debug!("堆栈:\n{}", stack);
        }
    }
}

thread_local! {
    static DIAGNOSTICS_SINK: RefCell<Rc<dyn DiagnosticsSink>> = RefCell::new(Rc::new(LogDiagnostics));
}

/// 替换当前协调线程的诊断接收器，返回旧接收器。
pub fn set_diagnostics_sink(sink: Rc<dyn DiagnosticsSink>) -> Rc<dyn DiagnosticsSink> {
    DIAGNOSTICS_SINK.with(|slot| slot.replace(sink))
}

pub fn report_error(report: ErrorReport) {
    let sink = DIAGNOSTICS_SINK.with(|slot| Rc::clone(&slot.borrow()));
    sink.report(&report);
}
