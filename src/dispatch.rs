// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch.rs - 检测结果分发
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;

/// 数据库与通知中使用的时间格式
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 将一帧的检测结果交付出去
pub trait Deliver<Frame, Output> {
  type Report;
  type Error;

  fn deliver(&self, frame: &Frame, result: &Output) -> Result<Self::Report, Self::Error>;
}

impl<Frame, Output, T: Deliver<Frame, Output> + ?Sized> Deliver<Frame, Output> for &T {
  type Report = T::Report;
  type Error = T::Error;

  fn deliver(&self, frame: &Frame, result: &Output) -> Result<Self::Report, Self::Error> {
    (**self).deliver(frame, result)
  }
}

/// 摄像头身份，写入每条违停记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
  pub id: i64,
  pub location: String,
}

/// 单个分发目标的失败，只影响该目标自身
#[derive(Error, Debug)]
pub enum SinkError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像编码失败: {0}")]
  Encode(String),
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("HTTP 状态码 {0}")]
  HttpStatus(u16),
  #[error("请求超时")]
  Timeout,
  #[error("网络传输错误: {0}")]
  Transport(String),
  #[error("服务端拒绝: {0}")]
  Rejected(String),
  #[cfg(feature = "database")]
  #[error("数据库错误: {0}")]
  Database(#[from] rusqlite::Error),
  #[error("锁已失效")]
  Poisoned,
}

#[cfg(any(feature = "image_upload", feature = "notify"))]
impl From<ureq::Error> for SinkError {
  fn from(err: ureq::Error) -> Self {
    match err {
      ureq::Error::Status(status, _) => SinkError::HttpStatus(status),
      ureq::Error::Transport(transport) => {
        if is_timeout(&transport) {
          SinkError::Timeout
        } else {
          SinkError::Transport(transport.to_string())
        }
      }
    }
  }
}

#[cfg(any(feature = "image_upload", feature = "notify"))]
fn is_timeout(transport: &ureq::Transport) -> bool {
  use std::error::Error as _;

  let io_timeout = transport
    .source()
    .and_then(|source| source.downcast_ref::<std::io::Error>())
    .is_some_and(|e| {
      matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
      )
    });
  io_timeout || transport.to_string().contains("timed out")
}

pub mod draw;
pub mod record;

mod chain;
mod local_backup;

#[cfg(feature = "image_upload")]
mod image_store;
#[cfg(feature = "notify")]
mod notifier;
#[cfg(feature = "database")]
mod record_store;

#[cfg(all(test, any(feature = "image_upload", feature = "notify")))]
mod http_stub;

pub use self::chain::{DispatchChain, DispatchChainBuilder, ProbeReport, violation_filename};
pub use self::local_backup::{BackupMeta, LocalBackup};
pub use self::record::{
  DispatchOutcome, DispatchRecord, ImageStore, Notifier, NotifyOutcome, RecordStore, StageStatus,
  ViolationNotice, ViolationRow,
};

#[cfg(feature = "image_upload")]
pub use self::image_store::HttpImageStore;
#[cfg(feature = "notify")]
pub use self::notifier::HttpNotifier;
#[cfg(feature = "database")]
pub use self::record_store::{SqliteRecordStore, StoredViolation};
