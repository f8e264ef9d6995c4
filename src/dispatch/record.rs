// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/record.rs - 分发记录与分发目标接口
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

use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::{dispatch::SinkError, model::BoundingBox};

/// 远程图像存储，成功时返回服务端分配的文件名
pub trait ImageStore: Send + Sync {
  fn upload(&self, filename: &str, jpeg: &[u8]) -> Result<String, SinkError>;

  fn probe(&self) -> Result<(), SinkError> {
    Ok(())
  }
}

/// 违停记录表，成功时返回新记录的 id
pub trait RecordStore: Send + Sync {
  fn insert(&self, row: &ViolationRow<'_>) -> Result<i64, SinkError>;

  fn probe(&self) -> Result<(), SinkError> {
    Ok(())
  }
}

/// 下游通知，返回值仅用于日志
pub trait Notifier: Send + Sync {
  fn notify(&self, notice: &ViolationNotice<'_>) -> Result<u16, SinkError>;

  fn probe(&self) -> Result<(), SinkError> {
    Ok(())
  }
}

/// 写入记录表的一行，`image_path` 为空表示图像不可用
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationRow<'a> {
  pub camera_id: i64,
  pub image_path: Option<&'a str>,
  pub confidence: f32,
  pub location: &'a str,
  pub upload_time: NaiveDateTime,
}

/// 通知消息体
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationNotice<'a> {
  pub id: Option<i64>,
  pub camera_id: i64,
  pub location: &'a str,
  pub confidence: f32,
  pub image_path: Option<&'a str>,
  pub upload_time: String,
}

/// 单个分发步骤的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
  Disabled,
  Succeeded,
  Failed(String),
}

impl StageStatus {
  pub(crate) fn of<T>(result: &Option<Result<T, SinkError>>) -> Self {
    match result {
      None => StageStatus::Disabled,
      Some(Ok(_)) => StageStatus::Succeeded,
      Some(Err(e)) => StageStatus::Failed(e.to_string()),
    }
  }

  pub fn is_succeeded(&self) -> bool {
    matches!(self, StageStatus::Succeeded)
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, StageStatus::Failed(_))
  }
}

/// 通知结果，不参与整体分发结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
  Sent { status: u16 },
  NotSent,
  NonCriticalFailure(String),
}

/// 一次分发对调用方的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
  /// 所有启用的步骤都成功
  FullyDelivered,
  /// 已交付，但部分步骤失败
  Degraded,
  /// 只有本地备份成功，远程步骤全部失败
  BackupOnly,
  /// 本地备份与数据库都没有成功
  Undelivered,
}

/// 每个检测对应一条记录，随各步骤完成逐项填写
#[derive(Debug, Clone)]
pub struct DispatchRecord {
  pub camera_id: i64,
  pub location: String,
  pub detected_at: NaiveDateTime,
  pub confidence: f32,
  pub bbox: BoundingBox,
  pub filename: String,
  pub backup_path: Option<PathBuf>,
  pub image_ref: Option<String>,
  pub record_id: Option<i64>,
  pub backup: StageStatus,
  pub upload: StageStatus,
  pub database: StageStatus,
  pub notification: NotifyOutcome,
}

impl DispatchRecord {
  /// 本地备份写入或数据库拿到 id 即视为已交付
  pub fn is_delivered(&self) -> bool {
    self.backup.is_succeeded() || self.database.is_succeeded()
  }

  pub fn outcome(&self) -> DispatchOutcome {
    if !self.is_delivered() {
      return DispatchOutcome::Undelivered;
    }

    let stages = [&self.backup, &self.upload, &self.database];
    if !stages.iter().any(|stage| stage.is_failed()) {
      return DispatchOutcome::FullyDelivered;
    }

    let remote = [&self.upload, &self.database];
    if self.backup.is_succeeded() && !remote.iter().any(|stage| stage.is_succeeded()) {
      DispatchOutcome::BackupOnly
    } else {
      DispatchOutcome::Degraded
    }
  }
}
