// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/chain.rs - 分发链
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

use std::{
  convert::Infallible,
  fmt::Debug,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
  },
};

use chrono::NaiveDateTime;
use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  config::Config,
  dispatch::{
    CameraInfo, Deliver, DispatchOutcome, DispatchRecord, ImageStore, Notifier, NotifyOutcome,
    RecordStore, SinkError, StageStatus, TIME_FORMAT, ViolationNotice, ViolationRow,
    draw::{annotate, encode_jpeg},
    local_backup::{BackupMeta, LocalBackup},
  },
  frame::SourceFrame,
  model::Detection,
};

const CLASS_NAME: &str = "illegal_parking";

/// 备份文件名：`violation_cam{id}_{时间}_{序号}.jpg`
pub fn violation_filename(camera_id: i64, detected_at: NaiveDateTime, sequence: u32) -> String {
  format!(
    "violation_cam{}_{}_{:03}.jpg",
    camera_id,
    detected_at.format("%Y%m%d_%H%M%S"),
    sequence
  )
}

/// 启动时各远程目标的可用性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
  pub image_store: StageStatus,
  pub database: StageStatus,
  pub notifier: StageStatus,
}

impl ProbeReport {
  /// 数据库和通知后端都启用且都不可用
  pub fn backend_unreachable(&self) -> bool {
    self.database.is_failed() && self.notifier.is_failed()
  }
}

pub struct DispatchChainBuilder {
  camera: CameraInfo,
  backup: Option<LocalBackup>,
  image_store: Option<Box<dyn ImageStore>>,
  record_store: Option<Box<dyn RecordStore>>,
  notifier: Option<Box<dyn Notifier>>,
}

impl DispatchChainBuilder {
  pub fn backup(mut self, backup: LocalBackup) -> Self {
    self.backup = Some(backup);
    self
  }

  pub fn image_store(mut self, store: impl ImageStore + 'static) -> Self {
    self.image_store = Some(Box::new(store));
    self
  }

  pub fn record_store(mut self, store: impl RecordStore + 'static) -> Self {
    self.record_store = Some(Box::new(store));
    self
  }

  pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
    self.notifier = Some(Box::new(notifier));
    self
  }

  pub fn build(self) -> DispatchChain {
    info!(
      "分发链: 摄像头 {} ({}), 本地备份 {}, 图像上传 {}, 数据库 {}, 通知 {}",
      self.camera.id,
      self.camera.location,
      enabled(self.backup.is_some()),
      enabled(self.image_store.is_some()),
      enabled(self.record_store.is_some()),
      enabled(self.notifier.is_some()),
    );
    DispatchChain {
      camera: self.camera,
      backup: self.backup,
      image_store: self.image_store,
      record_store: self.record_store,
      notifier: self.notifier,
      sequence: AtomicU32::new(1),
      shutdown: None,
    }
  }
}

fn enabled(flag: bool) -> &'static str {
  if flag { "启用" } else { "禁用" }
}

/// 按固定顺序执行本地备份、图像上传、数据库写入、通知
///
/// 任何一步失败都只记录在该步骤上，后续步骤照常执行。
pub struct DispatchChain {
  camera: CameraInfo,
  backup: Option<LocalBackup>,
  image_store: Option<Box<dyn ImageStore>>,
  record_store: Option<Box<dyn RecordStore>>,
  notifier: Option<Box<dyn Notifier>>,
  sequence: AtomicU32,
  shutdown: Option<Arc<AtomicBool>>,
}

impl DispatchChain {
  pub fn builder(camera: CameraInfo) -> DispatchChainBuilder {
    DispatchChainBuilder {
      camera,
      backup: None,
      image_store: None,
      record_store: None,
      notifier: None,
    }
  }

  /// 按配置构造，未启用或未编译进来的目标不会出现在链中
  pub fn from_config(config: &Config) -> Self {
    let mut builder = Self::builder(config.camera_info());

    if config.backup.enabled {
      builder = builder.backup(LocalBackup::new(&config.backup.directory));
    }

    if config.upload.enabled {
      #[cfg(feature = "image_upload")]
      {
        builder = builder.image_store(crate::dispatch::HttpImageStore::new(
          config.upload.url.clone(),
          std::time::Duration::from_secs(config.upload.timeout_secs),
        ));
      }
      #[cfg(not(feature = "image_upload"))]
      warn!("配置启用了图像上传，但未编译 image_upload 功能，已跳过");
    }

    if config.database.enabled {
      #[cfg(feature = "database")]
      {
        builder = builder.record_store(crate::dispatch::SqliteRecordStore::open(
          config.database.url.path(),
          std::time::Duration::from_secs(config.database.busy_timeout_secs),
        ));
      }
      #[cfg(not(feature = "database"))]
      warn!("配置启用了数据库，但未编译 database 功能，已跳过");
    }

    if config.notify.enabled {
      #[cfg(feature = "notify")]
      {
        builder = builder.notifier(
          crate::dispatch::HttpNotifier::new(
            config.notify.url.clone(),
            std::time::Duration::from_secs(config.notify.timeout_secs),
          )
          .with_health_url(config.notify.health_url.clone()),
        );
      }
      #[cfg(not(feature = "notify"))]
      warn!("配置启用了通知，但未编译 notify 功能，已跳过");
    }

    builder.build()
  }

  /// 标志置位后不再开始新的检测分发，在途的那一个照常完成
  pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
    self.shutdown = Some(shutdown);
    self
  }

  fn should_stop(&self) -> bool {
    self
      .shutdown
      .as_ref()
      .is_some_and(|flag| flag.load(Ordering::Acquire))
  }

  pub fn camera(&self) -> &CameraInfo {
    &self.camera
  }

  fn next_sequence(&self) -> u32 {
    self.sequence.fetch_add(1, Ordering::Relaxed)
  }

  /// 检查远程目标是否可达，只记录日志，不改变分发行为
  pub fn probe(&self) -> ProbeReport {
    let report = ProbeReport {
      image_store: probe_status(self.image_store.as_ref().map(|store| store.probe())),
      database: probe_status(self.record_store.as_ref().map(|store| store.probe())),
      notifier: probe_status(self.notifier.as_ref().map(|notifier| notifier.probe())),
    };
    for (name, status) in [
      ("图像服务", &report.image_store),
      ("数据库", &report.database),
      ("通知后端", &report.notifier),
    ] {
      match status {
        StageStatus::Disabled => debug!("{}未启用，跳过检查", name),
        StageStatus::Succeeded => info!("{}连接正常", name),
        StageStatus::Failed(e) => warn!("{}不可用: {}", name, e),
      }
    }
    report
  }

  /// 分发一帧内的全部检测，逐个顺序执行
  pub fn dispatch_frame(&self, frame: &SourceFrame, detections: &[Detection]) -> Vec<DispatchRecord> {
    if detections.is_empty() {
      info!("第 {} 帧未检测到违停目标", frame.index());
      return Vec::new();
    }

    info!(
      "第 {} 帧检测到 {} 个违停目标",
      frame.index(),
      detections.len()
    );
    let detected_at = frame.captured_at().naive_local();
    let mut records = Vec::with_capacity(detections.len());
    for detection in detections {
      if self.should_stop() {
        warn!(
          "收到中断信号，第 {} 帧剩余 {} 个检测不再分发",
          frame.index(),
          detections.len() - records.len()
        );
        break;
      }
      records.push(self.dispatch(detection, frame.image(), detected_at, self.next_sequence()));
    }

    let delivered = records.iter().filter(|r| r.is_delivered()).count();
    info!(
      "第 {} 帧分发完成: {}/{} 已交付",
      frame.index(),
      delivered,
      records.len()
    );
    records
  }

  /// 分发单个检测
  pub fn dispatch(
    &self,
    detection: &Detection,
    image: &RgbImage,
    detected_at: NaiveDateTime,
    sequence: u32,
  ) -> DispatchRecord {
    let camera_id = self.camera.id;
    let filename = violation_filename(camera_id, detected_at, sequence);
    let detection_time = detected_at.format(TIME_FORMAT).to_string();

    let jpeg = encode_jpeg(&annotate(image, detection)).map_err(|e| {
      error!("[摄像头 {}] {} 图像编码失败: {}", camera_id, filename, e);
      e.to_string()
    });
    let jpeg_bytes = || jpeg.as_deref().map_err(|e| SinkError::Encode(e.clone()));

    // 1. 本地备份
    let backup = self.backup.as_ref().map(|backup| {
      let meta = BackupMeta {
        camera_id,
        location: &self.camera.location,
        detection_time: detection_time.clone(),
        confidence: detection.confidence,
        bbox: detection.bbox.to_array(),
        class_id: detection.class_id,
        class_name: CLASS_NAME,
        image_filename: &filename,
      };
      backup.store(&filename, jpeg_bytes()?, &meta)
    });
    self.log_stage("本地备份", &filename, &backup);

    // 2. 图像上传，失败时图像引用保持为空
    let upload = self
      .image_store
      .as_ref()
      .map(|store| store.upload(&filename, jpeg_bytes()?));
    self.log_stage("图像上传", &filename, &upload);
    let image_ref = upload.as_ref().and_then(|r| r.as_ref().ok()).cloned();

    // 3. 数据库记录
    let insert = self.record_store.as_ref().map(|store| {
      store.insert(&ViolationRow {
        camera_id,
        image_path: image_ref.as_deref(),
        confidence: detection.confidence,
        location: &self.camera.location,
        upload_time: detected_at,
      })
    });
    self.log_stage("数据库写入", &filename, &insert);
    let record_id = insert.as_ref().and_then(|r| r.as_ref().ok()).copied();

    // 4. 通知，失败不影响分发结论
    let notification = match &self.notifier {
      None => NotifyOutcome::NotSent,
      Some(notifier) => {
        let notice = ViolationNotice {
          id: record_id,
          camera_id,
          location: &self.camera.location,
          confidence: detection.confidence,
          image_path: image_ref.as_deref(),
          upload_time: detection_time.clone(),
        };
        match notifier.notify(&notice) {
          Ok(status) => {
            info!("[摄像头 {}] 通知已发送, 状态码 {}", camera_id, status);
            NotifyOutcome::Sent { status }
          }
          Err(e) => {
            warn!(
              "[摄像头 {}] {} 通知失败（非关键）: {}",
              camera_id, filename, e
            );
            NotifyOutcome::NonCriticalFailure(e.to_string())
          }
        }
      }
    };

    let record = DispatchRecord {
      camera_id,
      location: self.camera.location.clone(),
      detected_at,
      confidence: detection.confidence,
      bbox: detection.bbox,
      backup_path: backup.as_ref().and_then(|r| r.as_ref().ok()).cloned(),
      image_ref,
      record_id,
      backup: StageStatus::of(&backup),
      upload: StageStatus::of(&upload),
      database: StageStatus::of(&insert),
      notification,
      filename,
    };

    match record.outcome() {
      DispatchOutcome::FullyDelivered => info!("[摄像头 {}] {} 已完整交付", camera_id, record.filename),
      DispatchOutcome::Degraded => warn!("[摄像头 {}] {} 部分交付", camera_id, record.filename),
      DispatchOutcome::BackupOnly => warn!("[摄像头 {}] {} 仅本地备份", camera_id, record.filename),
      DispatchOutcome::Undelivered => error!("[摄像头 {}] {} 未能交付", camera_id, record.filename),
    }
    record
  }

  fn log_stage<T: Debug>(&self, stage: &str, filename: &str, result: &Option<Result<T, SinkError>>) {
    match result {
      None => debug!("{}未启用", stage),
      Some(Ok(value)) => debug!("[摄像头 {}] {}成功: {} -> {:?}", self.camera.id, stage, filename, value),
      Some(Err(e)) => error!("[摄像头 {}] {}失败: {}: {}", self.camera.id, stage, filename, e),
    }
  }
}

fn probe_status(result: Option<Result<(), SinkError>>) -> StageStatus {
  StageStatus::of(&result)
}

impl Deliver<SourceFrame, Vec<Detection>> for DispatchChain {
  type Report = Vec<DispatchRecord>;
  type Error = Infallible;

  fn deliver(&self, frame: &SourceFrame, result: &Vec<Detection>) -> Result<Self::Report, Self::Error> {
    Ok(self.dispatch_frame(frame, result))
  }
}
