// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/violation_flow.rs - 检测到分发的完整流程
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

#![cfg(all(feature = "image_upload", feature = "database"))]

use std::{
  net::TcpListener,
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use url::Url;

use shanan_violation::{
  dispatch::{
    CameraInfo, Deliver, DispatchChain, DispatchOutcome, HttpImageStore, LocalBackup,
    SinkError, SqliteRecordStore, StageStatus,
  },
  frame::SourceFrame,
  model::{
    HeadKind, Model, RawOutputTensor, ReplayBackend, ScaleLevel, ViolationDetectorBuilder,
  },
};

const REG_CHANNELS: usize = 64;

/// 640x640 模型输出，中尺度 (20, 20) 网格给出一个高分目标
fn replay_backend() -> ReplayBackend {
  let mut tensors = Vec::new();
  for level in ScaleLevel::ALL {
    let grid = (640 / level.stride()) as usize;
    let mut logits = vec![-10.0f32; grid * grid];
    if level == ScaleLevel::Medium {
      logits[20 * grid + 20] = 4.0;
    }
    tensors.push(RawOutputTensor::new(
      level,
      HeadKind::Classification,
      (grid, grid),
      1,
      logits,
    ));
    tensors.push(RawOutputTensor::new(
      level,
      HeadKind::Regression,
      (grid, grid),
      REG_CHANNELS,
      vec![0.0f32; grid * grid * REG_CHANNELS],
    ));
  }
  ReplayBackend::from_tensors((640, 640), tensors)
}

/// 接受连接后一直不回复，直到返回的发送端被丢弃
fn stalled_upload_url() -> (Url, mpsc::Sender<()>) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();
  let (guard, release) = mpsc::channel::<()>();
  thread::spawn(move || {
    let _connection = listener.accept();
    let _ = release.recv_timeout(Duration::from_secs(30));
  });
  let url = Url::parse(&format!("http://{addr}/upload_image")).unwrap();
  (url, guard)
}

#[test]
fn upload_timeout_leaves_image_reference_unset() {
  let dir = tempfile::tempdir().unwrap();
  let backup_dir = dir.path().join("backup");
  let db_path = dir.path().join("violation.db");
  let (upload_url, _stall) = stalled_upload_url();

  let detector = ViolationDetectorBuilder::new(replay_backend())
    .confidence(0.5)
    .build()
    .unwrap();
  let chain = DispatchChain::builder(CameraInfo {
    id: 7,
    location: "东门停车区".to_string(),
  })
  .backup(LocalBackup::new(&backup_dir))
  .image_store(HttpImageStore::new(upload_url, Duration::from_millis(300)))
  .record_store(SqliteRecordStore::open(&db_path, Duration::from_secs(5)))
  .build();

  let frame = SourceFrame::new(RgbImage::new(1280, 960), 0);
  let detections = detector.infer(&frame).unwrap();
  assert_eq!(detections.len(), 1);
  assert_eq!(detections[0].bbox.to_array(), [416, 312, 896, 672]);

  let started = Instant::now();
  let records = chain.deliver(&frame, &detections).unwrap();
  assert!(started.elapsed() < Duration::from_secs(10));
  assert_eq!(records.len(), 1);
  let record = &records[0];

  let backup_path = record.backup_path.as_ref().unwrap();
  assert!(backup_path.exists());
  assert!(backup_path.with_extension("json").exists());
  assert!(record.filename.starts_with("violation_cam7_"));
  assert!(record.filename.ends_with("_001.jpg"));

  assert_eq!(record.upload, StageStatus::Failed(SinkError::Timeout.to_string()));
  assert_eq!(record.image_ref, None);
  assert_eq!(record.database, StageStatus::Succeeded);
  assert_eq!(record.outcome(), DispatchOutcome::Degraded);

  let id = record.record_id.unwrap();
  let stored = SqliteRecordStore::open(&db_path, Duration::from_secs(5))
    .find(id)
    .unwrap()
    .unwrap();
  assert_eq!(stored.camera_id, 7);
  assert_eq!(stored.location, "东门停车区");
  assert_eq!(stored.image_path, None);
}

#[test]
fn empty_frame_has_no_side_effects() {
  let dir = tempfile::tempdir().unwrap();
  let backup_dir = dir.path().join("backup");

  let detector = ViolationDetectorBuilder::new(ReplayBackend::from_tensors(
    (640, 640),
    replay_backend_without_hits(),
  ))
  .build()
  .unwrap();
  let chain = DispatchChain::builder(CameraInfo {
    id: 1,
    location: "西门".to_string(),
  })
  .backup(LocalBackup::new(&backup_dir))
  .build();

  let frame = SourceFrame::new(RgbImage::new(640, 480), 0);
  let detections = detector.infer(&frame).unwrap();
  assert!(detections.is_empty());
  assert!(chain.deliver(&frame, &detections).unwrap().is_empty());
  assert!(!backup_dir.exists());
}

fn replay_backend_without_hits() -> Vec<RawOutputTensor> {
  ScaleLevel::ALL
    .into_iter()
    .flat_map(|level| {
      let grid = (640 / level.stride()) as usize;
      [
        RawOutputTensor::new(
          level,
          HeadKind::Classification,
          (grid, grid),
          1,
          vec![-10.0f32; grid * grid],
        ),
        RawOutputTensor::new(
          level,
          HeadKind::Regression,
          (grid, grid),
          REG_CHANNELS,
          vec![0.0f32; grid * grid * REG_CHANNELS],
        ),
      ]
    })
    .collect()
}
