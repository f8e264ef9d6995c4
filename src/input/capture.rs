// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/capture.rs - 采集线程与最新帧缓冲
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

//! 采集线程不停地把最新一帧写入单槽缓冲，推理线程每次只取最新的那一帧。
//! 推理来不及处理的帧会被覆盖，只计数不报错。

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{frame::SourceFrame, input::FrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
  pub max_consecutive_failures: u32,
  pub retry_delay: Duration,
  /// 推理线程等待新帧时的轮询间隔
  pub poll_interval: Duration,
}

impl Default for CaptureOptions {
  fn default() -> Self {
    Self {
      max_consecutive_failures: 30,
      retry_delay: Duration::from_millis(100),
      poll_interval: Duration::from_millis(5),
    }
  }
}

#[derive(Default)]
struct Shared {
  slot: Mutex<Option<SourceFrame>>,
  stop: AtomicBool,
  finished: AtomicBool,
  captured: AtomicU64,
  dropped: AtomicU64,
}

impl Shared {
  fn publish(&self, frame: SourceFrame) {
    // 锁中毒时仍然可以安全覆盖单槽中的帧
    let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
    if slot.replace(frame).is_some() {
      self.dropped.fetch_add(1, Ordering::Relaxed);
    }
  }

  fn take(&self) -> Option<SourceFrame> {
    self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
  }
}

/// 后台采集线程，析构时停止并等待线程结束
pub struct CaptureThread {
  shared: Arc<Shared>,
  handle: Option<JoinHandle<()>>,
  options: CaptureOptions,
}

impl CaptureThread {
  pub fn spawn<S>(source: S, options: CaptureOptions) -> std::io::Result<Self>
  where
    S: FrameSource + Send + 'static,
  {
    let shared = Arc::new(Shared::default());
    let handle = thread::Builder::new()
      .name("capture".to_string())
      .spawn({
        let shared = shared.clone();
        move || capture_loop(source, &shared, options)
      })?;

    info!("采集线程已启动");
    Ok(Self {
      shared,
      handle: Some(handle),
      options,
    })
  }

  /// 取走当前最新帧，没有新帧时立即返回 `None`
  pub fn latest(&self) -> Option<SourceFrame> {
    self.shared.take()
  }

  /// 采集线程已退出（输入结束、失败过多或被停止）
  pub fn is_finished(&self) -> bool {
    self.shared.finished.load(Ordering::Acquire)
  }

  pub fn captured_frames(&self) -> u64 {
    self.shared.captured.load(Ordering::Relaxed)
  }

  /// 被新帧覆盖、未被处理的帧数
  pub fn dropped_frames(&self) -> u64 {
    self.shared.dropped.load(Ordering::Relaxed)
  }

  pub fn stop(&mut self) {
    self.shared.stop.store(true, Ordering::Release);
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        error!("采集线程异常退出");
      }
      info!(
        "采集线程已停止: 共采集 {} 帧，丢弃 {} 帧",
        self.captured_frames(),
        self.dropped_frames()
      );
    }
  }

  /// 按最新帧迭代，`shutdown` 置位或采集结束后停止
  pub fn latest_frames(&self, shutdown: Arc<AtomicBool>) -> LatestFrames<'_> {
    LatestFrames {
      capture: self,
      shutdown,
    }
  }
}

impl Drop for CaptureThread {
  fn drop(&mut self) {
    self.stop();
  }
}

fn capture_loop<S: FrameSource>(mut source: S, shared: &Shared, options: CaptureOptions) {
  let mut consecutive_failures = 0;
  let mut index = 0;

  while !shared.stop.load(Ordering::Acquire) {
    match source.read_frame() {
      Ok(Some(image)) => {
        consecutive_failures = 0;
        shared.publish(SourceFrame::new(image, index));
        shared.captured.fetch_add(1, Ordering::Relaxed);
        index += 1;
      }
      Ok(None) => {
        info!("输入已结束，采集线程退出");
        break;
      }
      Err(e) => {
        consecutive_failures += 1;
        warn!(
          "读取帧失败 ({}/{}): {}",
          consecutive_failures, options.max_consecutive_failures, e
        );
        if consecutive_failures >= options.max_consecutive_failures {
          error!("连续读取失败，停止采集");
          break;
        }
        thread::sleep(options.retry_delay);
      }
    }
  }

  shared.finished.store(true, Ordering::Release);
}

/// 最新帧迭代器，只在没有新帧时短暂轮询
pub struct LatestFrames<'a> {
  capture: &'a CaptureThread,
  shutdown: Arc<AtomicBool>,
}

impl Iterator for LatestFrames<'_> {
  type Item = SourceFrame;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.shutdown.load(Ordering::Acquire) {
        debug!("收到停止信号，不再取帧");
        return None;
      }
      // 先读结束标志再取帧，保证最后一帧不会漏掉
      let finished = self.capture.is_finished();
      if let Some(frame) = self.capture.latest() {
        return Some(frame);
      }
      if finished {
        return None;
      }
      thread::sleep(self.capture.options.poll_interval);
    }
  }
}
