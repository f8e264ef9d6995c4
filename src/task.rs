// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 检测任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{dispatch::Deliver, model::Model};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 注册 Ctrl-C 处理：置位返回的标志，并在宽限期后强制退出
///
/// 宽限期内在途的分发可以完成或超时，超过宽限期仍未退出则直接结束进程。
pub fn install_shutdown_handler(grace: Duration) -> anyhow::Result<Arc<AtomicBool>> {
  let shutdown = Arc::new(AtomicBool::new(false));
  let flag = shutdown.clone();

  ctrlc::set_handler(move || {
    if flag.swap(true, Ordering::AcqRel) {
      return;
    }
    info!("收到中断信号，等待当前帧分发完成后退出...");
    thread::spawn(move || {
      thread::sleep(grace);
      warn!("等待超过 {:?}，强制退出程序", grace);
      std::process::exit(1);
    });
  })?;

  Ok(shutdown)
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Deliver<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    let now = Instant::now();
    output.deliver(&frame, &result)?;
    info!("分发完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  shutdown: Option<Arc<AtomicBool>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 每帧处理完后检查该标志
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
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Deliver<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");

    let mut processed = 0;
    let mut failed = 0;
    for frame in input {
      processed += 1;
      info!("处理第 {} 帧图像", processed);
      let now = Instant::now();
      match model.infer(&frame) {
        Ok(result) => {
          let elapsed_a = now.elapsed();
          output.deliver(&frame, &result)?;
          info!(
            "推理完成，耗时: {:.2?} / {:.2?}",
            elapsed_a,
            now.elapsed()
          );
        }
        Err(e) => {
          // 单帧失败不影响后续帧
          failed += 1;
          error!("第 {} 帧推理失败: {}", processed, e);
        }
      }

      if self.frame_number.is_some_and(|n| processed >= n) {
        info!("达到指定帧数 {}, 退出任务循环", processed);
        break;
      }
      if self.should_stop() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧，其中 {} 帧推理失败", processed, failed);
    Ok(())
  }
}
