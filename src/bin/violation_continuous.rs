// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/violation_continuous.rs - 连续帧违停检测
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

use anyhow::{Result, bail};
use clap::Parser;
use url::Url;

use shanan_violation::{
  FromUrl,
  config::{Config, ConfigOverrides},
  dispatch::DispatchChain,
  input::{CaptureOptions, CaptureThread, InputWrapper},
  model::{ReplayBackend, ViolationDetectorBuilder},
  task::{ContinuousTask, Task, install_shutdown_handler},
};
use tracing::info;

/// 违停检测：持续读帧、检测并分发，直到输入结束或收到中断信号
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件（TOML）
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 模型输出清单，例如 replay:///opt/models/violation.toml
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 images:///data/frames?fps=25
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  #[command(flatten)]
  pub overrides: ConfigOverrides,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  config.apply(&args.overrides);
  config.validate()?;

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);

  let input = InputWrapper::from_url(&args.input)?;
  let model = ViolationDetectorBuilder::<ReplayBackend>::from_url(&args.model)?
    .confidence(config.detector.confidence)
    .iou(config.detector.iou)
    .build()?;

  let shutdown = install_shutdown_handler(config.capture.shutdown_grace())?;
  let chain = DispatchChain::from_config(&config).with_shutdown(shutdown.clone());
  if chain.probe().backend_unreachable() {
    bail!("数据库与通知后端均不可用，退出");
  }

  let task = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_shutdown(shutdown.clone());

  if input.is_paced() {
    // 按节奏出帧的来源只处理最新帧，来不及处理的帧丢弃
    info!("输入按固定节奏出帧，启用采集线程");
    let capture = CaptureThread::spawn(input, CaptureOptions {
      max_consecutive_failures: config.capture.max_consecutive_failures,
      retry_delay: config.capture.retry_delay(),
      ..CaptureOptions::default()
    })?;
    task.run_task(capture.latest_frames(shutdown), model, &chain)?;
  } else {
    info!("输入为文件，逐帧处理");
    task.run_task(input.into_frames(), model, &chain)?;
  }

  Ok(())
}
