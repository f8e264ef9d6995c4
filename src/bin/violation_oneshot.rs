// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/violation_oneshot.rs - 单张图像违停检测
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
  input::InputWrapper,
  model::{ReplayBackend, ViolationDetectorBuilder},
  task::{OneShotTask, Task},
};
use tracing::info;

/// 违停检测：处理一张图像并分发结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件（TOML）
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 模型输出清单，例如 replay:///opt/models/violation.toml
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///data/frame.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

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

  let chain = DispatchChain::from_config(&config);
  if chain.probe().backend_unreachable() {
    bail!("数据库与通知后端均不可用，退出");
  }

  OneShotTask.run_task(input.into_frames(), model, chain)?;

  Ok(())
}
