// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

use crate::frame::FrameScale;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
  fn postprocess(&self, outputs: &[RawOutputTensor], scale: &FrameScale) -> Self::Output;
}

/// 原图像素坐标下的检测框，保证 left < right 且 top < bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
}

impl BoundingBox {
  pub fn width(&self) -> u32 {
    (self.right - self.left).unsigned_abs()
  }

  pub fn height(&self) -> u32 {
    (self.bottom - self.top).unsigned_abs()
  }

  pub fn to_array(&self) -> [i32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }
}

/// 最终检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: BoundingBox,
  pub frame_index: u64,
}

pub mod anchor;
pub mod decode;
pub mod descriptor;
pub mod pipeline;
pub mod suppress;
pub mod tensor;

mod replay;
mod violation;

pub use self::descriptor::{ModelDescriptor, OutputAttr, OutputMode};
pub use self::pipeline::DetectionPipeline;
pub use self::replay::{ReplayBackend, ReplayError};
pub use self::tensor::{HeadKind, RawOutputTensor, ScaleLevel, TensorData, TensorDtype};
pub use self::violation::{
  InferenceBackend, ViolationDetector, ViolationDetectorBuilder, ViolationModelError,
};
