// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/violation.rs - 违停检测模型
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl,
  frame::{FrameError, FrameScale, Nv12Frame, SourceFrame, preprocess},
  model::{
    Detection, Model,
    descriptor::{DescriptorError, ModelDescriptor, OutputAttr},
    pipeline::DetectionPipeline,
    replay::{ReplayBackend, ReplayError},
    tensor::RawOutputTensor,
  },
};

const DEFAULT_CONFIDENCE: f32 = 0.3;
const DEFAULT_IOU: f32 = 0.45;

/// 推理运行时：接收 NV12 输入，给出 6 个输出张量
pub trait InferenceBackend {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);
  /// 加载时报告的输出属性
  fn output_attrs(&self) -> &[OutputAttr];
  fn forward(&self, input: &Nv12Frame) -> Result<Vec<RawOutputTensor>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ViolationModelError {
  #[error("模型描述无效: {0}")]
  Descriptor(#[from] DescriptorError),
  #[error("帧预处理错误: {0}")]
  Frame(#[from] FrameError),
  #[error("回放后端错误: {0}")]
  Replay(#[from] ReplayError),
  #[error("推理后端错误: {0}")]
  Backend(Box<dyn std::error::Error + Send + Sync>),
  #[error("{name} 阈值 {value} 无效，必须位于 (0, 1)")]
  InvalidThreshold { name: &'static str, value: f32 },
}

pub struct ViolationDetectorBuilder<B> {
  backend: B,
  confidence: f32,
  iou: f32,
}

impl FromUrl for ViolationDetectorBuilder<ReplayBackend> {
  type Error = ViolationModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self::new(ReplayBackend::from_url(url)?))
  }
}

impl<B: InferenceBackend> ViolationDetectorBuilder<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
    }
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = iou;
    self
  }

  pub fn build(self) -> Result<ViolationDetector<B>, ViolationModelError> {
    for (name, value) in [("置信度", self.confidence), ("IoU", self.iou)] {
      if !(value > 0.0 && value < 1.0) {
        return Err(ViolationModelError::InvalidThreshold { name, value });
      }
    }

    let (width, height) = self.backend.input_size();
    let descriptor = ModelDescriptor::resolve(width, height, self.backend.output_attrs())?;
    info!(
      "违停检测模型就绪: 输入 {}x{}, 置信度阈值 {}, IoU 阈值 {}",
      width, height, self.confidence, self.iou
    );

    Ok(ViolationDetector {
      backend: self.backend,
      pipeline: DetectionPipeline::new(Arc::new(descriptor)),
      confidence: self.confidence,
      iou: self.iou,
    })
  }
}

pub struct ViolationDetector<B> {
  backend: B,
  pipeline: DetectionPipeline,
  confidence: f32,
  iou: f32,
}

impl<B> ViolationDetector<B> {
  pub fn descriptor(&self) -> &ModelDescriptor {
    self.pipeline.descriptor()
  }
}

impl<B: InferenceBackend> Model for ViolationDetector<B> {
  type Input = SourceFrame;
  type Output = Vec<Detection>;
  type Error = ViolationModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let descriptor = self.pipeline.descriptor();
    debug!("预处理第 {} 帧", input.index());
    let (nv12, scale) = preprocess(input, descriptor.input_width(), descriptor.input_height())?;

    debug!("执行模型推理");
    let outputs = self
      .backend
      .forward(&nv12)
      .map_err(|e| ViolationModelError::Backend(Box::new(e)))?;

    Ok(self.postprocess(&outputs, &scale))
  }

  fn postprocess(&self, outputs: &[RawOutputTensor], scale: &FrameScale) -> Self::Output {
    let detections = self
      .pipeline
      .decode_frame(outputs, scale, self.confidence, self.iou);
    debug!("检测到 {} 个目标", detections.len());
    detections
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{decode::sigmoid, pipeline::tests::synthetic_outputs, tensor::ScaleLevel};
  use image::RgbImage;

  #[test]
  fn detector_runs_backend_and_rescales() {
    let backend = ReplayBackend::from_tensors(
      (640, 640),
      synthetic_outputs(Some((ScaleLevel::Small, 40 * 80 + 40, 1.0))),
    );
    let detector = ViolationDetectorBuilder::new(backend).build().unwrap();

    let frame = SourceFrame::new(RgbImage::new(1280, 1280), 11);
    let detections = detector.infer(&frame).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].frame_index, 11);
    assert_eq!(detections[0].confidence, sigmoid(1.0));
    assert_eq!(detections[0].bbox.to_array(), [528, 528, 768, 768]);
  }

  #[test]
  fn thresholds_outside_unit_interval_are_rejected() {
    let backend = ReplayBackend::from_tensors((640, 640), synthetic_outputs(None));
    assert!(matches!(
      ViolationDetectorBuilder::new(backend).confidence(1.5).build(),
      Err(ViolationModelError::InvalidThreshold { .. })
    ));
  }
}
