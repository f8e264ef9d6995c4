// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/pipeline.rs - 单帧检测后处理流程
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

use std::{sync::Arc, time::Instant};

use tracing::{debug, error};

use crate::{
  frame::FrameScale,
  model::{
    BoundingBox, Detection,
    anchor::AnchorGrid,
    decode::{Candidate, DecodeError, decode_level, logit_threshold},
    descriptor::{ModelDescriptor, NUM_OUTPUTS},
    suppress::{aggregate, suppress},
    tensor::{HeadKind, RawOutputTensor, ScaleLevel},
  },
};

/// 解码、合并、抑制并回缩放到原图坐标
///
/// 锚点在构造时计算一次，之后只读，可跨线程共享。
#[derive(Debug, Clone)]
pub struct DetectionPipeline {
  descriptor: Arc<ModelDescriptor>,
  anchors: [AnchorGrid; 3],
}

type LevelPair<'a> = (&'a RawOutputTensor, &'a RawOutputTensor);

impl DetectionPipeline {
  pub fn new(descriptor: Arc<ModelDescriptor>) -> Self {
    let levels = *descriptor.levels();
    let anchors = levels.map(|shape| AnchorGrid::new(shape.grid_width, shape.grid_height));
    debug!(
      "锚点数量: {:?}",
      anchors.iter().map(AnchorGrid::len).collect::<Vec<_>>()
    );
    Self {
      descriptor,
      anchors,
    }
  }

  pub fn descriptor(&self) -> &ModelDescriptor {
    &self.descriptor
  }

  pub fn anchors(&self, level: ScaleLevel) -> &AnchorGrid {
    &self.anchors[level.index()]
  }

  /// 处理一帧的 6 个输出；前置条件不满足时记录错误并返回空结果
  pub fn decode_frame(
    &self,
    tensors: &[RawOutputTensor],
    scale: &FrameScale,
    confidence_threshold: f32,
    iou_threshold: f32,
  ) -> Vec<Detection> {
    match self.try_decode_frame(tensors, scale, confidence_threshold, iou_threshold) {
      Ok(detections) => detections,
      Err(e) => {
        error!("第 {} 帧解码失败，跳过该帧: {}", scale.frame_index, e);
        Vec::new()
      }
    }
  }

  pub fn try_decode_frame(
    &self,
    tensors: &[RawOutputTensor],
    scale: &FrameScale,
    confidence_threshold: f32,
    iou_threshold: f32,
  ) -> Result<Vec<Detection>, DecodeError> {
    let now = Instant::now();
    let pairs = pair_tensors(tensors)?;
    let cutoff = logit_threshold(confidence_threshold);

    let mut per_level = Vec::with_capacity(pairs.len());
    for (shape, (classification, regression)) in self.descriptor.levels().iter().zip(pairs) {
      let candidates = decode_level(
        classification,
        regression,
        &self.anchors[shape.level.index()],
        shape.stride,
        self.descriptor.output_mode().bbox_scales(shape.level),
        cutoff,
      )?;
      debug!("尺度 {:?}: 候选框 {} 个", shape.level, candidates.len());
      per_level.push(candidates);
    }

    let merged = aggregate(per_level);
    let total = merged.len();
    let kept = suppress(merged, confidence_threshold, iou_threshold);
    let detections: Vec<Detection> = kept
      .iter()
      .filter_map(|candidate| rescale(candidate, scale))
      .collect();

    debug!(
      "第 {} 帧: 候选 {} 个, 抑制后 {} 个, 有效 {} 个, 耗时 {:.2?}",
      scale.frame_index,
      total,
      kept.len(),
      detections.len(),
      now.elapsed()
    );
    Ok(detections)
  }
}

/// 按 (尺度, 输出头) 标签配对，与输出顺序无关
fn pair_tensors(tensors: &[RawOutputTensor]) -> Result<[LevelPair<'_>; 3], DecodeError> {
  if tensors.len() != NUM_OUTPUTS {
    return Err(DecodeError::TensorCount {
      expected: NUM_OUTPUTS,
      actual: tensors.len(),
    });
  }

  let mut classification: [Option<&RawOutputTensor>; 3] = [None; 3];
  let mut regression: [Option<&RawOutputTensor>; 3] = [None; 3];
  for tensor in tensors {
    let slot = match tensor.head {
      HeadKind::Classification => &mut classification[tensor.level.index()],
      HeadKind::Regression => &mut regression[tensor.level.index()],
    };
    if slot.replace(tensor).is_some() {
      return Err(DecodeError::DuplicateTensor {
        level: tensor.level,
        head: tensor.head,
      });
    }
  }

  let mut pairs = Vec::with_capacity(3);
  for level in ScaleLevel::ALL {
    let cls = classification[level.index()].ok_or(DecodeError::MissingTensor {
      level,
      head: HeadKind::Classification,
    })?;
    let reg = regression[level.index()].ok_or(DecodeError::MissingTensor {
      level,
      head: HeadKind::Regression,
    })?;
    pairs.push((cls, reg));
  }

  match <[LevelPair<'_>; 3]>::try_from(pairs) {
    Ok(pairs) => Ok(pairs),
    Err(pairs) => Err(DecodeError::TensorCount {
      expected: 3,
      actual: pairs.len(),
    }),
  }
}

/// 回缩放到原图像素并截断为整数；裁剪到画面内后退化的框被丢弃
fn rescale(candidate: &Candidate, scale: &FrameScale) -> Option<Detection> {
  let width = scale.source_width as f32;
  let height = scale.source_height as f32;
  let [x_min, y_min, x_max, y_max] = candidate.bbox;

  let bbox = BoundingBox {
    left: (x_min * scale.x_scale).clamp(0.0, width) as i32,
    top: (y_min * scale.y_scale).clamp(0.0, height) as i32,
    right: (x_max * scale.x_scale).clamp(0.0, width) as i32,
    bottom: (y_max * scale.y_scale).clamp(0.0, height) as i32,
  };

  if bbox.left >= bbox.right || bbox.top >= bbox.bottom {
    debug!("丢弃退化检测框: {:?}", bbox);
    return None;
  }

  Some(Detection {
    class_id: candidate.class_id,
    confidence: candidate.score,
    bbox,
    frame_index: scale.frame_index,
  })
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::model::{
    decode::sigmoid,
    descriptor::{OutputMode, REG_CHANNELS},
  };

  /// 构造 640x640 模型的 6 个浮点输出，`hit` 指定唯一一个高分网格
  pub(crate) fn synthetic_outputs(hit: Option<(ScaleLevel, usize, f32)>) -> Vec<RawOutputTensor> {
    let mut tensors = Vec::new();
    for level in ScaleLevel::ALL {
      let grid = (640 / level.stride()) as usize;
      let mut logits = vec![-10.0f32; grid * grid];
      if let Some((hit_level, cell, logit)) = hit
        && hit_level == level
      {
        logits[cell] = logit;
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
    tensors
  }

  pub(crate) fn pipeline_640() -> DetectionPipeline {
    let descriptor = ModelDescriptor::for_input(640, 640, OutputMode::RawFloat).unwrap();
    DetectionPipeline::new(Arc::new(descriptor))
  }

  #[test]
  fn zero_candidates_yield_empty_result() {
    let pipeline = pipeline_640();
    let scale = FrameScale::identity(0, 640, 640);
    let detections = pipeline.decode_frame(&synthetic_outputs(None), &scale, 0.3, 0.45);
    assert!(detections.is_empty());
  }

  #[test]
  fn single_hot_cell_yields_one_detection() {
    let pipeline = pipeline_640();
    let scale = FrameScale::identity(3, 640, 640);
    let cell = 40 * 80 + 40;
    let tensors = synthetic_outputs(Some((ScaleLevel::Small, cell, 1.0)));

    let detections = pipeline.decode_frame(&tensors, &scale, 0.3, 0.45);
    assert_eq!(detections.len(), 1);
    let detection = detections[0];
    assert_eq!(detection.confidence, sigmoid(1.0));
    assert_eq!(detection.frame_index, 3);
    // 锚点 (40.5, 40.5)，四边距离均为 7.5，步长 8
    assert_eq!(
      detection.bbox,
      BoundingBox {
        left: 264,
        top: 264,
        right: 384,
        bottom: 384
      }
    );
  }

  #[test]
  fn boxes_are_rescaled_to_source_resolution() {
    let pipeline = pipeline_640();
    let scale = FrameScale::new(0, (1280, 960), (640, 640));
    let tensors = synthetic_outputs(Some((ScaleLevel::Medium, 20 * 40 + 20, 4.0)));

    let detections = pipeline.decode_frame(&tensors, &scale, 0.3, 0.45);
    assert_eq!(detections.len(), 1);
    // 模型坐标 [(20.5-7.5)*16, .., (20.5+7.5)*16] = [208, 208, 448, 448]
    assert_eq!(
      detections[0].bbox,
      BoundingBox {
        left: 416,
        top: 312,
        right: 896,
        bottom: 672
      }
    );
  }

  #[test]
  fn boxes_are_clamped_to_frame() {
    let pipeline = pipeline_640();
    let scale = FrameScale::identity(0, 640, 640);
    let tensors = synthetic_outputs(Some((ScaleLevel::Small, 0, 2.0)));

    let detections = pipeline.decode_frame(&tensors, &scale, 0.3, 0.45);
    assert_eq!(detections.len(), 1);
    let bbox = detections[0].bbox;
    assert_eq!((bbox.left, bbox.top), (0, 0));
    assert!(bbox.left < bbox.right && bbox.top < bbox.bottom);
  }

  #[test]
  fn wrong_tensor_count_is_skipped_not_raised() {
    let pipeline = pipeline_640();
    let scale = FrameScale::identity(0, 640, 640);
    let mut tensors = synthetic_outputs(Some((ScaleLevel::Small, 0, 2.0)));
    tensors.pop();

    assert!(pipeline.decode_frame(&tensors, &scale, 0.3, 0.45).is_empty());
    assert_eq!(
      pipeline
        .try_decode_frame(&tensors, &scale, 0.3, 0.45)
        .unwrap_err(),
      DecodeError::TensorCount {
        expected: 6,
        actual: 5
      }
    );
  }

  #[test]
  fn tensors_are_paired_regardless_of_order() {
    let pipeline = pipeline_640();
    let scale = FrameScale::identity(0, 640, 640);
    let mut tensors = synthetic_outputs(Some((ScaleLevel::Large, 10 * 20 + 10, 1.5)));
    tensors.reverse();

    let detections = pipeline.decode_frame(&tensors, &scale, 0.3, 0.45);
    assert_eq!(detections.len(), 1);
  }

  #[test]
  fn mismatched_shape_is_skipped() {
    let pipeline = pipeline_640();
    let scale = FrameScale::identity(0, 640, 640);
    let mut tensors = synthetic_outputs(None);
    tensors[1] = RawOutputTensor::new(
      ScaleLevel::Small,
      HeadKind::Regression,
      (80, 80),
      REG_CHANNELS,
      vec![0.0f32; 10],
    );
    assert!(matches!(
      pipeline.try_decode_frame(&tensors, &scale, 0.3, 0.45),
      Err(DecodeError::LengthMismatch { .. })
    ));
  }
}
