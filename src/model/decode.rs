// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decode.rs - 单尺度张量解码
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

use thiserror::Error;

use crate::model::{
  anchor::AnchorGrid,
  descriptor::{REG_BINS, REG_CHANNELS},
  tensor::{HeadKind, RawOutputTensor, ScaleLevel},
};

/// 本场景只有一个类别：违停
pub const VIOLATION_CLASS_ID: u32 = 0;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("预期输出张量数量为 {expected}, 实际为 {actual}")]
  TensorCount { expected: usize, actual: usize },
  #[error("缺少输出张量 {level:?}/{head:?}")]
  MissingTensor { level: ScaleLevel, head: HeadKind },
  #[error("输出张量 {level:?}/{head:?} 重复")]
  DuplicateTensor { level: ScaleLevel, head: HeadKind },
  #[error("输出张量 {level:?}/{head:?} 大小不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch {
    level: ScaleLevel,
    head: HeadKind,
    expected: usize,
    actual: usize,
  },
}

/// 单帧解码过程中的候选框，坐标位于模型输入分辨率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 置信度阈值对应的 logit 阈值，`sigmoid(x) >= t` 当且仅当 `x >= logit_threshold(t)`
pub fn logit_threshold(confidence: f32) -> f32 {
  if confidence <= 0.0 {
    f32::NEG_INFINITY
  } else if !(confidence < 1.0) {
    // 包括 NaN
    f32::INFINITY
  } else {
    let p = f64::from(confidence);
    let estimate = (-(1.0 / p - 1.0).ln()) as f32;

    // 转为 f32 后可能偏离几个 ULP，按 f32 的 sigmoid 二分到恰好的边界
    // 不变式: sigmoid(below) < confidence <= sigmoid(at_or_above)
    let mut below = estimate - 1.0;
    while sigmoid(below) >= confidence {
      below -= 1.0;
    }
    let mut at_or_above = estimate + 1.0;
    while sigmoid(at_or_above) < confidence {
      at_or_above += 1.0;
    }
    loop {
      let mid = below + (at_or_above - below) / 2.0;
      if mid == below || mid == at_or_above {
        return at_or_above;
      }
      if sigmoid(mid) >= confidence {
        at_or_above = mid;
      } else {
        below = mid;
      }
    }
  }
}

/// 对一组分箱做 softmax 后按 0..n 加权求期望
pub fn dfl_expectation(bins: &[f32]) -> f32 {
  let max = bins.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let mut total = 0.0;
  let mut weighted = 0.0;
  for (i, &value) in bins.iter().enumerate() {
    let e = (value - max).exp();
    total += e;
    weighted += e * i as f32;
  }
  weighted / total
}

/// 解码一个尺度的分类与回归输出
///
/// 先在原始 logit 上按阈值筛选网格，只对入选网格计算 sigmoid 与 DFL 距离。
/// `bbox_scales` 存在时回归值按通道乘以缩放系数。
pub fn decode_level(
  classification: &RawOutputTensor,
  regression: &RawOutputTensor,
  anchors: &AnchorGrid,
  stride: f32,
  bbox_scales: Option<&[f32]>,
  logit_cutoff: f32,
) -> Result<Vec<Candidate>, DecodeError> {
  let cells = anchors.len();
  check_len(classification, cells)?;
  check_len(regression, cells * REG_CHANNELS)?;
  if let Some(scales) = bbox_scales
    && scales.len() != REG_CHANNELS
  {
    return Err(DecodeError::LengthMismatch {
      level: regression.level,
      head: HeadKind::Regression,
      expected: REG_CHANNELS,
      actual: scales.len(),
    });
  }

  let mut candidates = Vec::new();
  let mut bins = [0f32; REG_CHANNELS];

  for cell in 0..cells {
    let logit = classification.data.get(cell);
    if logit.is_nan() || logit < logit_cutoff {
      continue;
    }

    let base = cell * REG_CHANNELS;
    for (channel, slot) in bins.iter_mut().enumerate() {
      let raw = regression.data.get(base + channel);
      *slot = match bbox_scales {
        Some(scales) => raw * scales[channel],
        None => raw,
      };
    }

    let [left, top, right, bottom] =
      [0, 1, 2, 3].map(|side| dfl_expectation(&bins[side * REG_BINS..(side + 1) * REG_BINS]));
    let (ax, ay) = anchors.center(cell);

    candidates.push(Candidate {
      class_id: VIOLATION_CLASS_ID,
      score: sigmoid(logit),
      bbox: [
        (ax - left) * stride,
        (ay - top) * stride,
        (ax + right) * stride,
        (ay + bottom) * stride,
      ],
    });
  }

  Ok(candidates)
}

fn check_len(tensor: &RawOutputTensor, expected: usize) -> Result<(), DecodeError> {
  if tensor.data.len() != expected {
    return Err(DecodeError::LengthMismatch {
      level: tensor.level,
      head: tensor.head,
      expected,
      actual: tensor.data.len(),
    });
  }
  Ok(())
}
