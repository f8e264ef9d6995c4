// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tensor.rs - 模型输出张量
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

use serde::Deserialize;

/// 检测尺度：小、中、大，对应步长 8/16/32
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleLevel {
  Small,
  Medium,
  Large,
}

impl ScaleLevel {
  pub const ALL: [ScaleLevel; 3] = [ScaleLevel::Small, ScaleLevel::Medium, ScaleLevel::Large];

  pub fn index(self) -> usize {
    match self {
      ScaleLevel::Small => 0,
      ScaleLevel::Medium => 1,
      ScaleLevel::Large => 2,
    }
  }

  pub fn stride(self) -> u32 {
    match self {
      ScaleLevel::Small => 8,
      ScaleLevel::Medium => 16,
      ScaleLevel::Large => 32,
    }
  }
}

/// 输出头类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadKind {
  Classification,
  Regression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorDtype {
  Float32,
  Int8,
  Int16,
  Int32,
}

impl TensorDtype {
  pub fn size_of(self) -> usize {
    match self {
      TensorDtype::Float32 | TensorDtype::Int32 => 4,
      TensorDtype::Int16 => 2,
      TensorDtype::Int8 => 1,
    }
  }
}

/// 张量原始数据，量化输出保留整数值，由解码阶段按通道反量化
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  Float32(Box<[f32]>),
  Int8(Box<[i8]>),
  Int16(Box<[i16]>),
  Int32(Box<[i32]>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::Float32(data) => data.len(),
      TensorData::Int8(data) => data.len(),
      TensorData::Int16(data) => data.len(),
      TensorData::Int32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dtype(&self) -> TensorDtype {
    match self {
      TensorData::Float32(_) => TensorDtype::Float32,
      TensorData::Int8(_) => TensorDtype::Int8,
      TensorData::Int16(_) => TensorDtype::Int16,
      TensorData::Int32(_) => TensorDtype::Int32,
    }
  }

  /// 读取第 `index` 个元素的数值，越界由调用方保证
  #[inline]
  pub fn get(&self, index: usize) -> f32 {
    match self {
      TensorData::Float32(data) => data[index],
      TensorData::Int8(data) => f32::from(data[index]),
      TensorData::Int16(data) => f32::from(data[index]),
      TensorData::Int32(data) => data[index] as f32,
    }
  }
}

impl From<Vec<f32>> for TensorData {
  fn from(data: Vec<f32>) -> Self {
    TensorData::Float32(data.into_boxed_slice())
  }
}

impl From<Vec<i8>> for TensorData {
  fn from(data: Vec<i8>) -> Self {
    TensorData::Int8(data.into_boxed_slice())
  }
}

/// 推理后端每帧给出的一个输出，数据按 NHWC 排布
#[derive(Debug, Clone)]
pub struct RawOutputTensor {
  pub level: ScaleLevel,
  pub head: HeadKind,
  pub grid_height: usize,
  pub grid_width: usize,
  pub channels: usize,
  pub data: TensorData,
}

impl RawOutputTensor {
  pub fn new(
    level: ScaleLevel,
    head: HeadKind,
    grid: (usize, usize),
    channels: usize,
    data: impl Into<TensorData>,
  ) -> Self {
    let (grid_height, grid_width) = grid;
    Self {
      level,
      head,
      grid_height,
      grid_width,
      channels,
      data: data.into(),
    }
  }

  pub fn cells(&self) -> usize {
    self.grid_height * self.grid_width
  }

  pub fn expected_len(&self) -> usize {
    self.cells() * self.channels
  }

  pub fn is_consistent(&self) -> bool {
    self.data.len() == self.expected_len()
  }
}
