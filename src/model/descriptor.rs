// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/descriptor.rs - 模型描述，加载时确定一次
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
use tracing::{debug, info, warn};

use crate::model::tensor::{HeadKind, ScaleLevel, TensorDtype};

/// 每条边的分布分箱数
pub const REG_BINS: usize = 16;
/// 回归头通道数：4 条边 x 分箱数
pub const REG_CHANNELS: usize = 4 * REG_BINS;
/// 3 个尺度 x {分类, 回归}
pub const NUM_OUTPUTS: usize = 6;

#[derive(Error, Debug, PartialEq)]
pub enum DescriptorError {
  #[error("预期模型输出数量为 {expected}, 实际为 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("模型输入尺寸 {width}x{height} 无效，必须为 32 的倍数")]
  InvalidInput { width: u32, height: u32 },
  #[error("输出 {level:?}/{head:?} 重复")]
  DuplicateOutput { level: ScaleLevel, head: HeadKind },
  #[error("缺少输出 {level:?}/{head:?}")]
  MissingOutput { level: ScaleLevel, head: HeadKind },
  #[error("输出 {name} 形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    name: String,
    expected: (usize, usize, usize),
    actual: (usize, usize, usize),
  },
}

/// 推理后端在加载模型时报告的输出属性
#[derive(Debug, Clone)]
pub struct OutputAttr {
  pub name: String,
  pub level: ScaleLevel,
  pub head: HeadKind,
  pub grid_height: usize,
  pub grid_width: usize,
  pub channels: usize,
  pub dtype: TensorDtype,
  pub quant_scales: Option<Vec<f32>>,
}

/// 回归输出的数值模式
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
  /// 输出已是浮点数，直接使用
  RawFloat,
  /// 回归输出需要按通道乘以缩放系数，按尺度索引
  Dequantized { bbox_scales: [Box<[f32]>; 3] },
}

impl OutputMode {
  pub fn bbox_scales(&self, level: ScaleLevel) -> Option<&[f32]> {
    match self {
      OutputMode::RawFloat => None,
      OutputMode::Dequantized { bbox_scales } => Some(&bbox_scales[level.index()]),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelShape {
  pub level: ScaleLevel,
  pub grid_height: usize,
  pub grid_width: usize,
  pub stride: f32,
}

impl LevelShape {
  pub fn cells(&self) -> usize {
    self.grid_height * self.grid_width
  }
}

/// 模型的不可变描述：输入尺寸、各尺度网格与数值模式
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
  input_width: u32,
  input_height: u32,
  levels: [LevelShape; 3],
  output_mode: OutputMode,
}

impl ModelDescriptor {
  /// 不依赖后端属性，直接按输入尺寸构造
  pub fn for_input(
    input_width: u32,
    input_height: u32,
    output_mode: OutputMode,
  ) -> Result<Self, DescriptorError> {
    if input_width == 0 || input_height == 0 || input_width % 32 != 0 || input_height % 32 != 0 {
      return Err(DescriptorError::InvalidInput {
        width: input_width,
        height: input_height,
      });
    }

    let levels = ScaleLevel::ALL.map(|level| LevelShape {
      level,
      grid_height: (input_height / level.stride()) as usize,
      grid_width: (input_width / level.stride()) as usize,
      stride: level.stride() as f32,
    });

    Ok(Self {
      input_width,
      input_height,
      levels,
      output_mode,
    })
  }

  /// 校验后端报告的输出属性，并确定数值模式
  pub fn resolve(
    input_width: u32,
    input_height: u32,
    attrs: &[OutputAttr],
  ) -> Result<Self, DescriptorError> {
    if attrs.len() != NUM_OUTPUTS {
      return Err(DescriptorError::OutputCount {
        expected: NUM_OUTPUTS,
        actual: attrs.len(),
      });
    }

    let mut descriptor = Self::for_input(input_width, input_height, OutputMode::RawFloat)?;

    let mut slots: [[Option<&OutputAttr>; 2]; 3] = [[None; 2]; 3];
    for attr in attrs {
      let slot = &mut slots[attr.level.index()][head_index(attr.head)];
      if slot.is_some() {
        return Err(DescriptorError::DuplicateOutput {
          level: attr.level,
          head: attr.head,
        });
      }

      let shape = &descriptor.levels[attr.level.index()];
      let channels = match attr.head {
        HeadKind::Classification => 1,
        HeadKind::Regression => REG_CHANNELS,
      };
      let expected = (shape.grid_height, shape.grid_width, channels);
      let actual = (attr.grid_height, attr.grid_width, attr.channels);
      if expected != actual {
        return Err(DescriptorError::ShapeMismatch {
          name: attr.name.clone(),
          expected,
          actual,
        });
      }

      debug!(
        "输出 {}: 尺度 {:?}, 类型 {:?}, 形状 {:?}, 数据类型 {:?}",
        attr.name, attr.level, attr.head, actual, attr.dtype
      );
      *slot = Some(attr);
    }

    let mut regression = Vec::with_capacity(3);
    for level in ScaleLevel::ALL {
      for head in [HeadKind::Classification, HeadKind::Regression] {
        if slots[level.index()][head_index(head)].is_none() {
          return Err(DescriptorError::MissingOutput { level, head });
        }
      }
      if let Some(attr) = slots[level.index()][head_index(HeadKind::Regression)] {
        regression.push(attr);
      }
    }

    descriptor.output_mode = resolve_output_mode(attrs, &regression);
    info!(
      "模型描述: 输入 {}x{}, 数值模式 {}",
      input_width,
      input_height,
      match descriptor.output_mode {
        OutputMode::RawFloat => "浮点",
        OutputMode::Dequantized { .. } => "反量化",
      }
    );
    Ok(descriptor)
  }

  pub fn input_width(&self) -> u32 {
    self.input_width
  }

  pub fn input_height(&self) -> u32 {
    self.input_height
  }

  pub fn levels(&self) -> &[LevelShape; 3] {
    &self.levels
  }

  pub fn level(&self, level: ScaleLevel) -> &LevelShape {
    &self.levels[level.index()]
  }

  pub fn output_mode(&self) -> &OutputMode {
    &self.output_mode
  }
}

fn head_index(head: HeadKind) -> usize {
  match head {
    HeadKind::Classification => 0,
    HeadKind::Regression => 1,
  }
}

fn resolve_output_mode(attrs: &[OutputAttr], regression: &[&OutputAttr]) -> OutputMode {
  if attrs.iter().all(|attr| attr.dtype == TensorDtype::Float32) {
    return OutputMode::RawFloat;
  }

  let scales: Option<Vec<Box<[f32]>>> = regression
    .iter()
    .map(|attr| {
      attr
        .quant_scales
        .as_ref()
        .filter(|scales| scales.len() == REG_CHANNELS)
        .map(|scales| scales.clone().into_boxed_slice())
    })
    .collect();

  match scales.and_then(|scales| <[Box<[f32]>; 3]>::try_from(scales).ok()) {
    Some(bbox_scales) => OutputMode::Dequantized { bbox_scales },
    None => {
      warn!("量化输出缺少完整的回归缩放系数，回退为浮点模式");
      OutputMode::RawFloat
    }
  }
}

#[cfg(test)]
pub(crate) fn attrs_for(
  input: u32,
  dtype: TensorDtype,
  scales: Option<Vec<f32>>,
) -> Vec<OutputAttr> {
  let mut attrs = Vec::new();
  for level in ScaleLevel::ALL {
    let grid = (input / level.stride()) as usize;
    for (head, channels) in [(HeadKind::Classification, 1), (HeadKind::Regression, REG_CHANNELS)] {
      attrs.push(OutputAttr {
        name: format!("{:?}_{:?}", level, head).to_lowercase(),
        level,
        head,
        grid_height: grid,
        grid_width: grid,
        channels,
        dtype,
        quant_scales: match head {
          HeadKind::Regression => scales.clone(),
          HeadKind::Classification => None,
        },
      });
    }
  }
  attrs
}
