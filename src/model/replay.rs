// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/replay.rs - 回放推理后端
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

//! 从磁盘读取预先导出的输出张量，每次推理返回同一组结果。
//!
//! 清单文件示例：
//!
//! ```toml
//! input_width = 640
//! input_height = 640
//!
//! [[outputs]]
//! level = "small"
//! head = "regression"
//! dtype = "int8"
//! file = "small_reg.bin"
//! quant_scales = [0.05, 0.05] # 64 个
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Nv12Frame,
  model::{
    InferenceBackend,
    descriptor::{OutputAttr, REG_CHANNELS},
    tensor::{HeadKind, RawOutputTensor, ScaleLevel, TensorData, TensorDtype},
  },
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("清单解析错误: {0}")]
  Manifest(#[from] toml::de::Error),
  #[error("张量文件 {path} 大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  SizeMismatch {
    path: PathBuf,
    expected: usize,
    actual: usize,
  },
  #[error("输入尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

#[derive(Debug, Deserialize)]
struct ReplayManifest {
  input_width: u32,
  input_height: u32,
  outputs: Vec<ReplayOutput>,
}

#[derive(Debug, Deserialize)]
struct ReplayOutput {
  name: Option<String>,
  level: ScaleLevel,
  head: HeadKind,
  dtype: TensorDtype,
  file: PathBuf,
  #[serde(default)]
  quant_scales: Option<Vec<f32>>,
}

pub struct ReplayBackend {
  input_size: (u32, u32),
  attrs: Vec<OutputAttr>,
  tensors: Vec<RawOutputTensor>,
}

impl FromUrlWithScheme for ReplayBackend {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayBackend {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayError::SchemeMismatch);
    }
    Self::load(Path::new(url.path()))
  }
}

impl ReplayBackend {
  /// 读取清单及其引用的张量文件，相对路径以清单所在目录为基准
  pub fn load(manifest_path: &Path) -> Result<Self, ReplayError> {
    info!("加载回放清单: {}", manifest_path.display());
    let text = std::fs::read_to_string(manifest_path).map_err(|source| ReplayError::Io {
      path: manifest_path.to_path_buf(),
      source,
    })?;
    let manifest: ReplayManifest = toml::from_str(&text)?;
    let base = manifest_path.parent().unwrap_or(Path::new("."));

    let mut attrs = Vec::with_capacity(manifest.outputs.len());
    let mut tensors = Vec::with_capacity(manifest.outputs.len());
    for output in manifest.outputs {
      let grid_height = (manifest.input_height / output.level.stride()) as usize;
      let grid_width = (manifest.input_width / output.level.stride()) as usize;
      let channels = channels_of(output.head);
      let path = base.join(&output.file);

      let bytes = std::fs::read(&path).map_err(|source| ReplayError::Io {
        path: path.clone(),
        source,
      })?;
      let expected = grid_height * grid_width * channels * output.dtype.size_of();
      if bytes.len() != expected {
        return Err(ReplayError::SizeMismatch {
          path,
          expected,
          actual: bytes.len(),
        });
      }
      debug!("读取张量 {}: {} 字节", path.display(), bytes.len());

      attrs.push(OutputAttr {
        name: output
          .name
          .unwrap_or_else(|| output.file.display().to_string()),
        level: output.level,
        head: output.head,
        grid_height,
        grid_width,
        channels,
        dtype: output.dtype,
        quant_scales: output.quant_scales,
      });
      tensors.push(RawOutputTensor::new(
        output.level,
        output.head,
        (grid_height, grid_width),
        channels,
        decode_le(&bytes, output.dtype),
      ));
    }

    Ok(Self {
      input_size: (manifest.input_width, manifest.input_height),
      attrs,
      tensors,
    })
  }

  /// 直接使用内存中的张量，输出属性由张量推出
  pub fn from_tensors(input_size: (u32, u32), tensors: Vec<RawOutputTensor>) -> Self {
    let attrs = tensors
      .iter()
      .map(|tensor| OutputAttr {
        name: format!("{:?}_{:?}", tensor.level, tensor.head).to_lowercase(),
        level: tensor.level,
        head: tensor.head,
        grid_height: tensor.grid_height,
        grid_width: tensor.grid_width,
        channels: tensor.channels,
        dtype: tensor.data.dtype(),
        quant_scales: None,
      })
      .collect();
    Self {
      input_size,
      attrs,
      tensors,
    }
  }
}

fn channels_of(head: HeadKind) -> usize {
  match head {
    HeadKind::Classification => 1,
    HeadKind::Regression => REG_CHANNELS,
  }
}

fn decode_le(bytes: &[u8], dtype: TensorDtype) -> TensorData {
  match dtype {
    TensorDtype::Float32 => TensorData::Float32(
      bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect(),
    ),
    TensorDtype::Int8 => TensorData::Int8(bytes.iter().map(|&b| b as i8).collect()),
    TensorDtype::Int16 => TensorData::Int16(
      bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect(),
    ),
    TensorDtype::Int32 => TensorData::Int32(
      bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect(),
    ),
  }
}

impl InferenceBackend for ReplayBackend {
  type Error = ReplayError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_attrs(&self) -> &[OutputAttr] {
    &self.attrs
  }

  fn forward(&self, input: &Nv12Frame) -> Result<Vec<RawOutputTensor>, Self::Error> {
    let actual = (input.width(), input.height());
    if actual != self.input_size {
      return Err(ReplayError::InputMismatch {
        expected: self.input_size,
        actual,
      });
    }
    Ok(self.tensors.clone())
  }
}
