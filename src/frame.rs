// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 帧定义与推理前处理
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

use std::borrow::Cow;

use chrono::{DateTime, Local};
use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("帧尺寸为零: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("NV12 要求宽高均为偶数，实际为 {width}x{height}")]
  OddDimensions { width: u32, height: u32 },
}

/// 帧来源给出的原始图像帧
#[derive(Debug, Clone)]
pub struct SourceFrame {
  image: RgbImage,
  index: u64,
  captured_at: DateTime<Local>,
}

impl SourceFrame {
  pub fn new(image: RgbImage, index: u64) -> Self {
    Self {
      image,
      index,
      captured_at: Local::now(),
    }
  }

  pub fn with_timestamp(mut self, captured_at: DateTime<Local>) -> Self {
    self.captured_at = captured_at;
    self
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn captured_at(&self) -> DateTime<Local> {
    self.captured_at
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 原图与模型输入之间的缩放关系，在缩放帧时计算一次
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameScale {
  pub frame_index: u64,
  pub source_width: u32,
  pub source_height: u32,
  pub x_scale: f32,
  pub y_scale: f32,
}

impl FrameScale {
  pub fn new(frame_index: u64, source: (u32, u32), input: (u32, u32)) -> Self {
    let (source_width, source_height) = source;
    let (input_width, input_height) = input;
    Self {
      frame_index,
      source_width,
      source_height,
      x_scale: source_width as f32 / input_width as f32,
      y_scale: source_height as f32 / input_height as f32,
    }
  }

  /// 原图尺寸与模型输入一致
  pub fn identity(frame_index: u64, width: u32, height: u32) -> Self {
    Self::new(frame_index, (width, height), (width, height))
  }
}

/// NV12 排布的推理输入：Y 平面后接交错的 UV 平面
#[derive(Debug, Clone)]
pub struct Nv12Frame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl Nv12Frame {
  pub fn from_rgb(image: &RgbImage) -> Result<Self, FrameError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyFrame { width, height });
    }
    if width % 2 != 0 || height % 2 != 0 {
      return Err(FrameError::OddDimensions { width, height });
    }

    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0u8; w * h * 3 / 2];
    let (y_plane, uv_plane) = data.split_at_mut(w * h);

    for (x, y, pixel) in image.enumerate_pixels() {
      let [r, g, b] = pixel.0.map(f32::from);
      y_plane[y as usize * w + x as usize] = to_u8(0.299 * r + 0.587 * g + 0.114 * b);
    }

    // 色度按 2x2 块取平均后下采样
    for by in 0..h / 2 {
      for bx in 0..w / 2 {
        let mut sum = [0f32; 3];
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
          let pixel = image.get_pixel((bx * 2 + dx) as u32, (by * 2 + dy) as u32);
          for (acc, value) in sum.iter_mut().zip(pixel.0) {
            *acc += f32::from(value);
          }
        }
        let [r, g, b] = sum.map(|v| v / 4.0);
        let u = -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
        let v = 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
        let offset = by * w + bx * 2;
        uv_plane[offset] = to_u8(u);
        uv_plane[offset + 1] = to_u8(v);
      }
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }
}

fn to_u8(value: f32) -> u8 {
  value.round().clamp(0.0, 255.0) as u8
}

/// 最近邻缩放到模型输入尺寸并转换为 NV12，同时给出回缩放系数
pub fn preprocess(
  frame: &SourceFrame,
  input_width: u32,
  input_height: u32,
) -> Result<(Nv12Frame, FrameScale), FrameError> {
  if frame.width() == 0 || frame.height() == 0 {
    return Err(FrameError::EmptyFrame {
      width: frame.width(),
      height: frame.height(),
    });
  }

  let resized = if frame.image().dimensions() == (input_width, input_height) {
    Cow::Borrowed(frame.image())
  } else {
    Cow::Owned(imageops::resize(
      frame.image(),
      input_width,
      input_height,
      FilterType::Nearest,
    ))
  };

  let nv12 = Nv12Frame::from_rgb(&resized)?;
  let scale = FrameScale::new(
    frame.index(),
    frame.image().dimensions(),
    (input_width, input_height),
  );
  Ok((nv12, scale))
}
