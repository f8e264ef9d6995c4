// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::warn;

use crate::{FromUrl, frame::SourceFrame};

/// 逐帧读取像素图像
///
/// `Ok(None)` 表示输入已经结束；`Err` 只代表这一次读取失败，调用方可以继续读。
pub trait FrameSource {
  type Error: std::error::Error + Send + 'static;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;
}

pub mod capture;

#[cfg(feature = "read_image_file")]
mod read_image_file;

pub use self::capture::{CaptureOptions, CaptureThread, LatestFrames};
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, ImageFolderInput};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的输入源
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFolder(ImageFolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
      if url.scheme() == ImageFolderInput::SCHEME {
        let input = ImageFolderInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFolder(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => Ok(input.read_frame()?),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFolder(input) => Ok(input.read_frame()?),
      #[allow(unreachable_patterns)]
      _ => Ok(None),
    }
  }
}

impl InputWrapper {
  /// 按自身节奏出帧的来源，推理跟不上时只处理最新帧
  ///
  /// 单张图片与未给出 `fps` 的目录必须逐帧处理，不能丢帧。
  pub fn is_paced(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(_) => false,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFolder(input) => input.is_paced(),
      #[allow(unreachable_patterns)]
      _ => false,
    }
  }

  /// 在当前线程顺序读帧，读取失败的帧跳过
  pub fn into_frames(self) -> Frames<Self> {
    Frames::new(self)
  }
}

/// 顺序读帧的迭代器，帧序号从 0 开始
pub struct Frames<S> {
  source: S,
  next_index: u64,
  max_consecutive_failures: u32,
}

impl<S: FrameSource> Frames<S> {
  pub fn new(source: S) -> Self {
    Self {
      source,
      next_index: 0,
      max_consecutive_failures: CaptureOptions::default().max_consecutive_failures,
    }
  }
}

impl<S: FrameSource> Iterator for Frames<S> {
  type Item = SourceFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let mut failures = 0;
    loop {
      match self.source.read_frame() {
        Ok(Some(image)) => {
          let frame = SourceFrame::new(image, self.next_index);
          self.next_index += 1;
          return Some(frame);
        }
        Ok(None) => return None,
        Err(e) => {
          failures += 1;
          warn!("读取帧失败，跳过: {}", e);
          if failures >= self.max_consecutive_failures {
            warn!("连续 {} 次读取失败，停止读取", failures);
            return None;
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(scheme)) if scheme == "rtsp"
    ));
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn frames_are_indexed_from_zero() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["0.png", "1.png"] {
      RgbImage::new(2, 2).save(dir.path().join(name)).unwrap();
    }
    let url = url::Url::parse(&format!("images://{}", dir.path().display())).unwrap();
    let indices: Vec<u64> = InputWrapper::from_url(&url)
      .unwrap()
      .into_frames()
      .map(|frame| frame.index())
      .collect();
    assert_eq!(indices, vec![0, 1]);
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn unpaced_folder_yields_every_frame_to_slow_consumer() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..8 {
      RgbImage::new(2, 2)
        .save(dir.path().join(format!("{i}.png")))
        .unwrap();
    }
    let url = url::Url::parse(&format!("images://{}", dir.path().display())).unwrap();
    let input = InputWrapper::from_url(&url).unwrap();
    assert!(!input.is_paced());

    let mut indices = Vec::new();
    for frame in input.into_frames() {
      std::thread::sleep(std::time::Duration::from_millis(20));
      indices.push(frame.index());
    }
    assert_eq!(indices, (0..8).collect::<Vec<u64>>());
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn folder_with_fps_is_paced() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(2, 2).save(dir.path().join("0.png")).unwrap();
    let url = url::Url::parse(&format!("images://{}?fps=25", dir.path().display())).unwrap();
    assert!(InputWrapper::from_url(&url).unwrap().is_paced());

    let url = url::Url::parse(&format!("image://{}/0.png", dir.path().display())).unwrap();
    assert!(!InputWrapper::from_url(&url).unwrap().is_paced());
  }
}
