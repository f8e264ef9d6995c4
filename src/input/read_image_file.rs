// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{
  path::{Path, PathBuf},
  thread,
  time::Duration,
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::FrameSource};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("读取 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("解码图像 {path} 失败: {source}")]
  Decode {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("目录 {0} 中没有可用的图像文件")]
  EmptyFolder(PathBuf),
  #[error("无效的查询参数 {key}={value}")]
  InvalidQuery { key: String, value: String },
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

fn read_image(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  let reader = ImageReader::open(path).map_err(|source| ImageFileInputError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  let image = reader
    .with_guessed_format()
    .map_err(|source| ImageFileInputError::Io {
      path: path.to_path_buf(),
      source,
    })?
    .decode()
    .map_err(|source| ImageFileInputError::Decode {
      path: path.to_path_buf(),
      source,
    })?;
  Ok(image.into_rgb8())
}

fn check_scheme<T: FromUrlWithScheme>(url: &Url) -> Result<(), ImageFileInputError> {
  if url.scheme() != T::SCHEME {
    error!(
      "URI 方案不匹配: 期望 '{}', 实际为 '{}'",
      T::SCHEME,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemeMismatch);
  }
  Ok(())
}

/// 单张图像，读取一次后结束
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme::<Self>(url)?;
    Self::open(Path::new(url.path()))
  }
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let image = read_image(path)?;
    info!(
      "读取图像 {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );
    Ok(Self { image: Some(image) })
  }

  pub fn from_image(image: RgbImage) -> Self {
    Self { image: Some(image) }
  }
}

impl FrameSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
    Ok(self.image.take())
  }
}

/// 目录中的图像按文件名顺序依次读出，用于模拟摄像头
///
/// `images:///data/frames?fps=25` 会以 25 帧每秒的节奏出帧；
/// 未给出 `fps` 时不做等待。
pub struct ImageFolderInput {
  directory: PathBuf,
  files: Vec<PathBuf>,
  cursor: usize,
  interval: Option<Duration>,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "images";
}

impl FromUrl for ImageFolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme::<Self>(url)?;

    let mut interval = None;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "fps" => {
          let fps = value
            .parse::<f64>()
            .ok()
            .filter(|fps| *fps > 0.0)
            .ok_or_else(|| ImageFileInputError::InvalidQuery {
              key: key.to_string(),
              value: value.to_string(),
            })?;
          interval = Some(Duration::from_secs_f64(1.0 / fps));
        }
        _ => {
          return Err(ImageFileInputError::InvalidQuery {
            key: key.to_string(),
            value: value.to_string(),
          });
        }
      }
    }

    Ok(Self::open(Path::new(url.path()))?.with_interval(interval))
  }
}

impl ImageFolderInput {
  pub fn open(directory: &Path) -> Result<Self, ImageFileInputError> {
    let io_error = |source| ImageFileInputError::Io {
      path: directory.to_path_buf(),
      source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(io_error)? {
      let path = entry.map_err(io_error)?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if is_image && path.is_file() {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(ImageFileInputError::EmptyFolder(directory.to_path_buf()));
    }
    files.sort();

    info!("图像目录 {} 共 {} 张图像", directory.display(), files.len());
    Ok(Self {
      directory: directory.to_path_buf(),
      files,
      cursor: 0,
      interval: None,
    })
  }

  pub fn with_interval(mut self, interval: Option<Duration>) -> Self {
    self.interval = interval;
    self
  }

  /// 给出了 `fps`，按固定节奏出帧
  pub fn is_paced(&self) -> bool {
    self.interval.is_some()
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

impl FrameSource for ImageFolderInput {
  type Error = ImageFileInputError;

  fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
    let Some(path) = self.files.get(self.cursor) else {
      return Ok(None);
    };
    // 先前移游标，坏文件只会失败一次
    self.cursor += 1;
    if let Some(interval) = self.interval {
      thread::sleep(interval);
    }
    debug!("读取图像 {}", path.display());
    read_image(path).map(Some)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn write_png(path: &Path, value: u8) {
    RgbImage::from_pixel(4, 2, Rgb([value, value, value]))
      .save(path)
      .unwrap();
  }

  #[test]
  fn single_image_is_read_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    write_png(&path, 7);

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let image = input.read_frame().unwrap().unwrap();
    assert_eq!(image.dimensions(), (4, 2));
    assert!(input.read_frame().unwrap().is_none());
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("images:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));
  }

  #[test]
  fn folder_is_read_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("b.png"), 2);
    write_png(&dir.path().join("a.png"), 1);
    write_png(&dir.path().join("c.PNG"), 3);
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

    let mut input = ImageFolderInput::open(dir.path()).unwrap();
    assert_eq!(input.len(), 3);
    let values: Vec<u8> = std::iter::from_fn(|| input.read_frame().unwrap())
      .map(|image| image.get_pixel(0, 0)[0])
      .collect();
    assert_eq!(values, vec![1, 2, 3]);
  }

  #[test]
  fn broken_file_fails_once_then_continues() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"not an image").unwrap();
    write_png(&dir.path().join("b.png"), 5);

    let mut input = ImageFolderInput::open(dir.path()).unwrap();
    assert!(matches!(
      input.read_frame(),
      Err(ImageFileInputError::Decode { .. })
    ));
    assert!(input.read_frame().unwrap().is_some());
    assert!(input.read_frame().unwrap().is_none());
  }

  #[test]
  fn folder_url_accepts_fps_only() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), 1);

    let url = Url::parse(&format!("images://{}?fps=4", dir.path().display())).unwrap();
    let input = ImageFolderInput::from_url(&url).unwrap();
    assert_eq!(input.interval, Some(Duration::from_millis(250)));

    let url = Url::parse(&format!("images://{}?loop=1", dir.path().display())).unwrap();
    assert!(matches!(
      ImageFolderInput::from_url(&url),
      Err(ImageFileInputError::InvalidQuery { .. })
    ));

    let empty = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageFolderInput::open(empty.path()),
      Err(ImageFileInputError::EmptyFolder(_))
    ));
  }
}
