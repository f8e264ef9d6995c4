// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/local_backup.rs - 本地目录备份
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
  fs::{self, File},
  io::Write,
  path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, error};

use crate::{FromUrl, FromUrlWithScheme, dispatch::SinkError};

/// 与图像同名的 json 描述文件内容
#[derive(Debug, Clone, Serialize)]
pub struct BackupMeta<'a> {
  pub camera_id: i64,
  pub location: &'a str,
  pub detection_time: String,
  pub confidence: f32,
  pub bbox: [i32; 4],
  pub class_id: u32,
  pub class_name: &'static str,
  pub image_filename: &'a str,
}

/// 把图像和描述文件写入本地目录，目录在首次使用时创建
#[derive(Debug, Clone)]
pub struct LocalBackup {
  directory: PathBuf,
}

impl FromUrlWithScheme for LocalBackup {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for LocalBackup {
  type Error = SinkError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SinkError::SchemeMismatch);
    }
    Ok(Self::new(url.path()))
  }
}

impl LocalBackup {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 写入 `filename` 及同名 `.json`，返回图像路径
  pub fn store(
    &self,
    filename: &str,
    jpeg: &[u8],
    meta: &BackupMeta<'_>,
  ) -> Result<PathBuf, SinkError> {
    if !self.directory.exists() {
      debug!("创建备份目录: {}", self.directory.display());
      fs::create_dir_all(&self.directory)?;
    }

    let image_path = self.directory.join(filename);
    write_atomically(&image_path, jpeg)?;

    let meta_path = image_path.with_extension("json");
    write_atomically(&meta_path, &serde_json::to_vec_pretty(meta)?)?;

    Ok(image_path)
  }
}

/// 先写同目录下的临时文件再重命名，读者看不到写了一半的文件
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
  let file_name = path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();
  let temp = path.with_file_name(format!(".{file_name}.part"));

  let written = (|| -> std::io::Result<()> {
    let mut file = File::create(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp, path)
  })();

  if let Err(e) = written {
    error!("写入 {} 失败: {}", path.display(), e);
    let _ = fs::remove_file(&temp);
    return Err(e.into());
  }
  Ok(())
}
