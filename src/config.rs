// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 运行配置
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

//! 配置可来自 TOML 文件，也可由命令行覆盖；两种来源得到的结构完全一致。
//!
//! ```toml
//! [detector]
//! confidence = 0.3
//! iou = 0.45
//!
//! [camera]
//! id = 1
//! location = "东门停车区"
//!
//! [upload]
//! url = "http://192.168.76.203:8088/upload_image"
//!
//! [database]
//! enabled = false
//! ```

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use clap::Args;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::dispatch::CameraInfo;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件解析错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("{name} 阈值 {value} 无效，必须位于 (0, 1)")]
  Threshold { name: &'static str, value: f32 },
  #[error("{0} 超时必须大于 0")]
  ZeroTimeout(&'static str),
  #[error("{name} 地址 {url} 的方案不受支持")]
  UnsupportedScheme { name: &'static str, url: Url },
  #[error("本地备份目录为空")]
  EmptyBackupDirectory,
  #[error("退出宽限期 {grace_secs} 秒必须大于单次分发的超时总和 {chain_secs} 秒")]
  ShutdownGrace { grace_secs: u64, chain_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub detector: DetectorConfig,
  pub camera: CameraConfig,
  pub backup: BackupConfig,
  pub upload: UploadConfig,
  pub database: DatabaseConfig,
  pub notify: NotifyConfig,
  pub capture: CaptureConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
  pub confidence: f32,
  pub iou: f32,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence: 0.3,
      iou: 0.45,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
  pub id: i64,
  pub location: String,
}

impl Default for CameraConfig {
  fn default() -> Self {
    Self {
      id: 1,
      location: "测试地点".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
  pub enabled: bool,
  pub directory: PathBuf,
}

impl Default for BackupConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      directory: PathBuf::from("/tmp/detection_results"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
  pub enabled: bool,
  pub url: Url,
  pub timeout_secs: u64,
}

impl Default for UploadConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      url: local_url("http://127.0.0.1:8088/upload_image"),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
  pub enabled: bool,
  pub url: Url,
  pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      url: local_url("sqlite:///tmp/detection_results/violation.db"),
      busy_timeout_secs: 5,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
  pub enabled: bool,
  pub url: Url,
  pub health_url: Option<Url>,
  pub timeout_secs: u64,
}

impl Default for NotifyConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      url: local_url("http://127.0.0.1:8080/api/violation/notify"),
      health_url: Some(local_url("http://127.0.0.1:8080/actuator/health")),
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
  /// 连续读取失败多少次后停止采集
  pub max_consecutive_failures: u32,
  pub retry_delay_ms: u64,
  /// 收到中断信号后等待在途分发的最长时间
  pub shutdown_grace_secs: u64,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      max_consecutive_failures: 30,
      retry_delay_ms: 100,
      shutdown_grace_secs: 60,
    }
  }
}

impl CaptureConfig {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_secs(self.shutdown_grace_secs)
  }
}

// 默认地址均为字面量，解析不会失败
fn local_url(text: &str) -> Url {
  Url::parse(text).unwrap_or_else(|_| unreachable!("默认地址无效: {text}"))
}

/// 命令行覆盖项，与配置文件字段一一对应
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
  /// 置信度阈值
  #[arg(long = "conf-thres", value_name = "CONF")]
  pub confidence: Option<f32>,
  /// NMS IoU 阈值
  #[arg(long = "iou-thres", value_name = "IOU")]
  pub iou: Option<f32>,
  /// 摄像头编号
  #[arg(long, value_name = "ID")]
  pub camera_id: Option<i64>,
  /// 摄像头位置描述
  #[arg(long, value_name = "LOCATION")]
  pub location: Option<String>,
  /// 本地备份目录
  #[arg(long, value_name = "DIR")]
  pub backup_dir: Option<PathBuf>,
  /// 图像上传地址
  #[arg(long, value_name = "URL")]
  pub upload_url: Option<Url>,
  /// 数据库地址，例如 sqlite:///var/lib/violation.db
  #[arg(long, value_name = "URL")]
  pub database_url: Option<Url>,
  /// 通知地址
  #[arg(long, value_name = "URL")]
  pub notify_url: Option<Url>,
  #[arg(long)]
  pub disable_backup: bool,
  #[arg(long)]
  pub disable_image_upload: bool,
  #[arg(long)]
  pub disable_db: bool,
  #[arg(long)]
  pub disable_notify: bool,
}

impl Config {
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(text)?)
  }

  /// 未给出路径时使用默认配置
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => {
        info!("读取配置文件: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
          path: path.to_path_buf(),
          source,
        })?;
        Self::from_toml_str(&text)
      }
      None => Ok(Self::default()),
    }
  }

  pub fn apply(&mut self, overrides: &ConfigOverrides) {
    if let Some(confidence) = overrides.confidence {
      self.detector.confidence = confidence;
    }
    if let Some(iou) = overrides.iou {
      self.detector.iou = iou;
    }
    if let Some(id) = overrides.camera_id {
      self.camera.id = id;
    }
    if let Some(location) = &overrides.location {
      self.camera.location = location.clone();
    }
    if let Some(directory) = &overrides.backup_dir {
      self.backup.directory = directory.clone();
    }
    if let Some(url) = &overrides.upload_url {
      self.upload.url = url.clone();
    }
    if let Some(url) = &overrides.database_url {
      self.database.url = url.clone();
    }
    if let Some(url) = &overrides.notify_url {
      self.notify.url = url.clone();
    }
    self.backup.enabled &= !overrides.disable_backup;
    self.upload.enabled &= !overrides.disable_image_upload;
    self.database.enabled &= !overrides.disable_db;
    self.notify.enabled &= !overrides.disable_notify;
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("置信度", self.detector.confidence),
      ("IoU", self.detector.iou),
    ] {
      if !(value > 0.0 && value < 1.0) {
        return Err(ConfigError::Threshold { name, value });
      }
    }

    if self.backup.enabled && self.backup.directory.as_os_str().is_empty() {
      return Err(ConfigError::EmptyBackupDirectory);
    }
    if self.upload.enabled {
      check_http("图像上传", &self.upload.url)?;
      if self.upload.timeout_secs == 0 {
        return Err(ConfigError::ZeroTimeout("图像上传"));
      }
    }
    if self.database.enabled && self.database.url.scheme() != "sqlite" {
      return Err(ConfigError::UnsupportedScheme {
        name: "数据库",
        url: self.database.url.clone(),
      });
    }
    if self.notify.enabled {
      check_http("通知", &self.notify.url)?;
      if self.notify.timeout_secs == 0 {
        return Err(ConfigError::ZeroTimeout("通知"));
      }
    }

    let chain_secs = self.sink_timeout_chain_secs();
    if self.capture.shutdown_grace_secs <= chain_secs {
      return Err(ConfigError::ShutdownGrace {
        grace_secs: self.capture.shutdown_grace_secs,
        chain_secs,
      });
    }
    Ok(())
  }

  /// 单次分发最长的阻塞时间：已启用目标的超时之和
  pub fn sink_timeout_chain_secs(&self) -> u64 {
    [
      (self.upload.enabled, self.upload.timeout_secs),
      (self.database.enabled, self.database.busy_timeout_secs),
      (self.notify.enabled, self.notify.timeout_secs),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .map(|(_, secs)| secs)
    .sum()
  }

  pub fn camera_info(&self) -> CameraInfo {
    CameraInfo {
      id: self.camera.id,
      location: self.camera.location.clone(),
    }
  }
}

fn check_http(name: &'static str, url: &Url) -> Result<(), ConfigError> {
  match url.scheme() {
    "http" | "https" => Ok(()),
    _ => Err(ConfigError::UnsupportedScheme {
      name,
      url: url.clone(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.detector.confidence, 0.3);
    assert_eq!(config.detector.iou, 0.45);
    assert_eq!(config.upload.timeout_secs, 30);
    assert_eq!(config.notify.timeout_secs, 10);
    assert_eq!(config.capture.max_consecutive_failures, 30);
  }

  #[test]
  fn partial_file_keeps_defaults() {
    let config = Config::from_toml_str(
      r#"
      [detector]
      confidence = 0.6

      [camera]
      id = 9
      location = "西门"

      [database]
      enabled = false
      "#,
    )
    .unwrap();
    assert_eq!(config.detector.confidence, 0.6);
    assert_eq!(config.detector.iou, 0.45);
    assert_eq!(config.camera_info(), CameraInfo {
      id: 9,
      location: "西门".to_string()
    });
    assert!(!config.database.enabled);
    assert!(config.upload.enabled);
  }

  #[test]
  fn unknown_keys_are_rejected() {
    assert!(matches!(
      Config::from_toml_str("[detector]\nconfidance = 0.5\n"),
      Err(ConfigError::Parse(_))
    ));
  }

  #[test]
  fn overrides_match_file_settings() {
    let from_file = Config::from_toml_str(
      r#"
      detector = { confidence = 0.5, iou = 0.4 }
      camera = { id = 3, location = "北门" }
      upload = { enabled = false }
      "#,
    )
    .unwrap();

    let mut from_cli = Config::default();
    from_cli.apply(&ConfigOverrides {
      confidence: Some(0.5),
      iou: Some(0.4),
      camera_id: Some(3),
      location: Some("北门".to_string()),
      disable_image_upload: true,
      ..ConfigOverrides::default()
    });

    assert_eq!(from_file, from_cli);
  }

  #[test]
  fn invalid_values_are_rejected() {
    let mut config = Config::default();
    config.detector.iou = 1.0;
    assert!(matches!(
      config.validate(),
      Err(ConfigError::Threshold { name: "IoU", .. })
    ));

    let mut config = Config::default();
    config.database.url = Url::parse("mysql://localhost/violation").unwrap();
    assert!(matches!(
      config.validate(),
      Err(ConfigError::UnsupportedScheme { .. })
    ));

    config.database.enabled = false;
    config.notify.timeout_secs = 0;
    assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout(_))));
  }

  #[test]
  fn shutdown_grace_must_outlast_sink_timeouts() {
    let mut config = Config::default();
    assert_eq!(config.sink_timeout_chain_secs(), 30 + 5 + 10);

    config.upload.timeout_secs = 120;
    assert!(matches!(
      config.validate(),
      Err(ConfigError::ShutdownGrace {
        grace_secs: 60,
        chain_secs: 135
      })
    ));

    config.capture.shutdown_grace_secs = 135;
    assert!(config.validate().is_err());
    config.capture.shutdown_grace_secs = 136;
    assert!(config.validate().is_ok());

    // 未启用的目标不计入
    config.capture.shutdown_grace_secs = 60;
    config.upload.enabled = false;
    assert_eq!(config.sink_timeout_chain_secs(), 15);
    assert!(config.validate().is_ok());
  }
}
