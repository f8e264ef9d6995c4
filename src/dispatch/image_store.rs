// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/image_store.rs - HTTP 图像上传
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

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::dispatch::{ImageStore, SinkError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct UploadReply {
  status: String,
  #[serde(default)]
  filename: Option<String>,
  #[serde(default)]
  message: Option<String>,
}

/// 以 multipart 表单字段 `file` 上传 JPEG
pub struct HttpImageStore {
  agent: ureq::Agent,
  url: Url,
}

impl HttpImageStore {
  pub fn new(url: Url, timeout: Duration) -> Self {
    Self {
      agent: ureq::AgentBuilder::new().timeout(timeout).build(),
      url,
    }
  }
}

impl ImageStore for HttpImageStore {
  fn upload(&self, filename: &str, jpeg: &[u8]) -> Result<String, SinkError> {
    let boundary = format!(
      "----shanan{:x}",
      chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let body = multipart_body(&boundary, "file", filename, "image/jpeg", jpeg);
    debug!("上传图像 {} ({} 字节) 到 {}", filename, jpeg.len(), self.url);

    let response = self
      .agent
      .post(self.url.as_str())
      .set(
        "Content-Type",
        &format!("multipart/form-data; boundary={boundary}"),
      )
      .send_bytes(&body)?;

    let reply: UploadReply = response.into_json().map_err(read_error)?;
    if reply.status != "success" {
      return Err(SinkError::Rejected(
        reply.message.unwrap_or_else(|| reply.status.clone()),
      ));
    }

    // 没有文件名就没有可用的图像引用
    reply.filename.ok_or_else(|| {
      warn!("上传 {} 成功，但响应缺少文件名", filename);
      SinkError::Rejected("响应缺少文件名".to_string())
    })
  }

  /// 图像服务的 `/status` 接口
  fn probe(&self) -> Result<(), SinkError> {
    let status_url = self
      .url
      .join("/status")
      .map_err(|e| SinkError::Transport(e.to_string()))?;
    self
      .agent
      .get(status_url.as_str())
      .timeout(PROBE_TIMEOUT)
      .call()?;
    Ok(())
  }
}

/// 读取响应体时的超时也归为超时
pub(crate) fn read_error(err: std::io::Error) -> SinkError {
  match err.kind() {
    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SinkError::Timeout,
    std::io::ErrorKind::InvalidData => SinkError::Rejected(err.to_string()),
    _ => SinkError::Io(err),
  }
}

fn multipart_body(
  boundary: &str,
  field: &str,
  filename: &str,
  content_type: &str,
  data: &[u8],
) -> Vec<u8> {
  let mut body = Vec::with_capacity(data.len() + 256);
  body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
  body.extend_from_slice(
    format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
      .as_bytes(),
  );
  body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
  body.extend_from_slice(data);
  body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
  body
}
