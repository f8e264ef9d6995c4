// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/notifier.rs - HTTP 违停通知
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

use tracing::debug;
use url::Url;

use crate::dispatch::{Notifier, SinkError, ViolationNotice};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// 以 JSON 推送违停摘要
pub struct HttpNotifier {
  agent: ureq::Agent,
  url: Url,
  health_url: Option<Url>,
}

impl HttpNotifier {
  pub fn new(url: Url, timeout: Duration) -> Self {
    Self {
      agent: ureq::AgentBuilder::new().timeout(timeout).build(),
      url,
      health_url: None,
    }
  }

  /// 后端健康检查地址，例如 `/actuator/health`
  pub fn with_health_url(mut self, health_url: Option<Url>) -> Self {
    self.health_url = health_url;
    self
  }
}

impl Notifier for HttpNotifier {
  fn notify(&self, notice: &ViolationNotice<'_>) -> Result<u16, SinkError> {
    debug!("推送违停通知到 {}: {:?}", self.url, notice);
    let response = self.agent.post(self.url.as_str()).send_json(notice)?;
    Ok(response.status())
  }

  fn probe(&self) -> Result<(), SinkError> {
    let Some(health_url) = &self.health_url else {
      return Ok(());
    };
    self
      .agent
      .get(health_url.as_str())
      .timeout(HEALTH_TIMEOUT)
      .call()?;
    Ok(())
  }
}
