// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/record_store.rs - SQLite 违停记录表
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
  sync::Mutex,
  time::Duration,
};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  dispatch::{RecordStore, SinkError, TIME_FORMAT, ViolationRow},
};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MEMORY_PATH: &str = ":memory:";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS violation_record (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  camera_id   INTEGER NOT NULL,
  image_path  TEXT,
  confidence  REAL NOT NULL,
  location    TEXT NOT NULL,
  upload_time TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_violation_record_camera
  ON violation_record (camera_id, upload_time);
";

/// 从记录表读回的一行
#[derive(Debug, Clone, PartialEq)]
pub struct StoredViolation {
  pub id: i64,
  pub camera_id: i64,
  pub image_path: Option<String>,
  pub confidence: f64,
  pub location: String,
  pub upload_time: String,
}

/// 首次使用时才打开连接，打开失败的话下次写入会重试
pub struct SqliteRecordStore {
  path: PathBuf,
  busy_timeout: Duration,
  connection: Mutex<Option<Connection>>,
}

impl FromUrlWithScheme for SqliteRecordStore {
  const SCHEME: &'static str = "sqlite";
}

impl FromUrl for SqliteRecordStore {
  type Error = SinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SinkError::SchemeMismatch);
    }
    Ok(Self::open(url.path(), DEFAULT_BUSY_TIMEOUT))
  }
}

impl SqliteRecordStore {
  pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      busy_timeout,
      connection: Mutex::new(None),
    }
  }

  pub fn in_memory() -> Self {
    Self::open(MEMORY_PATH, DEFAULT_BUSY_TIMEOUT)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn connect(&self) -> Result<Connection, SinkError> {
    let connection = if self.path == Path::new(MEMORY_PATH) {
      Connection::open_in_memory()?
    } else {
      if let Some(parent) = self.path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent)?;
      }
      Connection::open(&self.path)?
    };
    connection.busy_timeout(self.busy_timeout)?;
    connection.execute_batch(SCHEMA)?;
    info!("已打开违停记录库: {}", self.path.display());
    Ok(connection)
  }

  fn with_connection<T>(
    &self,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
  ) -> Result<T, SinkError> {
    let mut guard = self.connection.lock().map_err(|_| SinkError::Poisoned)?;
    let connection = match guard.take() {
      Some(connection) => connection,
      None => self.connect()?,
    };
    let result = f(&connection);
    *guard = Some(connection);
    Ok(result?)
  }

  pub fn find(&self, id: i64) -> Result<Option<StoredViolation>, SinkError> {
    self.with_connection(|connection| {
      connection
        .query_row(
          "SELECT id, camera_id, image_path, confidence, location, upload_time
           FROM violation_record WHERE id = ?1",
          params![id],
          |row| {
            Ok(StoredViolation {
              id: row.get(0)?,
              camera_id: row.get(1)?,
              image_path: row.get(2)?,
              confidence: row.get(3)?,
              location: row.get(4)?,
              upload_time: row.get(5)?,
            })
          },
        )
        .optional()
    })
  }
}

impl RecordStore for SqliteRecordStore {
  fn insert(&self, row: &ViolationRow<'_>) -> Result<i64, SinkError> {
    let upload_time = row.upload_time.format(TIME_FORMAT).to_string();
    let id = self.with_connection(|connection| {
      connection.execute(
        "INSERT INTO violation_record (camera_id, image_path, confidence, location, upload_time)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          row.camera_id,
          row.image_path,
          f64::from(row.confidence),
          row.location,
          upload_time
        ],
      )?;
      Ok(connection.last_insert_rowid())
    })?;
    debug!("违停记录写入成功, id = {}", id);
    Ok(id)
  }

  fn probe(&self) -> Result<(), SinkError> {
    self.with_connection(|connection| connection.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))?;
    Ok(())
  }
}
