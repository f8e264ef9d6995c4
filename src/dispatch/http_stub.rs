// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/http_stub.rs - 测试用本地 HTTP 桩
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
  io::{Read, Write},
  net::{TcpListener, TcpStream},
  sync::mpsc,
  thread::{self, JoinHandle},
  time::Duration,
};

/// 接受一个连接，读完请求后回复固定响应；线程返回收到的原始请求
pub(crate) fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<Vec<u8>>) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();
  let handle = thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let request = read_request(&mut stream);
    let response = format!(
      "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
      body.len()
    );
    stream.write_all(response.as_bytes()).unwrap();
    request
  });
  (format!("http://{addr}/upload_image"), handle)
}

/// 接受连接但从不回复，直到返回的发送端被丢弃
pub(crate) fn stall() -> (String, mpsc::Sender<()>) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();
  let (guard, release) = mpsc::channel::<()>();
  thread::spawn(move || {
    let _connection = listener.accept();
    let _ = release.recv_timeout(Duration::from_secs(30));
  });
  (format!("http://{addr}/upload_image"), guard)
}

fn read_request(stream: &mut TcpStream) -> Vec<u8> {
  let mut request = Vec::new();
  let mut chunk = [0u8; 4096];
  loop {
    let n = stream.read(&mut chunk).unwrap_or(0);
    if n == 0 {
      break;
    }
    request.extend_from_slice(&chunk[..n]);
    if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
      let headers = String::from_utf8_lossy(&request[..end]).to_lowercase();
      let length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
      if request.len() >= end + 4 + length {
        break;
      }
    }
  }
  request
}
