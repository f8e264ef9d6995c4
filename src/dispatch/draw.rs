// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch/draw.rs - 检测框绘制与图像编码
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

use image::{ImageResult, Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::model::Detection;

/// 违停框颜色
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// 边框线宽（像素）
pub const BOX_THICKNESS: u32 = 2;
pub const JPEG_QUALITY: u8 = 90;

/// 在图像副本上绘制检测框
pub fn annotate(image: &RgbImage, detection: &Detection) -> RgbImage {
  let mut canvas = image.clone();
  let bbox = detection.bbox;

  for inset in 0..BOX_THICKNESS {
    let width = bbox.width().saturating_sub(2 * inset);
    let height = bbox.height().saturating_sub(2 * inset);
    if width == 0 || height == 0 {
      break;
    }
    let rect = Rect::at(bbox.left + inset as i32, bbox.top + inset as i32).of_size(width, height);
    draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
  }

  canvas
}

pub fn encode_jpeg(image: &RgbImage) -> ImageResult<Vec<u8>> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode_image(image)?;
  Ok(buffer)
}
