// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/anchor.rs - 锚点网格
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

/// 单个尺度的锚点，按行优先排列，每个网格单元一个中心点
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorGrid {
  centers: Box<[(f32, f32)]>,
}

impl AnchorGrid {
  pub fn new(grid_width: usize, grid_height: usize) -> Self {
    let centers = (0..grid_height)
      .flat_map(|y| (0..grid_width).map(move |x| (x as f32 + 0.5, y as f32 + 0.5)))
      .collect();
    Self { centers }
  }

  pub fn len(&self) -> usize {
    self.centers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.centers.is_empty()
  }

  #[inline]
  pub fn center(&self, cell: usize) -> (f32, f32) {
    self.centers[cell]
  }

  pub fn centers(&self) -> &[(f32, f32)] {
    &self.centers
  }
}
