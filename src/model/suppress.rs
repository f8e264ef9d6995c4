// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/suppress.rs - 多尺度合并与非极大值抑制
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

use crate::model::decode::Candidate;

/// 按小、中、大尺度的顺序拼接候选框，不做去重
pub fn aggregate<I>(per_level: I) -> Vec<Candidate>
where
  I: IntoIterator<Item = Vec<Candidate>>,
{
  let mut merged = Vec::new();
  for candidates in per_level {
    merged.extend(candidates);
  }
  merged
}

/// 两个 [x_min, y_min, x_max, y_max] 框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 与类别无关的贪心 NMS
///
/// 低于置信度阈值的候选框先被丢弃；其余按分数降序稳定排序，
/// 分数相同时保留合并顺序。
pub fn suppress(
  mut candidates: Vec<Candidate>,
  confidence_threshold: f32,
  iou_threshold: f32,
) -> Vec<Candidate> {
  candidates.retain(|c| c.score >= confidence_threshold);
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut suppressed = vec![false; candidates.len()];
  let mut kept = Vec::new();

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    kept.push(candidates[i]);
    for j in (i + 1)..candidates.len() {
      if !suppressed[j] && iou(&candidates[i].bbox, &candidates[j].bbox) > iou_threshold {
        suppressed[j] = true;
      }
    }
  }

  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn candidate(score: f32, bbox: [f32; 4]) -> Candidate {
    Candidate {
      class_id: 0,
      score,
      bbox,
    }
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
  }

  #[test]
  fn heavily_overlapping_pair_keeps_higher_score() {
    // 宽 100 的两个框错开 100/19，IoU = 0.9
    let shift = 100.0 / 19.0;
    let a = candidate(0.7, [0.0, 0.0, 100.0, 100.0]);
    let b = candidate(0.8, [shift, 0.0, 100.0 + shift, 100.0]);
    assert!((iou(&a.bbox, &b.bbox) - 0.9).abs() < 1e-4);

    let kept = suppress(vec![a, b], 0.3, 0.45);
    assert_eq!(kept, vec![b]);
  }

  #[test]
  fn suppression_is_idempotent() {
    let input = vec![
      candidate(0.9, [0.0, 0.0, 50.0, 50.0]),
      candidate(0.85, [5.0, 5.0, 55.0, 55.0]),
      candidate(0.6, [100.0, 100.0, 150.0, 150.0]),
      candidate(0.55, [102.0, 98.0, 149.0, 151.0]),
      candidate(0.4, [300.0, 0.0, 320.0, 40.0]),
    ];
    let once = suppress(input, 0.3, 0.45);
    let twice = suppress(once.clone(), 0.3, 0.45);
    assert_eq!(once, twice);
    assert_eq!(once.len(), 3);
  }

  #[test]
  fn empty_input_yields_empty_output() {
    assert!(suppress(Vec::new(), 0.3, 0.45).is_empty());
  }

  #[test]
  fn ties_keep_aggregation_order() {
    let first = candidate(0.5, [0.0, 0.0, 10.0, 10.0]);
    let second = candidate(0.5, [1.0, 0.0, 11.0, 10.0]);
    let merged = aggregate([vec![first], Vec::new(), vec![second]]);
    assert_eq!(merged, vec![first, second]);
    assert_eq!(suppress(merged, 0.3, 0.45), vec![first]);
  }

  #[test]
  fn low_scores_are_dropped() {
    let kept = suppress(vec![candidate(0.2, [0.0, 0.0, 1.0, 1.0])], 0.3, 0.45);
    assert!(kept.is_empty());
  }
}
