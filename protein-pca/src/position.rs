//! 比对列坐标 ↔ 原始（去 gap）序列坐标的映射。

use ndarray::{Array2, ArrayView1};

use crate::msa::AlignmentMatrix;
use crate::util::alphabet;

/// 位置映射表：`positions[[column, seq]]` 为该列在序列去 gap 后的 0-based 下标，gap 为 `None`。
///
/// 与排名无关，仅由比对矩阵构建。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionMap {
    ids: Vec<String>,
    positions: Array2<Option<u32>>,
}

impl PositionMap {
    pub fn build(matrix: &AlignmentMatrix) -> Self {
        let mut positions = Array2::<Option<u32>>::from_elem((matrix.n_columns(), matrix.n_sequences()), None);
        for i in 0..matrix.n_sequences() {
            let mut next = 0u32;
            for (j, &code) in matrix.row(i).iter().enumerate() {
                if !alphabet::is_gap(code) {
                    positions[[j, i]] = Some(next);
                    next += 1;
                }
            }
        }
        Self {
            ids: matrix.ids().to_vec(),
            positions,
        }
    }

    pub fn from_parts(ids: Vec<String>, positions: Array2<Option<u32>>) -> Option<Self> {
        (positions.ncols() == ids.len()).then_some(Self { ids, positions })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn n_columns(&self) -> usize {
        self.positions.nrows()
    }

    pub fn n_sequences(&self) -> usize {
        self.positions.ncols()
    }

    pub fn get(&self, column: usize, seq: usize) -> Option<u32> {
        self.positions.get([column, seq]).copied().flatten()
    }

    /// 某一比对列在所有序列中的原始位置
    pub fn column(&self, column: usize) -> ArrayView1<'_, Option<u32>> {
        self.positions.row(column)
    }

    /// 某条序列在每个比对列上的原始位置
    pub fn sequence_positions(&self, seq: usize) -> ArrayView1<'_, Option<u32>> {
        self.positions.column(seq)
    }

    pub fn seq_index(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|s| s == id)
    }

    /// 反向查找：原始位置 -> 比对列
    pub fn to_alignment_column(&self, seq: usize, original: u32) -> Option<usize> {
        let col = self.positions.column(seq);
        // 非 gap 位置沿列严格递增，可二分
        let present: Vec<(usize, u32)> = col.iter().enumerate().filter_map(|(j, p)| p.map(|p| (j, p))).collect();
        present
            .binary_search_by_key(&original, |&(_, p)| p)
            .ok()
            .map(|k| present[k].0)
    }

    pub fn degapped_len(&self, seq: usize) -> usize {
        self.positions.column(seq).iter().filter(|p| p.is_some()).count()
    }
}
