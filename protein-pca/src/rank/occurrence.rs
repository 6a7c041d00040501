use ndarray::{Array2, ArrayView1, Axis};

use crate::msa::AlignmentMatrix;
use crate::util::alphabet::SIGMA;

/// 出现次数表：`counts[[symbol, column]]`，形状为 SIGMA × 列数，gap（行 0）同样计数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceTable {
    counts: Array2<u32>,
}

impl OccurrenceTable {
    pub fn count(matrix: &AlignmentMatrix) -> Self {
        let mut counts = Array2::<u32>::zeros((SIGMA, matrix.n_columns()));
        for (j, col) in matrix.codes().axis_iter(Axis(1)).enumerate() {
            let mut slot = counts.column_mut(j);
            for &code in col {
                slot[code as usize] += 1;
            }
        }
        Self { counts }
    }

    /// 单列计数，按字母表编码索引
    pub fn column_counts(&self, j: usize) -> [u32; SIGMA] {
        let mut out = [0u32; SIGMA];
        for (dst, &src) in out.iter_mut().zip(self.counts.column(j)) {
            *dst = src;
        }
        out
    }

    pub fn column(&self, j: usize) -> ArrayView1<'_, u32> {
        self.counts.column(j)
    }

    pub fn get(&self, symbol: u8, column: usize) -> u32 {
        self.counts[[symbol as usize, column]]
    }

    pub fn column_total(&self, j: usize) -> u32 {
        self.counts.column(j).sum()
    }

    pub fn n_columns(&self) -> usize {
        self.counts.ncols()
    }
}
