use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::error::{PipelineError, Result};
use crate::msa::AlignmentMatrix;
use crate::rank::ranker::RankMap;

/// 排名表：与比对矩阵同形，每个元素为该符号在所在列的 rank（0 仅用于 gap）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingTable {
    ids: Vec<String>,
    labels: Vec<String>,
    ranks: Array2<u8>,
}

impl RankingTable {
    pub fn new(ids: Vec<String>, labels: Vec<String>, ranks: Array2<u8>) -> Result<Self> {
        if ranks.nrows() != ids.len() || ranks.ncols() != labels.len() {
            return Err(PipelineError::MalformedAlignment(format!(
                "ranking table shape {}x{} does not match {} IDs and {} labels",
                ranks.nrows(),
                ranks.ncols(),
                ids.len(),
                labels.len()
            )));
        }
        Ok(Self { ids, labels, ranks })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn ranks(&self) -> ArrayView2<'_, u8> {
        self.ranks.view()
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, u8> {
        self.ranks.row(i)
    }

    pub fn n_sequences(&self) -> usize {
        self.ranks.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.ranks.ncols()
    }

    /// PCA 输入
    pub fn to_f64(&self) -> Array2<f64> {
        self.ranks.mapv(f64::from)
    }
}

/// 用每列的 rank 表替换比对矩阵中的符号；各列并行处理。
///
/// `rank_maps` 必须由同一矩阵构建，否则 panic。
pub fn encode(matrix: &AlignmentMatrix, rank_maps: &[RankMap]) -> RankingTable {
    assert_eq!(rank_maps.len(), matrix.n_columns(), "one rank map per alignment column");

    let columns: Vec<Vec<u8>> = rank_maps
        .par_iter()
        .enumerate()
        .map(|(j, map)| {
            matrix
                .column(j)
                .iter()
                .map(|&code| {
                    map.rank(code)
                        .unwrap_or_else(|| unreachable!("symbol {} has no rank in column {}", code, j))
                })
                .collect()
        })
        .collect();

    let mut ranks = Array2::<u8>::zeros((matrix.n_sequences(), matrix.n_columns()));
    for (j, col) in columns.iter().enumerate() {
        for (dst, &r) in ranks.column_mut(j).iter_mut().zip(col) {
            *dst = r;
        }
    }

    RankingTable {
        ids: matrix.ids().to_vec(),
        labels: matrix.column_labels(),
        ranks,
    }
}
