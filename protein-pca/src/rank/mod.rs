//! 比对列的 rank 编码：出现次数统计 → 单列排名 → 整表替换。

pub mod encode;
pub mod occurrence;
pub mod ranker;

use log::debug;
use rayon::prelude::*;

use crate::error::{PipelineError, Result};
use crate::msa::AlignmentMatrix;

pub use encode::RankingTable;
pub use occurrence::OccurrenceTable;
pub use ranker::{rank_column, RankMap};

/// 对整个比对矩阵做 rank 编码。各列排名相互独立，在当前 rayon 线程池中并行计算。
pub fn rank_alignment(matrix: &AlignmentMatrix) -> Result<RankingTable> {
    let occ = OccurrenceTable::count(matrix);
    let rank_maps = (0..occ.n_columns())
        .into_par_iter()
        .map(|j| rank_column(&occ.column_counts(j), j))
        .collect::<Result<Vec<RankMap>>>()?;
    debug!(
        "ranked {} columns, max K = {}",
        rank_maps.len(),
        rank_maps.iter().map(RankMap::len).max().unwrap_or(0)
    );
    Ok(encode::encode(matrix, &rank_maps))
}

/// 在指定线程数的专用线程池中运行 `f`；0 表示使用 rayon 默认线程数。
pub fn with_threads<T, F>(threads: usize, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| PipelineError::Configuration(format!("cannot build thread pool: {}", e)))?;
    Ok(pool.install(f))
}
