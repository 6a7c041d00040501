use crate::error::{PipelineError, Result};
use crate::util::alphabet::{GAP, SIGMA};

/// 单列的 rank 查找表，按字母表编码索引。
///
/// - gap 的 rank 恒为 0；
/// - 列中出现的非 gap 符号占据 1..=K，互不相同；
/// - 未出现的符号没有 rank（`None`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankMap {
    ranks: [Option<u8>; SIGMA],
    k: u8,
}

impl RankMap {
    #[inline]
    pub fn rank(&self, symbol: u8) -> Option<u8> {
        self.ranks.get(symbol as usize).copied().flatten()
    }

    /// 参与排名的非 gap 符号个数 K
    pub fn len(&self) -> usize {
        self.k as usize
    }

    pub fn is_empty(&self) -> bool {
        self.k == 0
    }

    /// 按 rank 升序列出 (符号编码, rank)，不含 gap
    pub fn ranked_symbols(&self) -> Vec<(u8, u8)> {
        let mut out: Vec<(u8, u8)> = self
            .ranks
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(sym, r)| r.map(|r| (sym as u8, r)))
            .collect();
        out.sort_unstable_by_key(|&(_, r)| r);
        out
    }
}

/// 对一列的出现次数排名。
///
/// 排除 gap 与次数为 0 的符号后，按次数升序、符号降序排序，依次赋予 1..=K；
/// 因此次数最少的符号 rank 最小，次数相同时字母序靠后的符号 rank 更小。
/// 结果只取决于 (次数, 符号)，与遍历顺序无关。
pub fn rank_column(counts: &[u32; SIGMA], column: usize) -> Result<RankMap> {
    let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
    if total == 0 {
        return Err(PipelineError::InvalidColumn { column });
    }

    let mut eligible: Vec<(u8, u32)> = counts
        .iter()
        .enumerate()
        .filter(|&(sym, &c)| sym != GAP as usize && c > 0)
        .map(|(sym, &c)| (sym as u8, c))
        .collect();
    eligible.sort_unstable_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

    let mut ranks = [None; SIGMA];
    ranks[GAP as usize] = Some(0);
    for (i, &(sym, _)) in eligible.iter().enumerate() {
        ranks[sym as usize] = Some(i as u8 + 1);
    }
    Ok(RankMap {
        ranks,
        k: eligible.len() as u8,
    })
}
