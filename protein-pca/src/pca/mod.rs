//! 排名表上的主成分分析。
//!
//! 对中心化后的 n × p 矩阵做 thin SVD（`nalgebra::SVD`），不显式构造 p × p 协方差；
//! 本模块只负责中心化、排序、符号约定以及得分 / 载荷的计算。

pub mod report;

use std::path::Path;

use log::{info, warn};
use nalgebra::{DMatrix, SVD};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::rank::RankingTable;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelMeta {
    pub ranking_table: Option<String>,
    pub build_args: Option<String>,
    pub build_timestamp: Option<String>,
}

/// 已拟合的 PCA 模型。
///
/// - `components`：n_components × n_features，每行一个单位特征向量；
/// - `explained_variance`：对应特征值（协方差分母为 n − 1），降序；
/// - `explained_variance_ratio`：特征值 / 总方差。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PcaModel {
    labels: Vec<String>,
    mean: Array1<f64>,
    components: Array2<f64>,
    explained_variance: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
    n_samples: usize,
    meta: ModelMeta,
}

/// 单个主成分的投影：各列载荷向量与各序列得分
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub component: usize,
    pub axis: Array1<f64>,
    pub scores: Array1<f64>,
}

/// 由保留比例计算主成分个数，至少为 1
pub fn components_for(n_columns: usize, frac: f64) -> usize {
    ((frac * n_columns as f64).floor() as usize).max(1)
}

impl PcaModel {
    pub fn fit(table: &RankingTable, n_components: usize) -> Result<Self> {
        let n = table.n_sequences();
        let p = table.n_columns();
        if n < 2 {
            return Err(PipelineError::PcaInput(format!("need at least 2 sequences, found {}", n)));
        }
        if n_components == 0 {
            return Err(PipelineError::PcaInput("n_components must be at least 1".into()));
        }
        let max_components = n.min(p);
        let k = if n_components > max_components {
            warn!(
                "{} components requested but at most {} are available; keeping {}",
                n_components, max_components, max_components
            );
            max_components
        } else {
            n_components
        };

        let x = table.to_f64();
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::PcaInput("ranking table is empty".into()))?;
        let centered = &x - &mean;
        let denom = (n - 1) as f64;
        let total_variance = centered.iter().map(|v| v * v).sum::<f64>() / denom;

        // 特征值 = σ² / (n − 1)，特征向量 = Vᵀ 的行
        let svd = SVD::new(DMatrix::from_fn(n, p, |i, j| centered[[i, j]]), false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| PipelineError::PcaInput("SVD did not produce right singular vectors".into()))?;
        let eigenvalues: Vec<f64> = svd.singular_values.iter().map(|s| s * s / denom).collect();
        let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]).then(a.cmp(&b)));

        let mut components = Array2::<f64>::zeros((k, p));
        let mut explained_variance = Array1::<f64>::zeros(k);
        for (c, &idx) in order.iter().take(k).enumerate() {
            explained_variance[c] = eigenvalues[idx].max(0.0);
            let v = v_t.row(idx);
            // 符号约定：绝对值最大的分量为正，保证输出可复现
            let pivot = (0..p).fold(0, |best, i| if v[i].abs() > v[best].abs() { i } else { best });
            let sign = if v[pivot] < 0.0 { -1.0 } else { 1.0 };
            for i in 0..p {
                components[[c, i]] = sign * v[i];
            }
        }
        let explained_variance_ratio = if total_variance > 0.0 {
            explained_variance.mapv(|ev| ev / total_variance)
        } else {
            Array1::zeros(k)
        };

        info!(
            "PCA fitted on {} sequences x {} positions: {} components, {:.1}% variance explained",
            n,
            p,
            k,
            explained_variance_ratio.sum() * 100.0
        );

        Ok(Self {
            labels: table.labels().to_vec(),
            mean,
            components,
            explained_variance,
            explained_variance_ratio,
            n_samples: n,
            meta: ModelMeta::default(),
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.components.ncols()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: ModelMeta) {
        self.meta = meta;
    }

    /// 序列得分：中心化后投影到主成分，n_sequences × n_components
    pub fn scores(&self, table: &RankingTable) -> Result<Array2<f64>> {
        if table.labels() != self.labels.as_slice() {
            return Err(PipelineError::PcaInput(format!(
                "ranking table has {} positions, model was fitted on {}",
                table.n_columns(),
                self.n_features()
            )));
        }
        let centered = &table.to_f64() - &self.mean;
        Ok(centered.dot(&self.components.t()))
    }

    /// 列载荷：−componentsᵀ · √explained_variance，n_features × n_components
    pub fn loadings(&self) -> Array2<f64> {
        let scale = self.explained_variance.mapv(f64::sqrt);
        -(&self.components.t() * &scale)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        crate::io::write_atomically(path, |w| {
            bincode::serialize_into(w, self)?;
            Ok(())
        })
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let f = std::io::BufReader::new(std::fs::File::open(path)?);
        let model: Self = bincode::deserialize_from(f)?;
        Ok(model)
    }
}

/// PCA 估计器：`fit` 之前请求任何结果都返回 `PcaNotFitted`。
#[derive(Debug, Clone)]
pub struct Pca {
    n_components: usize,
    model: Option<PcaModel>,
}

impl Pca {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            model: None,
        }
    }

    pub fn from_model(model: PcaModel) -> Self {
        Self {
            n_components: model.n_components(),
            model: Some(model),
        }
    }

    pub fn fit(&mut self, table: &RankingTable) -> Result<&PcaModel> {
        let model = PcaModel::fit(table, self.n_components)?;
        let model = &*self.model.insert(model);
        Ok(model)
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Result<&PcaModel> {
        self.model.as_ref().ok_or(PipelineError::PcaNotFitted)
    }

    pub fn into_model(self) -> Result<PcaModel> {
        self.model.ok_or(PipelineError::PcaNotFitted)
    }

    pub fn transform(&self, table: &RankingTable) -> Result<Array2<f64>> {
        self.model()?.scores(table)
    }

    pub fn loadings(&self) -> Result<Array2<f64>> {
        Ok(self.model()?.loadings())
    }

    /// 前 `k` 个主成分的投影（主成分向量 + 序列得分）
    pub fn projections(&self, table: &RankingTable, k: usize) -> Result<Vec<Projection>> {
        let model = self.model()?;
        if k > model.n_components() {
            return Err(PipelineError::PcaInput(format!(
                "cannot project {} components, only {} were kept",
                k,
                model.n_components()
            )));
        }
        info!(
            "Calculating projections for {} selected components (out of {} total).",
            k,
            model.n_components()
        );
        let scores = model.scores(table)?;
        Ok((0..k)
            .map(|c| Projection {
                component: c + 1,
                axis: model.components.row(c).to_owned(),
                scores: scores.column(c).to_owned(),
            })
            .collect())
    }
}
