//! 把 PC1/PC2 载荷映射回各序列的原始位置，并按到原点的距离划分保守 / 可变位置。

use crate::error::{PipelineError, Result};
use crate::pca::PcaModel;
use crate::position::PositionMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionClass {
    Conserved,
    Variable,
    Other,
}

impl PositionClass {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionClass::Conserved => "conserved",
            PositionClass::Variable => "variable",
            PositionClass::Other => "other",
        }
    }

    /// 距离小于 conserved·max 为保守，大于 variable·max 为可变
    pub fn classify(distance: f64, max_distance: f64, conserved: f64, variable: f64) -> Self {
        if distance < conserved * max_distance {
            PositionClass::Conserved
        } else if distance > variable * max_distance {
            PositionClass::Variable
        } else {
            PositionClass::Other
        }
    }
}

/// 两个阈值都在 [0, 1] 内，且保守阈值严格小于可变阈值
pub fn validate_cutoffs(conserved: f64, variable: f64) -> Result<()> {
    for (name, v) in [("conserved_cutoff", conserved), ("variable_cutoff", variable)] {
        if !(0.0..=1.0).contains(&v) {
            return Err(PipelineError::Configuration(format!(
                "{} must lie in [0, 1], got {}",
                name, v
            )));
        }
    }
    if conserved >= variable {
        return Err(PipelineError::Configuration(format!(
            "conserved_cutoff ({}) must be below variable_cutoff ({})",
            conserved, variable
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadingsRow {
    /// 0-based 比对列
    pub column: usize,
    pub label: String,
    pub pc1: f64,
    pub pc2: f64,
    pub distance: f64,
    pub class: PositionClass,
    /// 各序列中的 1-based 原始位置，gap 为 None
    pub positions: Vec<Option<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadingsReport {
    pub ids: Vec<String>,
    pub max_distance: f64,
    pub rows: Vec<LoadingsRow>,
}

impl LoadingsReport {
    pub fn build(model: &PcaModel, positions: &PositionMap, conserved: f64, variable: f64) -> Result<Self> {
        validate_cutoffs(conserved, variable)?;
        if model.n_components() < 2 {
            return Err(PipelineError::PcaInput(format!(
                "loadings report needs at least 2 components, model has {}",
                model.n_components()
            )));
        }
        if positions.n_columns() != model.n_features() {
            return Err(PipelineError::PcaInput(format!(
                "position map covers {} alignment columns, loadings cover {}",
                positions.n_columns(),
                model.n_features()
            )));
        }

        let loadings = model.loadings();
        let distances: Vec<f64> = loadings
            .rows()
            .into_iter()
            .map(|r| r[0].hypot(r[1]))
            .collect();
        let max_distance = distances.iter().copied().fold(0.0, f64::max);

        let rows = distances
            .iter()
            .enumerate()
            .map(|(j, &distance)| LoadingsRow {
                column: j,
                label: model.labels()[j].clone(),
                pc1: loadings[[j, 0]],
                pc2: loadings[[j, 1]],
                distance,
                class: PositionClass::classify(distance, max_distance, conserved, variable),
                positions: positions.column(j).iter().map(|p| p.map(|p| p + 1)).collect(),
            })
            .collect();

        Ok(Self {
            ids: positions.ids().to_vec(),
            max_distance,
            rows,
        })
    }

    pub fn with_class(&self, class: PositionClass) -> impl Iterator<Item = &LoadingsRow> + '_ {
        self.rows.iter().filter(move |r| r.class == class)
    }

    /// (保守, 可变, 其他) 位置个数
    pub fn class_counts(&self) -> (usize, usize, usize) {
        self.rows.iter().fold((0, 0, 0), |(c, v, o), r| match r.class {
            PositionClass::Conserved => (c + 1, v, o),
            PositionClass::Variable => (c, v + 1, o),
            PositionClass::Other => (c, v, o + 1),
        })
    }
}
