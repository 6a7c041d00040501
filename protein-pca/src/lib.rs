//! # protein-pca
//!
//! 蛋白质多序列比对的 rank 编码主成分分析，用于区分保守位置与可变位置。
//!
//! 流程：
//!
//! - **比对**：调用外部比对器（MAFFT / Clustal Omega）得到比对矩阵
//! - **rank 编码**：逐列统计氨基酸出现次数，按次数升序（并列时字母序靠后者优先）赋予 rank，gap 恒为 0
//! - **PCA**：对 rank 矩阵做主成分分析，得到序列得分与位置载荷
//! - **位置映射**：把比对列映射回各序列去 gap 后的原始位置，并按载荷距离划分保守 / 可变位置
//!
//! ## 快速示例
//!
//! ```rust
//! use protein_pca::io::fasta::FastaRecord;
//! use protein_pca::msa::AlignmentMatrix;
//! use protein_pca::position::PositionMap;
//! use protein_pca::rank::rank_alignment;
//!
//! let records = vec![
//!     FastaRecord::new("seq0", b"A-A".to_vec()),
//!     FastaRecord::new("seq1", b"AAB".to_vec()),
//! ];
//! let matrix = AlignmentMatrix::from_records(&records).unwrap();
//!
//! let table = rank_alignment(&matrix).unwrap();
//! assert_eq!(table.row(0).to_vec(), vec![1, 0, 2]);
//! assert_eq!(table.row(1).to_vec(), vec![1, 1, 1]);
//!
//! let positions = PositionMap::build(&matrix);
//! assert_eq!(positions.get(2, 0), Some(1));
//! ```
//!
//! ## 模块说明
//!
//! - [`util`]：24 符号蛋白质字母表编码
//! - [`io`]：FASTA 读写、CSV / TSV 表格、原子写入
//! - [`msa`]：比对矩阵、序列切片、外部比对器调用
//! - [`rank`]：出现次数统计、单列排名、整表 rank 编码
//! - [`position`]：比对列 ↔ 原始序列位置映射
//! - [`pca`]：主成分分析与载荷报告
//! - [`config`]：TOML 运行配置
//! - [`pipeline`]：各阶段编排

pub mod config;
pub mod error;
pub mod io;
pub mod msa;
pub mod pca;
pub mod pipeline;
pub mod position;
pub mod rank;
pub mod util;

pub use error::{PipelineError, Result};
