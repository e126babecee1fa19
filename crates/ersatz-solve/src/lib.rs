#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/ersatz-rs/ersatz/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod qp;
pub mod search;
mod simplex;

pub use config::SolverConfig;
pub use error::{Result, SolverError};
pub use qp::solve_weights;
pub use search::{Solution, estimate, estimate_with_importance};
