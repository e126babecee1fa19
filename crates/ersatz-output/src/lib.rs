#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/ersatz-rs/ersatz/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod tables;

pub use tables::{
    PresenterError, Result, importance_table, outcome_comparison, predictor_comparison,
    weight_table,
};
