#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/ersatz-rs/ersatz/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod error;
pub mod matrices;

pub use builder::{PanelSpec, build_matrices};
pub use error::{PanelError, Result};
pub use matrices::PanelMatrices;
