#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/ersatz-rs/ersatz/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod estimator;

// Re-export the sub-crates under stable module names
pub use ersatz_output as output;
pub use ersatz_panel as panel;
pub use ersatz_solve as solve;

pub use estimator::{Estimate, EstimatorError, Result, SyntheticControl};
pub use ersatz_panel::PanelSpec;
pub use ersatz_solve::SolverConfig;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
