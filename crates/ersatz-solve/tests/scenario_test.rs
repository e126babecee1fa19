//! End-to-end solver scenarios.

use approx::assert_relative_eq;
use ersatz_solve::{SolverConfig, estimate, estimate_with_importance};
use ndarray::{Array2, array};

/// Treated predictors sit outside the hull of controls 1 and 2 on the first
/// predictor, and control 3 is the only unit close on both predictors. The
/// treated outcome history tracks control 3's almost exactly, so the outer
/// search should discover an importance vector under which the inner QP
/// concentrates essentially all weight on control 3.
#[test]
fn weight_concentrates_on_the_matching_control() {
    let xt = array![10.0, 20.0];
    // Columns: control 1 = [9, 19], control 2 = [8, 18], control 3 = [10, 20.5].
    let xc = Array2::from_shape_vec((2, 3), vec![9.0, 8.0, 10.0, 19.0, 18.0, 20.5]).unwrap();

    // Five pre-treatment periods; only control 3 resembles the treated path.
    let yt = array![5.0, 5.5, 6.0, 6.5, 7.0];
    let yc = Array2::from_shape_vec(
        (5, 3),
        vec![
            20.0, 1.0, 5.1, //
            19.0, 1.0, 5.4, //
            18.0, 1.0, 6.1, //
            17.0, 1.0, 6.4, //
            16.0, 1.0, 7.1, //
        ],
    )
    .unwrap();
    // Three post-treatment periods.
    let yc_after = Array2::from_shape_vec(
        (3, 3),
        vec![
            15.0, 1.0, 7.6, //
            14.0, 1.0, 8.1, //
            13.0, 1.0, 8.4, //
        ],
    )
    .unwrap();

    let s = estimate(
        xt.view(),
        xc.view(),
        yt.view(),
        yc.view(),
        yc_after.view(),
        &SolverConfig::default(),
    )
    .unwrap();

    assert!(
        s.weights[2] > 0.95,
        "expected weight near 1.0 on control 3, got {}",
        s.weights
    );
    assert!(s.weights[0] < 0.05 && s.weights[1] < 0.05);
    assert_relative_eq!(s.weights.sum(), 1.0, epsilon = 1e-4);
    // The counterfactual follows control 3's post-treatment path.
    for (got, want) in s.counterfactual.iter().zip([7.6, 8.1, 8.4]) {
        assert!((got - want).abs() < 0.5, "counterfactual {got} vs {want}");
    }
    // Residuals against control 3 are +/- 0.1, so the MSE lands near 0.01.
    assert!(s.loss < 0.05);
}

/// The inner QP result must be identical whether the importance vector came
/// out of the search or was supplied directly.
#[test]
fn bypass_agrees_with_search_at_the_same_importance() {
    let xt = array![10.0, 20.0];
    let xc = Array2::from_shape_vec((2, 3), vec![9.0, 8.0, 10.0, 19.0, 18.0, 20.5]).unwrap();
    let yt = array![5.0, 5.5, 6.0, 6.5, 7.0];
    let yc = Array2::from_shape_vec(
        (5, 3),
        vec![
            20.0, 1.0, 5.1, 19.0, 1.0, 5.4, 18.0, 1.0, 6.1, 17.0, 1.0, 6.4, 16.0, 1.0, 7.1,
        ],
    )
    .unwrap();
    let yc_after =
        Array2::from_shape_vec((3, 3), vec![15.0, 1.0, 7.6, 14.0, 1.0, 8.1, 13.0, 1.0, 8.4])
            .unwrap();

    let config = SolverConfig::default();
    let searched = estimate(xt.view(), xc.view(), yt.view(), yc.view(), yc_after.view(), &config)
        .unwrap();
    let replayed = estimate_with_importance(
        searched.importance.as_slice().unwrap(),
        xt.view(),
        xc.view(),
        yt.view(),
        yc.view(),
        yc_after.view(),
        &config,
    )
    .unwrap();

    for (a, b) in searched.weights.iter().zip(replayed.weights.iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
    assert_relative_eq!(searched.loss, replayed.loss, epsilon = 1e-9);
}
