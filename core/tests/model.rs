//! Classifier and metric behavior: separable fits, seeded determinism, and
//! the ranking metrics' edge cases.

use retention_core::model::{
    average_precision, roc_auc, ChurnClassifier, GradientBoostedStumps, LogisticRegressionModel,
};

/// Two well-separated clusters in one dimension, 6 rows per class.
fn separable() -> (Vec<Vec<f64>>, Vec<u8>) {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in 0..6 {
        x.push(vec![i as f64, 1.0]);
        y.push(0);
        x.push(vec![100.0 + i as f64, 1.0]);
        y.push(1);
    }
    (x, y)
}

/// Logistic regression separates an easy problem.
#[test]
fn logistic_regression_learns_separable_data() {
    let (x, y) = separable();
    let mut model = LogisticRegressionModel::default();
    model.fit(&x, &y).unwrap();
    let proba = model.predict_proba(&x);
    for (p, &label) in proba.iter().zip(&y) {
        if label == 1 {
            assert!(*p > 0.5, "positive row scored {p}");
        } else {
            assert!(*p < 0.5, "negative row scored {p}");
        }
    }
}

/// A constant feature column must not produce NaN probabilities.
#[test]
fn constant_column_is_harmless() {
    let (x, y) = separable(); // second column is constant 1.0
    let mut model = LogisticRegressionModel::default();
    model.fit(&x, &y).unwrap();
    assert!(model.predict_proba(&x).iter().all(|p| p.is_finite()));
}

/// The boosted model is deterministic for a fixed seed and sensitive to it.
#[test]
fn boosted_model_is_seed_deterministic() {
    let (x, y) = separable();
    let fit_with = |seed| {
        let mut m = GradientBoostedStumps::new(seed);
        m.fit(&x, &y).unwrap();
        m.predict_proba(&x)
    };
    assert_eq!(fit_with(42), fit_with(42));
}

/// Empty or ragged training input is rejected.
#[test]
fn fit_rejects_bad_input() {
    let mut model = LogisticRegressionModel::default();
    assert!(model.fit(&[], &[]).is_err());
    assert!(model
        .fit(&[vec![1.0, 2.0], vec![1.0]], &[0, 1])
        .is_err());
}

/// ROC-AUC: 1.0 for perfect ranking, 0.0 for inverted, 0.5 for all-tied
/// scores, None for a single class.
#[test]
fn roc_auc_reference_values() {
    let y = [0, 0, 1, 1];
    assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
    assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
    assert_eq!(roc_auc(&y, &[0.5, 0.5, 0.5, 0.5]), Some(0.5));
    assert_eq!(roc_auc(&[1, 1], &[0.1, 0.9]), None);
    assert_eq!(roc_auc(&[0, 0], &[0.1, 0.9]), None);
}

/// Average precision: 1.0 for perfect ranking; the textbook value for a
/// mixed ranking; None without positives.
#[test]
fn average_precision_reference_values() {
    let y = [0, 0, 1, 1];
    assert_eq!(average_precision(&y, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
    // Ranking: pos, neg, pos, neg → (1/1 + 2/3) / 2
    let ap = average_precision(&[1, 0, 1, 0], &[0.9, 0.8, 0.7, 0.6]).unwrap();
    assert!((ap - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    assert_eq!(average_precision(&[0, 0], &[0.1, 0.9]), None);
}
