//! Classification scores.

use crate::schema::{PrecisionRecall, Scores};

/// Score predicted labels against true labels.
///
/// The confusion matrix is square with `max(num_classes, max label + 1)`
/// rows. Precision, recall and F-score are averaged over classes weighted
/// by support; a class whose ratio has a zero denominator scores 0.
pub fn score(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> Scores {
    let size = y_true
        .iter()
        .chain(y_pred)
        .max()
        .map_or(0, |m| m + 1)
        .max(num_classes);

    let mut matrix = vec![vec![0usize; size]; size];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        matrix[t][p] += 1;
    }

    let n = y_true.len().min(y_pred.len());
    let correct: usize = (0..size).map(|c| matrix[c][c]).sum();
    let accuracy = if n == 0 { 0.0 } else { correct as f64 / n as f64 };

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    let mut weighted = PrecisionRecall::default();
    let mut total_support = 0usize;
    for c in 0..size {
        let tp = matrix[c][c];
        let support: usize = matrix[c].iter().sum();
        let predicted: usize = matrix.iter().map(|row| row[c]).sum();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let fscore = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let w = support as f64;
        weighted.precision += precision * w;
        weighted.recall += recall * w;
        weighted.fscore += fscore * w;
        total_support += support;
    }
    if total_support > 0 {
        let total = total_support as f64;
        weighted.precision /= total;
        weighted.recall /= total;
        weighted.fscore /= total;
    }

    Scores {
        accuracy,
        confusion_matrix: Some(
            matrix
                .into_iter()
                .map(|row| row.into_iter().map(|v| v as f64).collect())
                .collect(),
        ),
        precision_recall_fscore_support: weighted,
    }
}

/// Mean of several score sets, e.g. over cross-validation folds.
///
/// Confusion matrices are averaged element-wise and rounded to one decimal;
/// the mean matrix is absent if any input lacks one. Returns `None` for an
/// empty slice.
pub fn mean_scores(scores: &[Scores]) -> Option<Scores> {
    if scores.is_empty() {
        return None;
    }
    let n = scores.len() as f64;

    let accuracy = scores.iter().map(|s| s.accuracy).sum::<f64>() / n;

    let mut prf = PrecisionRecall::default();
    for s in scores {
        let p = &s.precision_recall_fscore_support;
        prf.precision += p.precision;
        prf.recall += p.recall;
        prf.fscore += p.fscore;
    }
    prf.precision /= n;
    prf.recall /= n;
    prf.fscore /= n;

    let matrices: Option<Vec<&Vec<Vec<f64>>>> =
        scores.iter().map(|s| s.confusion_matrix.as_ref()).collect();
    let confusion_matrix = matrices.map(|matrices| {
        let size = matrices.iter().map(|m| m.len()).max().unwrap_or(0);

        let mut sum = vec![vec![0.0; size]; size];
        for matrix in matrices {
            for (i, row) in matrix.iter().enumerate() {
                for (j, v) in row.iter().enumerate() {
                    sum[i][j] += v;
                }
            }
        }
        sum.into_iter()
            .map(|row| row.into_iter().map(|v| (v / n * 10.0).round() / 10.0).collect())
            .collect()
    });

    Some(Scores {
        accuracy,
        confusion_matrix,
        precision_recall_fscore_support: prf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_perfect_prediction() {
        let y = [0, 1, 2, 1];
        let s = score(&y, &y, 3);
        assert_eq!(s.accuracy, 1.0);
        let prf = &s.precision_recall_fscore_support;
        assert!(approx(prf.precision, 1.0));
        assert!(approx(prf.recall, 1.0));
        assert!(approx(prf.fscore, 1.0));
        assert!(prf.support.is_none());
    }

    #[test]
    fn test_weighted_scores() {
        // class 0: tp=2 fn=1, class 1: tp=1 fp=1
        let y_true = [0, 0, 0, 1];
        let y_pred = [0, 0, 1, 1];
        let s = score(&y_true, &y_pred, 2);
        assert!(approx(s.accuracy, 0.75));
        assert_eq!(
            s.confusion_matrix,
            Some(vec![vec![2.0, 1.0], vec![0.0, 1.0]])
        );

        let prf = &s.precision_recall_fscore_support;
        // precision: (1.0 * 3 + 0.5 * 1) / 4
        assert!(approx(prf.precision, 0.875));
        // recall: (2/3 * 3 + 1.0 * 1) / 4
        assert!(approx(prf.recall, 0.75));
        // f1: (0.8 * 3 + 2/3 * 1) / 4
        assert!(approx(prf.fscore, (0.8 * 3.0 + 2.0 / 3.0) / 4.0));
    }

    #[test]
    fn test_matrix_grows_with_labels() {
        let s = score(&[0, 4], &[0, 0], 2);
        assert_eq!(s.confusion_matrix.unwrap().len(), 5);
    }

    #[test]
    fn test_empty_input() {
        let s = score(&[], &[], 2);
        assert_eq!(s.accuracy, 0.0);
        assert_eq!(s.precision_recall_fscore_support.fscore, 0.0);
    }

    #[test]
    fn test_mean_scores() {
        let a = score(&[0, 1], &[0, 1], 2);
        let b = score(&[0, 1], &[1, 1], 2);
        let mean = mean_scores(&[a, b]).unwrap();
        assert!(approx(mean.accuracy, 0.75));
        assert_eq!(
            mean.confusion_matrix,
            Some(vec![vec![0.5, 0.5], vec![0.0, 1.0]])
        );
        assert!(mean_scores(&[]).is_none());
    }

    #[test]
    fn test_mean_rounds_to_one_decimal() {
        let a = score(&[0, 0, 0], &[0, 0, 0], 1);
        let b = score(&[0], &[0], 1);
        let c = score(&[0], &[0], 1);
        // (3 + 1 + 1) / 3 = 1.666..
        let mean = mean_scores(&[a, b, c]).unwrap();
        assert_eq!(mean.confusion_matrix, Some(vec![vec![1.7]]));
    }
}
