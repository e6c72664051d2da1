use crate::{mnist::Dataset, network::Parameters};
use itertools::Itertools;
use ndarray::{Array2, Axis};
use std::fmt;

// Index of the largest entry in every column. Ties go to the lowest index.
pub fn argmax_columns(matrix: &Array2<f64>) -> Vec<usize> {
    matrix
        .columns()
        .into_iter()
        .map(|column| {
            column
                .iter()
                .enumerate()
                .max_by(|(i, a), (j, b)| a.total_cmp(b).then(j.cmp(i)))
                .map(|(index, _)| index)
                .expect("every column should have at least one row")
        })
        .collect()
}

// Counts of (actual class, predicted class) pairs. Rows are actual classes, columns predicted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Array2<usize>,
}

impl ConfusionMatrix {
    pub fn new(actual: &[usize], predicted: &[usize], classes: usize) -> ConfusionMatrix {
        assert_eq!(actual.len(), predicted.len());
        let mut counts = Array2::zeros((classes, classes));
        for (&actual, &predicted) in actual.iter().zip(predicted) {
            counts[[actual, predicted]] += 1;
        }
        ConfusionMatrix { counts }
    }

    pub fn classes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn count(&self, actual: usize, predicted: usize) -> usize {
        self.counts[[actual, predicted]]
    }

    pub fn total(&self) -> usize {
        self.counts.sum()
    }

    pub fn correct(&self) -> usize {
        self.counts.diag().sum()
    }

    // How many examples of each class there are.
    pub fn actual_totals(&self) -> Vec<usize> {
        self.counts.sum_axis(Axis(1)).to_vec()
    }

    // How many times each class was predicted.
    pub fn predicted_totals(&self) -> Vec<usize> {
        self.counts.sum_axis(Axis(0)).to_vec()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.counts.iter().max().map_or(1, |max| max.to_string().len());
        let last = self.classes().saturating_sub(1);
        for (index, row) in self.counts.rows().into_iter().enumerate() {
            let open = if index == 0 { "[[" } else { " [" };
            let close = if index == last { "]]" } else { "]" };
            let cells = row.iter().map(|count| format!("{count:>width$}")).join(" ");
            writeln!(f, "{open}{cells}{close}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

// Per-class precision, recall and F1, plus accuracy and the unweighted and support-weighted averages
// over classes. A ratio with a zero denominator is reported as 0.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassScores>,
    pub accuracy: f64,
    pub macro_average: ClassScores,
    pub weighted_average: ClassScores,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

impl From<&ConfusionMatrix> for ClassificationReport {
    fn from(matrix: &ConfusionMatrix) -> ClassificationReport {
        let actual_totals = matrix.actual_totals();
        let predicted_totals = matrix.predicted_totals();
        let total = matrix.total();

        let classes = (0..matrix.classes())
            .map(|class| {
                let hits = matrix.count(class, class);
                let precision = ratio(hits, predicted_totals[class]);
                let recall = ratio(hits, actual_totals[class]);
                ClassScores {
                    precision,
                    recall,
                    f1: harmonic_mean(precision, recall),
                    support: actual_totals[class],
                }
            })
            .collect::<Vec<_>>();

        let average = |weight: &dyn Fn(&ClassScores) -> f64| {
            let weights = classes.iter().map(weight).sum::<f64>();
            let mean = |score: fn(&ClassScores) -> f64| {
                if weights == 0.0 {
                    0.0
                } else {
                    classes.iter().map(|c| weight(c) * score(c)).sum::<f64>() / weights
                }
            };
            ClassScores {
                precision: mean(|c| c.precision),
                recall: mean(|c| c.recall),
                f1: mean(|c| c.f1),
                support: total,
            }
        };

        ClassificationReport {
            accuracy: ratio(matrix.correct(), total),
            macro_average: average(&|_: &ClassScores| 1.0),
            weighted_average: average(&|c: &ClassScores| c.support as f64),
            classes,
        }
    }
}

fn write_scores(f: &mut fmt::Formatter<'_>, name: &str, scores: &ClassScores) -> fmt::Result {
    writeln!(
        f,
        "{name:>12}{:>11.2}{:>10.2}{:>10.2}{:>10}",
        scores.precision, scores.recall, scores.f1, scores.support
    )
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12}{:>11}{:>10}{:>10}{:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (class, scores) in self.classes.iter().enumerate() {
            write_scores(f, &class.to_string(), scores)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12}{:>11}{:>10}{:>10.2}{:>10}",
            "accuracy", "", "", self.accuracy, self.macro_average.support
        )?;
        write_scores(f, "macro avg", &self.macro_average)?;
        write_scores(f, "weighted avg", &self.weighted_average)
    }
}

// Classify every column of a dataset and tally the predictions against the one-hot labels.
pub fn evaluate(parameters: &Parameters, dataset: &Dataset) -> ConfusionMatrix {
    let predicted = argmax_columns(&parameters.forward(&dataset.images).a2);
    let actual = argmax_columns(&dataset.labels);
    ConfusionMatrix::new(&actual, &predicted, dataset.labels.nrows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn confusion_matrix_counts_pairs() {
        let matrix = ConfusionMatrix::new(&[0, 1, 0, 0], &[0, 1, 1, 0], 2);
        assert_eq!(matrix.count(0, 0), 2);
        assert_eq!(matrix.count(0, 1), 1);
        assert_eq!(matrix.count(1, 1), 1);
        assert_eq!(matrix.count(1, 0), 0);
        assert_eq!(matrix.total(), 4);
        assert_eq!(matrix.correct(), 3);
        assert_eq!(matrix.actual_totals(), vec![3, 1]);
        assert_eq!(matrix.predicted_totals(), vec![2, 2]);
    }

    #[test]
    fn confusion_matrix_display() {
        let matrix = ConfusionMatrix::new(&[0, 1, 0, 0, 2], &[0, 1, 1, 0, 2], 3);
        assert_eq!(matrix.to_string(), "[[2 1 0]\n [0 1 0]\n [0 0 1]]\n");
    }

    #[test]
    fn report_scores_each_class() {
        let matrix = ConfusionMatrix::new(&[0, 1, 0, 0], &[0, 1, 1, 0], 2);
        let report = ClassificationReport::from(&matrix);

        let zero = report.classes[0];
        assert!(close(zero.precision, 1.0));
        assert!(close(zero.recall, 2.0 / 3.0));
        assert!(close(zero.f1, 0.8));
        assert_eq!(zero.support, 3);

        let one = report.classes[1];
        assert!(close(one.precision, 0.5));
        assert!(close(one.recall, 1.0));
        assert!(close(one.f1, 2.0 / 3.0));
        assert_eq!(one.support, 1);

        assert!(close(report.accuracy, 0.75));
        assert!(close(report.macro_average.precision, 0.75));
        assert!(close(report.macro_average.recall, 5.0 / 6.0));
        assert!(close(report.weighted_average.recall, 0.75));
        assert!(close(report.weighted_average.f1, (3.0 * 0.8 + 2.0 / 3.0) / 4.0));
        assert_eq!(report.weighted_average.support, 4);
    }

    #[test]
    fn report_treats_missing_predictions_as_zero() {
        let matrix = ConfusionMatrix::new(&[0, 1, 1], &[0, 0, 0], 3);
        let report = ClassificationReport::from(&matrix);
        assert_eq!(report.classes[1].precision, 0.0);
        assert_eq!(report.classes[1].f1, 0.0);
        assert_eq!(report.classes[2].recall, 0.0);
        assert_eq!(report.classes[2].support, 0);
    }

    #[test]
    fn report_display_has_a_line_per_class() {
        let matrix = ConfusionMatrix::new(&[0, 1, 0, 0], &[0, 1, 1, 0], 2);
        let text = ClassificationReport::from(&matrix).to_string();
        let lines = text.lines().collect::<Vec<_>>();
        assert!(lines[0].contains("precision") && lines[0].ends_with("support"));
        assert_eq!(lines[2], "           0       1.00      0.67      0.80         3");
        assert_eq!(lines[3], "           1       0.50      1.00      0.67         1");
        assert!(lines[5].trim_start().starts_with("accuracy"));
        assert!(lines[7].trim_start().starts_with("weighted avg"));
    }

    #[test]
    fn argmax_picks_first_of_ties() {
        let scores = array![[0.1, 0.5, 0.3], [0.7, 0.5, 0.3], [0.2, 0.0, 0.4]];
        assert_eq!(argmax_columns(&scores), vec![1, 0, 2]);
    }

    #[test]
    fn evaluate_tallies_network_predictions() {
        // Zero weights with a bias favouring class 1 predict 1 for everything.
        let mut parameters = Parameters::zeros(2, 1, 2);
        parameters.b2 = array![[0.0], [1.0]];
        let dataset = Dataset {
            images: array![[0.1, 0.2, 0.3], [0.3, 0.2, 0.1]],
            labels: array![[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]],
        };
        let matrix = evaluate(&parameters, &dataset);
        assert_eq!(matrix.count(0, 1), 2);
        assert_eq!(matrix.count(1, 1), 1);
        assert_eq!(matrix.correct(), 1);
    }
}
