use crate::error::CorrelationError;
use crate::utils::Statistic;

/// Ranks starting at 1, ties get the average of the positions they span.
pub fn rank(values: &[f64]) -> Vec<f64> {
    let (sidx, sval) = values.argsort(true);
    let n = values.len();
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && sval[j + 1] == sval[i] {
            j += 1;
        }
        // positions i..=j (0-based) share rank mean(i+1..=j+1)
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &sidx[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }
    ranks
}

fn check_pair(x: &[f64], y: &[f64]) -> Result<(), CorrelationError> {
    if x.len() != y.len() {
        return Err(CorrelationError::LengthMismatch(x.len(), y.len()));
    }
    if x.len() < 2 {
        return Err(CorrelationError::TooFewObservations(x.len()));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(CorrelationError::NonFinite);
    }
    if x.distinct_count() < 2 || y.distinct_count() < 2 {
        return Err(CorrelationError::Constant);
    }
    Ok(())
}

fn pearson_unchecked(x: &[f64], y: &[f64]) -> f64 {
    let mx = x.mean();
    let my = y.mean();
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y.iter()) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Pearson product-moment correlation.
pub fn pearson(x: &[f64], y: &[f64]) -> Result<f64, CorrelationError> {
    check_pair(x, y)?;
    Ok(pearson_unchecked(x, y))
}

/// Spearman rank correlation: Pearson on average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> Result<f64, CorrelationError> {
    check_pair(x, y)?;
    let rho = pearson_unchecked(&rank(x), &rank(y));
    if rho.is_finite() {
        Ok(rho)
    } else {
        Err(CorrelationError::NonFinite)
    }
}

/// Arithmetic mean over the successful items only; failures are counted, not averaged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeanOfValid {
    sum: f64,
    pub used: usize,
    pub skipped: usize,
}

impl MeanOfValid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<E>(&mut self, item: Result<f64, E>) {
        match item {
            Ok(v) if v.is_finite() => {
                self.sum += v;
                self.used += 1;
            }
            _ => self.skipped += 1,
        }
    }

    /// NaN when every item failed
    pub fn mean(&self) -> f64 {
        if self.used == 0 {
            f64::NAN
        } else {
            self.sum / self.used as f64
        }
    }
}

impl<E> FromIterator<Result<f64, E>> for MeanOfValid {
    fn from_iter<I: IntoIterator<Item = Result<f64, E>>>(iter: I) -> Self {
        let mut acc = MeanOfValid::new();
        iter.into_iter().for_each(|item| acc.push(item));
        acc
    }
}
