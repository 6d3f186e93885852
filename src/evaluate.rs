/*!
 * Choose the number of clusters by fitting several and scoring each.
 */

use crate::{
    cluster::KMeans,
    preprocess::FeatureVector,
    SatFlashError, SatFlashResult,
};
use crossbeam_channel::{bounded, unbounded};
use log::{debug, info, warn};
use rand::{rngs::StdRng, seq::index, SeedableRng};
use std::{
    fmt::{self, Display},
    thread,
};

/// Fits k-means for a range of k and scores each fit.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    pub kmeans: KMeans,
    /// Compute silhouettes over a seeded random sample of at most this many points instead of
    /// over all of them.
    pub silhouette_sample: Option<usize>,
    /// Number of k values fit at the same time.
    pub threads: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator {
            kmeans: KMeans::default(),
            silhouette_sample: None,
            threads: num_cpus::get(),
        }
    }
}

/// Scores for one value of k.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KScore {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// One entry per distinct candidate, ordered by k.
    pub scores: Vec<KScore>,
    /// The k with the highest silhouette, the smaller k on a tie.
    pub silhouette_k: usize,
    /// The k where the inertia curve bends the most, if there were at least three candidates.
    pub elbow_k: Option<usize>,
}

impl EvaluationResult {
    /// The k to use.
    pub fn recommended_k(&self) -> usize {
        self.silhouette_k
    }

    /// Do the silhouette and the elbow of the inertia curve point at the same k?
    pub fn signals_agree(&self) -> bool {
        self.elbow_k == Some(self.silhouette_k)
    }

    pub fn score(&self, k: usize) -> Option<&KScore> {
        self.scores.iter().find(|s| s.k == k)
    }
}

impl Evaluator {
    /// Fit and score every k in `k_range`.
    ///
    /// The candidates are sorted and duplicates removed, there must be at least two left and each
    /// must satisfy `2 <= k < features.len()`.
    pub fn evaluate(
        &self,
        features: &[FeatureVector],
        k_range: &[usize],
    ) -> SatFlashResult<EvaluationResult> {
        let mut ks = k_range.to_vec();
        ks.sort_unstable();
        ks.dedup();

        if ks.len() < 2 {
            return Err(SatFlashError::EmptyKRange(ks.len()));
        }

        let n = features.len();
        if let Some(&k) = ks.iter().find(|&&k| k < 2 || k >= n) {
            return Err(SatFlashError::InvalidK { k, points: n });
        }

        let sample = self.sample_indexes(n);
        let scores = self.score_all(features, &ks, sample.as_deref())?;

        let silhouette_k = best_silhouette(&scores);
        let elbow_k = elbow(&scores);

        let result = EvaluationResult {
            scores,
            silhouette_k,
            elbow_k,
        };

        info!(
            "evaluated k in {:?}: silhouette picks {}, elbow picks {:?}",
            ks, result.silhouette_k, result.elbow_k
        );
        if !result.signals_agree() {
            warn!("silhouette and elbow disagree, using k = {}", result.recommended_k());
        }

        Ok(result)
    }

    fn sample_indexes(&self, n: usize) -> Option<Vec<usize>> {
        let size = self.silhouette_sample?;
        if size >= n {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(self.kmeans.seed);
        let mut idxs = index::sample(&mut rng, n, size).into_vec();
        idxs.sort_unstable();
        Some(idxs)
    }

    fn score_one(
        &self,
        features: &[FeatureVector],
        k: usize,
        sample: Option<&[usize]>,
    ) -> SatFlashResult<KScore> {
        let fit = self.kmeans.fit(features, k)?;

        let silhouette = match sample {
            Some(idxs) => {
                let points: Vec<&[f64]> = idxs
                    .iter()
                    .map(|&i| features[i].values.as_slice())
                    .collect();
                let labels: Vec<usize> = idxs.iter().map(|&i| fit.labels[i]).collect();
                silhouette(&points, &labels, k)
            }
            None => {
                let points: Vec<&[f64]> = features.iter().map(|f| f.values.as_slice()).collect();
                silhouette(&points, &fit.labels, k)
            }
        };

        debug!("k = {}: inertia {:.4}, silhouette {:.4}", k, fit.inertia, silhouette);

        Ok(KScore {
            k,
            inertia: fit.inertia,
            silhouette,
        })
    }

    fn score_all(
        &self,
        features: &[FeatureVector],
        ks: &[usize],
        sample: Option<&[usize]>,
    ) -> SatFlashResult<Vec<KScore>> {
        let num_ks = ks.len();
        let num_workers = self.threads.min(num_ks).max(1);

        let (to_workers, from_main) = bounded::<(usize, usize)>(num_ks);
        let (to_main, from_workers) = unbounded::<(usize, SatFlashResult<KScore>)>();

        for (index, &k) in ks.iter().enumerate() {
            // Capacity matches the number of candidates, this never blocks.
            let _ = to_workers.send((index, k));
        }
        drop(to_workers);

        let mut slots: Vec<Option<SatFlashResult<KScore>>> = (0..num_ks).map(|_| None).collect();

        thread::scope(|scope| {
            for i in 0..num_workers {
                let from_main = from_main.clone();
                let to_main = to_main.clone();

                let spawned = thread::Builder::new()
                    .name(format!("satflash-kmeans-{}", i))
                    .spawn_scoped(scope, move || {
                        for (index, k) in from_main {
                            let res = self.score_one(features, k, sample);
                            if to_main.send((index, res)).is_err() {
                                break;
                            }
                        }
                    });

                if let Err(err) = spawned {
                    warn!("unable to start clustering thread: {}", err);
                }
            }
            drop(to_main);

            for (index, res) in from_workers.iter() {
                slots[index] = Some(res);
            }
        });

        for (index, k) in from_main.try_iter() {
            slots[index] = Some(self.score_one(features, k, sample));
        }

        slots
            .into_iter()
            .zip(ks)
            .map(|(slot, &k)| {
                slot.unwrap_or(Err(SatFlashError::InvalidK {
                    k,
                    points: features.len(),
                }))
            })
            .collect()
    }
}

/// Mean silhouette coefficient of a labelled set of points.
///
/// For each point `a` is its mean distance to the other members of its cluster and `b` the
/// smallest mean distance to the members of another cluster. The point scores
/// `(b - a) / max(a, b)`, or 0 if it is alone in its cluster or `max(a, b)` is 0.
pub fn silhouette(points: &[&[f64]], labels: &[usize], k: usize) -> f64 {
    let n = points.len().min(labels.len());
    if n == 0 {
        return 0.0;
    }

    let mut counts = vec![0usize; k];
    for &label in &labels[..n] {
        counts[label] += 1;
    }

    let mut sums = vec![0.0; k];
    let mut total = 0.0;

    for i in 0..n {
        let own = labels[i];
        if counts[own] < 2 {
            continue;
        }

        sums.iter_mut().for_each(|s| *s = 0.0);
        for j in 0..n {
            if i != j {
                sums[labels[j]] += distance(points[i], points[j]);
            }
        }

        let a = sums[own] / (counts[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && counts[c] > 0)
            .map(|c| sums[c] / counts[c] as f64)
            .fold(f64::INFINITY, f64::min);

        if !b.is_finite() {
            continue;
        }

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    total / n as f64
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    crate::cluster::squared_distance(a, b).sqrt()
}

fn best_silhouette(scores: &[KScore]) -> usize {
    let mut best = scores[0];
    for score in &scores[1..] {
        if score.silhouette > best.silhouette {
            best = *score;
        }
    }
    best.k
}

/// The interior k where the slope of the inertia curve changes the most, with each slope taken
/// per unit of k so uneven candidate spacing doesn't skew it.
fn elbow(scores: &[KScore]) -> Option<usize> {
    if scores.len() < 3 {
        return None;
    }

    let slope = |a: &KScore, b: &KScore| (b.inertia - a.inertia) / (b.k - a.k) as f64;

    let mut best: Option<(usize, f64)> = None;
    for w in scores.windows(3) {
        let bend = slope(&w[1], &w[2]) - slope(&w[0], &w[1]);
        if best.map(|(_, b)| bend > b).unwrap_or(true) {
            best = Some((w[1].k, bend));
        }
    }

    best.map(|(k, _)| k)
}

impl Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        writeln!(f, "{:>5} {:>14} {:>11}", "k", "inertia", "silhouette")?;
        for score in &self.scores {
            let mut marks = String::new();
            if score.k == self.silhouette_k {
                marks.push_str(" <- silhouette");
            }
            if Some(score.k) == self.elbow_k {
                marks.push_str(" <- elbow");
            }

            writeln!(
                f,
                "{:>5} {:>14.4} {:>11.4}{}",
                score.k, score.inertia, score.silhouette, marks
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_of_blobs(num_blobs: usize, per: usize) -> Vec<FeatureVector> {
        let mut out = vec![];
        for b in 0..num_blobs {
            for i in 0..per {
                out.push(FeatureVector {
                    record: out.len(),
                    values: vec![10.0 * b as f64 + 0.01 * (i % 4) as f64, 0.01 * (i / 4) as f64],
                });
            }
        }
        out
    }

    fn score(k: usize, inertia: f64, silhouette: f64) -> KScore {
        KScore {
            k,
            inertia,
            silhouette,
        }
    }

    #[test]
    fn k_range_needs_two_distinct_values() {
        let features = line_of_blobs(3, 8);
        let ev = Evaluator::default();

        assert_eq!(ev.evaluate(&features, &[]), Err(SatFlashError::EmptyKRange(0)));
        assert_eq!(ev.evaluate(&features, &[3, 3, 3]), Err(SatFlashError::EmptyKRange(1)));
        assert_eq!(
            ev.evaluate(&features, &[2, 24]),
            Err(SatFlashError::InvalidK { k: 24, points: 24 })
        );
    }

    #[test]
    fn finds_the_number_of_blobs() {
        let features = line_of_blobs(4, 12);
        let ev = Evaluator {
            threads: 2,
            ..Evaluator::default()
        };

        let res = ev.evaluate(&features, &[6, 2, 3, 4, 5, 3]).unwrap();
        let ks: Vec<_> = res.scores.iter().map(|s| s.k).collect();
        assert_eq!(ks, vec![2, 3, 4, 5, 6]);

        assert_eq!(res.recommended_k(), 4);
        assert_eq!(res.elbow_k, Some(4));
        assert!(res.signals_agree());

        for s in &res.scores {
            assert!((-1.0..=1.0).contains(&s.silhouette));
            assert!(s.inertia >= 0.0);
        }
        assert!(res.to_string().contains("<- silhouette <- elbow"));
    }

    #[test]
    fn sampled_silhouette_is_reproducible() {
        let features = line_of_blobs(3, 30);
        let ev = Evaluator {
            silhouette_sample: Some(25),
            ..Evaluator::default()
        };

        let a = ev.evaluate(&features, &[2, 3, 4]).unwrap();
        let b = ev.evaluate(&features, &[2, 3, 4]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.recommended_k(), 3);
    }

    #[test]
    fn silhouette_edge_cases() {
        let p = [[0.0], [0.0], [1.0], [1.0]];
        let points: Vec<&[f64]> = p.iter().map(|v| v.as_slice()).collect();

        // Tight, separated pairs.
        assert_eq!(silhouette(&points, &[0, 0, 1, 1], 2), 1.0);
        // Singletons score zero, the pair at 0 scores 1 for both members.
        assert_eq!(silhouette(&points[1..], &[0, 1, 2], 3), 0.0);
        assert_eq!(silhouette(&points, &[0, 0, 1, 2], 3), 0.5);
        // Everything at the same spot.
        let same: Vec<&[f64]> = vec![&[0.0], &[0.0], &[0.0]];
        assert_eq!(silhouette(&same, &[0, 0, 1], 2), 0.0);
    }

    #[test]
    fn ties_prefer_the_smaller_k() {
        let scores = vec![score(2, 10.0, 0.5), score(3, 5.0, 0.7), score(4, 4.0, 0.7)];
        assert_eq!(best_silhouette(&scores), 3);
    }

    #[test]
    fn elbow_accounts_for_spacing() {
        // Slopes: -10 per k from 2 to 4, then -1 per k from 4 to 8, then -1 per k to 10.
        let scores = vec![
            score(2, 40.0, 0.0),
            score(4, 20.0, 0.0),
            score(8, 16.0, 0.0),
            score(10, 14.0, 0.0),
        ];
        assert_eq!(elbow(&scores), Some(4));
        assert_eq!(elbow(&scores[..2]), None);
    }
}
