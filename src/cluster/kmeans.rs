use super::squared_distance;
use crate::{preprocess::FeatureVector, SatFlashError, SatFlashResult};
use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Lloyd's k-means with k-means++ initialization and several restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeans {
    /// Upper limit on assign/update rounds in a single run.
    pub max_iterations: usize,
    /// Number of independently seeded runs, the one with the lowest inertia is kept.
    pub n_init: usize,
    /// Run `i` is seeded with `seed + i`.
    pub seed: u64,
}

impl Default for KMeans {
    fn default() -> Self {
        KMeans {
            max_iterations: 100,
            n_init: 10,
            seed: 60,
        }
    }
}

/// The outcome of [KMeans::fit].
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    /// Cluster of each feature vector, in the order they were given. Every value in `0..k` is used.
    pub labels: Vec<usize>,
    /// Cluster centers in normalized feature space.
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances from each point to its centroid.
    pub inertia: f64,
    /// Assign/update rounds used by the winning run.
    pub iterations: usize,
    /// How many times the winning run had to refill an empty cluster.
    pub reseeds: usize,
}

impl ClusterAssignment {
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Number of points in each cluster.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k()];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    /// The cluster whose centroid is nearest to a normalized point, ties go to the lower label.
    pub fn predict(&self, values: &[f64]) -> usize {
        nearest(values, &self.centroids)
    }
}

impl KMeans {
    /// Partition the feature vectors into `k` clusters.
    ///
    /// Requires `2 <= k < features.len()`. The result is a pure function of the inputs and the
    /// settings in `self`.
    pub fn fit(&self, features: &[FeatureVector], k: usize) -> SatFlashResult<ClusterAssignment> {
        let n = features.len();
        if k < 2 || k >= n {
            return Err(SatFlashError::InvalidK { k, points: n });
        }

        let points: Vec<&[f64]> = features.iter().map(|f| f.values.as_slice()).collect();

        let mut best = self.run(&points, k, 0);
        for run in 1..self.n_init {
            let candidate = self.run(&points, k, run);
            if candidate.inertia < best.inertia {
                best = candidate;
            }
        }

        debug!(
            "k = {}: inertia {:.4} after {} iterations, {} reseeds",
            k, best.inertia, best.iterations, best.reseeds
        );

        Ok(best)
    }

    fn run(&self, points: &[&[f64]], k: usize, run: usize) -> ClusterAssignment {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(run as u64));
        let mut centroids = plus_plus(points, k, &mut rng);

        let mut labels = vec![usize::MAX; points.len()];
        let mut iterations = 0;
        let mut reseeds = 0;

        while iterations < self.max_iterations.max(1) {
            iterations += 1;

            let changed = assign(points, &centroids, &mut labels);
            let refilled = fill_empty_clusters(points, &mut centroids, &mut labels);
            reseeds += refilled;
            update_centroids(points, &labels, &mut centroids);

            if !changed && refilled == 0 {
                break;
            }
        }

        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(p, &label)| squared_distance(p, &centroids[label]))
            .sum();

        ClusterAssignment {
            labels,
            centroids,
            inertia,
            iterations,
            reseeds,
        }
    }
}

/// k-means++: the first center is uniform, each further one is drawn with probability
/// proportional to its squared distance from the nearest center chosen so far.
fn plus_plus(points: &[&[f64]], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..n)].to_vec());

    let mut dist: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = dist.iter().sum();

        let next = if total > 0.0 && total.is_finite() {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = None;
            let mut last_candidate = 0;

            for (i, &d) in dist.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                last_candidate = i;
                if target < d {
                    chosen = Some(i);
                    break;
                }
                target -= d;
            }

            chosen.unwrap_or(last_candidate)
        } else {
            // Every point sits on a center already.
            rng.gen_range(0..n)
        };

        let center = points[next].to_vec();
        for (d, p) in dist.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &center));
        }
        centroids.push(center);
    }

    centroids
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;

    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(point, centroid);
        if d < best_dist {
            best = c;
            best_dist = d;
        }
    }

    best
}

/// Returns whether any label changed.
fn assign(points: &[&[f64]], centroids: &[Vec<f64>], labels: &mut [usize]) -> bool {
    let mut changed = false;
    for (p, label) in points.iter().zip(labels.iter_mut()) {
        let c = nearest(p, centroids);
        if *label != c {
            *label = c;
            changed = true;
        }
    }
    changed
}

/// Give every empty cluster the point that is farthest from its own centroid, taken from a
/// cluster with at least two members. Returns the number of clusters refilled.
fn fill_empty_clusters(
    points: &[&[f64]],
    centroids: &mut [Vec<f64>],
    labels: &mut [usize],
) -> usize {
    let mut counts = vec![0usize; centroids.len()];
    for &label in labels.iter() {
        counts[label] += 1;
    }

    let mut refilled = 0;
    for empty in 0..centroids.len() {
        if counts[empty] > 0 {
            continue;
        }

        let mut donor: Option<(usize, f64)> = None;
        for (i, p) in points.iter().enumerate() {
            let label = labels[i];
            if counts[label] < 2 {
                continue;
            }

            let d = squared_distance(p, &centroids[label]);
            if donor.map(|(_, best)| d > best).unwrap_or(true) {
                donor = Some((i, d));
            }
        }

        let (i, _) = match donor {
            Some(donor) => donor,
            None => break,
        };

        counts[labels[i]] -= 1;
        counts[empty] = 1;
        labels[i] = empty;
        centroids[empty] = points[i].to_vec();
        refilled += 1;
    }

    refilled
}

fn update_centroids(points: &[&[f64]], labels: &[usize], centroids: &mut [Vec<f64>]) {
    let mut counts = vec![0usize; centroids.len()];
    let mut sums: Vec<Vec<f64>> = centroids.iter().map(|c| vec![0.0; c.len()]).collect();

    for (p, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(p.iter()) {
            *s += v;
        }
    }

    for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
        if count > 0 {
            *centroid = sum.into_iter().map(|s| s / count as f64).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(values: Vec<f64>) -> FeatureVector {
        FeatureVector { record: 0, values }
    }

    /// `per` points around each center, spread much less than the distance between centers.
    fn blobs(centers: &[(f64, f64)], per: usize) -> Vec<FeatureVector> {
        let mut out = vec![];
        for &(x, y) in centers {
            for i in 0..per {
                let dx = (i % 5) as f64 * 0.01 - 0.02;
                let dy = (i / 5 % 5) as f64 * 0.01 - 0.02;
                out.push(fv(vec![x + dx, y + dy]));
            }
        }
        out
    }

    fn distinct(labels: &[usize]) -> usize {
        let mut seen = labels.to_vec();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    #[test]
    fn k_must_be_between_two_and_the_number_of_points() {
        let points = blobs(&[(0.0, 0.0)], 5);
        let km = KMeans::default();

        for k in [0, 1, 5, 6] {
            assert_eq!(
                km.fit(&points, k),
                Err(SatFlashError::InvalidK { k, points: 5 })
            );
        }
        assert!(km.fit(&points, 4).is_ok());
    }

    #[test]
    fn separated_blobs_are_recovered() {
        let points = blobs(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)], 20);
        let fit = KMeans::default().fit(&points, 3).unwrap();

        assert_eq!(fit.labels.len(), 60);
        assert_eq!(fit.sizes(), vec![20, 20, 20]);
        for blob in fit.labels.chunks(20) {
            assert!(blob.iter().all(|&l| l == blob[0]));
        }
        assert!(fit.inertia < 1.0);
        assert_eq!(fit.predict(&[9.9, 0.1]), fit.labels[20]);
    }

    #[test]
    fn fits_are_reproducible() {
        let points = blobs(&[(0.0, 0.0), (3.0, 1.0), (1.0, 4.0), (5.0, 5.0)], 13);
        let km = KMeans::default();

        assert_eq!(km.fit(&points, 4).unwrap(), km.fit(&points, 4).unwrap());
    }

    #[test]
    fn duplicate_points_still_use_every_label() {
        // Two distinct locations but four clusters, some runs must start with stacked centers.
        let mut points: Vec<_> = (0..6).map(|_| fv(vec![0.0, 0.0])).collect();
        points.extend((0..6).map(|_| fv(vec![1.0, 1.0])));

        let km = KMeans {
            n_init: 3,
            ..KMeans::default()
        };

        for k in 2..points.len() {
            let fit = km.fit(&points, k).unwrap();
            assert_eq!(distinct(&fit.labels), k, "k = {}", k);
            assert!(fit.sizes().iter().all(|&s| s > 0));
            assert!(fit.inertia >= 0.0);
        }
    }

    #[test]
    fn ties_go_to_the_lowest_centroid() {
        let centroids = vec![vec![-1.0, 0.0], vec![1.0, 0.0]];
        assert_eq!(nearest(&[0.0, 5.0], &centroids), 0);
    }

    #[test]
    fn empty_cluster_takes_the_farthest_point() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        let c = [5.0, 0.0];
        let points: Vec<&[f64]> = vec![&a, &b, &c];

        let mut centroids = vec![vec![0.0, 0.0], vec![100.0, 0.0]];
        let mut labels = vec![0, 0, 0];

        assert_eq!(fill_empty_clusters(&points, &mut centroids, &mut labels), 1);
        assert_eq!(labels, vec![0, 0, 1]);
        assert_eq!(centroids[1], vec![5.0, 0.0]);
    }
}
