/*!
 * Types and functions for partitioning events into clusters.
 *
 * A [ClusterAssignment] is the result of running k-means over normalized feature vectors, and a
 * [ClusterSummary] describes the aggregate properties of the events that ended up together.
 */

pub use kmeans::{ClusterAssignment, KMeans};
pub use summary::ClusterSummary;

mod kmeans;
mod summary;

/// Squared Euclidean distance.
pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
