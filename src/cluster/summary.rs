use super::ClusterAssignment;
use crate::{geo::great_circle_distance, preprocess::FeatureVector, transform::FlatRecord};
use chrono::{DateTime, Utc};
use std::fmt::{self, Display};

/**
 * The aggregate properties of the events assigned to one cluster.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSummary {
    /// The label of the cluster in the [ClusterAssignment].
    pub label: usize,
    /// The number of events in this cluster.
    pub count: usize,
    /// Average latitude of the events in the cluster.
    pub lat: f64,
    /// Average longitude of the events in the cluster.
    pub lon: f64,
    /// Total (sum) of the optical energy of the events in joules. Missing values are skipped.
    pub energy: f64,
    /// The distance in kilometers from the cluster center to the farthest event in the cluster.
    pub radius: f64,
    /// Time of the earliest event.
    pub first: DateTime<Utc>,
    /// Time of the latest event.
    pub last: DateTime<Utc>,
}

impl ClusterAssignment {
    /**
     * Describe each cluster in terms of the original records.
     *
     * #Arguments
     * records - the records that were preprocessed.
     * features - the feature vectors the assignment was fit with, which point back into records.
     *
     * #Returns
     * One summary per non-empty cluster, ordered by label.
     */
    pub fn summarize(
        &self,
        records: &[FlatRecord],
        features: &[FeatureVector],
    ) -> Vec<ClusterSummary> {
        let mut members: Vec<Vec<&FlatRecord>> = vec![vec![]; self.k()];

        for (fv, &label) in features.iter().zip(&self.labels) {
            if let Some(record) = records.get(fv.record) {
                members[label].push(record);
            }
        }

        members
            .into_iter()
            .enumerate()
            .filter_map(|(label, recs)| Self::summarize_one(label, &recs))
            .collect()
    }

    fn summarize_one(label: usize, recs: &[&FlatRecord]) -> Option<ClusterSummary> {
        let first = recs.iter().map(|r| r.timestamp).min()?;
        let last = recs.iter().map(|r| r.timestamp).max()?;

        let mut curr_clust = ClusterSummary {
            label,
            count: 0,
            lat: 0.0,
            lon: 0.0,
            energy: 0.0,
            radius: 0.0,
            first,
            last,
        };

        for rec in recs {
            curr_clust.lat += rec.latitude;
            curr_clust.lon += rec.longitude;
            if rec.intensity.is_finite() {
                curr_clust.energy += rec.intensity;
            }
            curr_clust.count += 1;
        }

        curr_clust.lat /= curr_clust.count as f64;
        curr_clust.lon /= curr_clust.count as f64;

        for rec in recs {
            let gs_distance =
                great_circle_distance(rec.latitude, rec.longitude, curr_clust.lat, curr_clust.lon);

            curr_clust.radius = curr_clust.radius.max(gs_distance);
        }

        Some(curr_clust)
    }
}

impl Display for ClusterSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            "{:>5} {:>8} {:>9.4} {:>10.4} {:>11.3e} {:>9.2} {} {}",
            self.label,
            self.count,
            self.lat,
            self.lon,
            self.energy,
            self.radius,
            self.first.format("%Y-%m-%d %H:%M:%S"),
            self.last.format("%H:%M:%S"),
        )
    }
}
