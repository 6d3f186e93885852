/*!
 * Turn stored records into normalized feature vectors for clustering.
 */

use crate::transform::FlatRecord;
use log::{info, warn};

/// Which optional features to use. Latitude and longitude are always included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSelection {
    /// Include the event optical energy.
    pub intensity: bool,
    /// Include the event time, as seconds since the Unix epoch.
    pub time: bool,
}

impl FeatureSelection {
    /// The names of the selected features, in the order they appear in a [FeatureVector].
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = vec!["latitude", "longitude"];
        if self.intensity {
            names.push("intensity");
        }
        if self.time {
            names.push("time");
        }
        names
    }

    fn raw_values(&self, record: &FlatRecord) -> Vec<f64> {
        let mut vals = vec![record.latitude, record.longitude];
        if self.intensity {
            vals.push(record.intensity);
        }
        if self.time {
            vals.push(record.timestamp.timestamp_micros() as f64 / 1.0e6);
        }
        vals
    }
}

/// Normalized features of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Index of the record this came from in the slice given to [preprocess].
    pub record: usize,
    pub values: Vec<f64>,
}

/// The per feature shift and scale used to normalize, so new records can be put on the same
/// footing as the ones the model was fit with.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationParams {
    selection: FeatureSelection,
    pub names: Vec<&'static str>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl NormalizationParams {
    /// Normalize a record that may not have been part of the fit.
    ///
    /// Returns `None` if any of its raw features are not finite. The `record` index of the
    /// returned vector is 0.
    pub fn apply(&self, record: &FlatRecord) -> Option<FeatureVector> {
        let raw = self.selection.raw_values(record);
        if raw.iter().any(|v| !v.is_finite()) {
            return None;
        }

        Some(FeatureVector {
            record: 0,
            values: self.normalize(&raw),
        })
    }

    /// Undo the normalization of a point in feature space, e.g. a centroid.
    pub fn denormalize(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (mean, scale))| v * scale + mean)
            .collect()
    }

    fn normalize(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (mean, scale))| (v - mean) / scale)
            .collect()
    }
}

/// The output of [preprocess].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub features: Vec<FeatureVector>,
    pub params: NormalizationParams,
    /// Records left out because a selected feature was NaN or infinite.
    pub dropped: usize,
}

/// Select and normalize features.
///
/// Every kept feature is shifted to zero mean and divided by its population standard deviation,
/// both computed once over the kept records. A feature that doesn't vary is only shifted.
pub fn preprocess(records: &[FlatRecord], selection: FeatureSelection) -> Preprocessed {
    let names = selection.names();
    let dims = names.len();

    let mut kept: Vec<(usize, Vec<f64>)> = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let raw = selection.raw_values(record);
        if raw.iter().all(|v| v.is_finite()) {
            kept.push((idx, raw));
        }
    }

    let dropped = records.len() - kept.len();
    if dropped > 0 {
        warn!("dropped {} records with non-finite features", dropped);
    }

    let mut means = vec![0.0; dims];
    let mut scales = vec![1.0; dims];

    if !kept.is_empty() {
        let n = kept.len() as f64;

        for (_, raw) in &kept {
            for (mean, v) in means.iter_mut().zip(raw) {
                *mean += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut variances = vec![0.0; dims];
        for (_, raw) in &kept {
            for ((var, v), mean) in variances.iter_mut().zip(raw).zip(&means) {
                *var += (v - mean) * (v - mean);
            }
        }

        for (scale, var) in scales.iter_mut().zip(variances) {
            let std = (var / n).sqrt();
            *scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };
        }
    }

    let params = NormalizationParams {
        selection,
        names,
        means,
        scales,
    };

    let features: Vec<FeatureVector> = kept
        .into_iter()
        .map(|(record, raw)| FeatureVector {
            record,
            values: params.normalize(&raw),
        })
        .collect();

    info!(
        "preprocessed {} records into {} feature vectors of {:?}",
        records.len(),
        features.len(),
        params.names
    );

    Preprocessed {
        features,
        params,
        dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(event_id: i64, lat: f64, lon: f64, energy: f64) -> FlatRecord {
        let t = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(event_id);
        FlatRecord {
            source_file: "f".to_owned(),
            event_id,
            group_id: 0,
            flash_id: 0,
            timestamp: t,
            group_time: t,
            flash_time: t,
            latitude: lat,
            longitude: lon,
            intensity: energy,
        }
    }

    #[test]
    fn non_finite_records_are_dropped_and_counted() {
        let records = vec![
            record(0, 30.0, -95.0, 1.0),
            record(1, f64::NAN, -95.0, 1.0),
            record(2, 31.0, f64::INFINITY, 1.0),
            record(3, 32.0, -96.0, f64::NAN),
        ];

        let out = preprocess(&records, FeatureSelection::default());
        assert_eq!(out.dropped, 2);
        assert_eq!(out.features.len(), 2);
        assert_eq!(out.features[1].record, 3);

        let with_energy = FeatureSelection {
            intensity: true,
            time: false,
        };
        let out = preprocess(&records, with_energy);
        assert_eq!(out.dropped, 3);
        assert_eq!(out.params.names, vec!["latitude", "longitude", "intensity"]);
    }

    #[test]
    fn normalized_features_are_centered_with_unit_spread() {
        let records: Vec<_> = (0..20)
            .map(|i| record(i, 25.0 + i as f64, -100.0 + 0.5 * i as f64, 1.0))
            .collect();

        let selection = FeatureSelection {
            intensity: true,
            time: true,
        };
        let out = preprocess(&records, selection);
        assert_eq!(out.dropped, 0);

        for dim in 0..4 {
            let n = out.features.len() as f64;
            let mean: f64 = out.features.iter().map(|f| f.values[dim]).sum::<f64>() / n;
            assert!(mean.abs() < 1.0e-6, "dim {} mean {}", dim, mean);
        }

        // Constant intensity only gets shifted.
        assert_eq!(out.params.scales[2], 1.0);
        assert!(out.features.iter().all(|f| f.values[2] == 0.0));

        let var: f64 = out.features.iter().map(|f| f.values[0] * f.values[0]).sum::<f64>()
            / out.features.len() as f64;
        assert!((var - 1.0).abs() < 1.0e-9);
    }

    #[test]
    fn params_apply_to_new_records() {
        let records = vec![record(0, 10.0, 0.0, 1.0), record(1, 20.0, 10.0, 1.0)];
        let out = preprocess(&records, FeatureSelection::default());

        let fv = out.params.apply(&record(9, 15.0, 5.0, 1.0)).unwrap();
        assert_eq!(fv.values, vec![0.0, 0.0]);
        assert_eq!(out.params.denormalize(&out.features[0].values), vec![10.0, 0.0]);

        assert!(out.params.apply(&record(9, f64::NAN, 5.0, 1.0)).is_none());
    }

    #[test]
    fn empty_input_is_fine() {
        let out = preprocess(&[], FeatureSelection::default());
        assert!(out.features.is_empty());
        assert_eq!(out.dropped, 0);
    }
}
