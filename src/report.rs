/*!
 * Run the stages end to end and summarize what happened.
 */

use crate::{
    cluster::ClusterSummary,
    database::{self, RecordStore},
    evaluate::{EvaluationResult, Evaluator},
    extract::{ByteStreamProvider, Extractor},
    geo::{BoundingBox, Coord},
    preprocess::{self, FeatureSelection},
    risk::{RiskAssessment, RiskAssessor},
    transform,
    window::TimeWindow,
    SatFlashError, SatFlashResult,
};
use log::{info, warn};
use std::fmt::{self, Display};

/// Counts and results from one run.
///
/// Data quality problems show up here as counts, they never stop a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Files retrieved for the window.
    pub files: usize,
    /// Files that could not be decoded.
    pub malformed_files: usize,
    /// Events in the decoded files, or records read from the store when clustering.
    pub records_processed: usize,
    /// Events dropped because their group or flash was missing.
    pub records_skipped: usize,
    /// Records newly written to the store.
    pub records_loaded: usize,
    /// Records left out of clustering because of non-finite features.
    pub features_dropped: usize,
    pub evaluation: Option<EvaluationResult>,
    pub clusters: Vec<ClusterSummary>,
    /// One rating per entry in `clusters`, in the same order.
    pub risks: Vec<RiskAssessment>,
}

impl RunReport {
    pub fn recommended_k(&self) -> Option<usize> {
        self.evaluation.as_ref().map(|ev| ev.recommended_k())
    }
}

/// Extract, transform, and load every file for a window.
///
/// Fails only if a file can't be retrieved or the store can't be written.
pub fn ingest<P, S>(
    extractor: &Extractor,
    window: &TimeWindow,
    provider: &P,
    store: &mut S,
) -> SatFlashResult<RunReport>
where
    P: ByteStreamProvider + ?Sized,
    S: RecordStore + ?Sized,
{
    let files = extractor.extract(window, provider)?;
    let output = transform::transform(&files);
    let loaded = database::load(&output.records, store)?;

    Ok(RunReport {
        files: files.len(),
        malformed_files: output.malformed_files,
        records_processed: output.total_events,
        records_skipped: output.skipped_orphans,
        records_loaded: loaded,
        ..RunReport::default()
    })
}

/// Query the store, choose k, and describe the clusters for that k.
///
/// The candidates must hold at least two distinct values of k and none of them may be below 2.
/// Candidates that need more points than are available are dropped. If fewer than two remain the
/// report has no evaluation.
pub fn analyze<S: RecordStore + ?Sized>(
    store: &S,
    window: &TimeWindow,
    area: &BoundingBox,
    selection: FeatureSelection,
    evaluator: &Evaluator,
    k_range: &[usize],
) -> SatFlashResult<RunReport> {
    let mut candidates = k_range.to_vec();
    candidates.sort_unstable();
    candidates.dedup();
    if candidates.len() < 2 {
        return Err(SatFlashError::EmptyKRange(candidates.len()));
    }

    let mut records = store.query(window, area)?;
    let returned = records.len();
    records.retain(|r| {
        area.contains(Coord {
            lat: r.latitude,
            lon: r.longitude,
        })
    });
    if records.len() < returned {
        warn!(
            "store returned {} records outside the area",
            returned - records.len()
        );
    }

    let prepped = preprocess::preprocess(&records, selection);
    let n = prepped.features.len();

    if let Some(&k) = candidates.iter().find(|&&k| k < 2) {
        return Err(SatFlashError::InvalidK { k, points: n });
    }

    let mut report = RunReport {
        records_processed: records.len(),
        features_dropped: prepped.dropped,
        ..RunReport::default()
    };

    let usable: Vec<usize> = candidates.iter().copied().filter(|&k| k < n).collect();
    if usable.len() < candidates.len() {
        warn!(
            "only {} usable points, dropped {} candidate values of k",
            n,
            candidates.len() - usable.len()
        );
    }

    if usable.len() < 2 {
        warn!("not enough candidate values of k left to evaluate");
        return Ok(report);
    }

    let evaluation = evaluator.evaluate(&prepped.features, &usable)?;
    let fit = evaluator
        .kmeans
        .fit(&prepped.features, evaluation.recommended_k())?;

    report.clusters = fit.summarize(&records, &prepped.features);
    report.risks = RiskAssessor::default().assess_all(&report.clusters);
    report.evaluation = Some(evaluation);

    info!(
        "clustered {} events into {} clusters",
        n,
        report.clusters.len()
    );

    Ok(report)
}

impl Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        if self.files > 0 {
            writeln!(f, "           Files: {}", self.files)?;
            writeln!(f, " Malformed files: {}", self.malformed_files)?;
        }
        writeln!(f, "       Processed: {}", self.records_processed)?;
        writeln!(f, "         Skipped: {}", self.records_skipped)?;
        writeln!(f, "          Loaded: {}", self.records_loaded)?;
        writeln!(f, "Dropped features: {}", self.features_dropped)?;

        match &self.evaluation {
            Some(ev) => {
                writeln!(f, "   Recommended k: {}", ev.recommended_k())?;
                match ev.elbow_k {
                    Some(k) => writeln!(f, "         Elbow k: {}", k)?,
                    None => writeln!(f, "         Elbow k: -")?,
                }
                writeln!(f)?;
                write!(f, "{}", ev)?;
            }
            None => writeln!(f, "   Recommended k: -")?,
        }

        if !self.clusters.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{:>5} {:>8} {:>9} {:>10} {:>11} {:>9} {:>19} {:>8} {:>4} {:>8}",
                "label",
                "count",
                "lat",
                "lon",
                "energy (J)",
                "radius km",
                "first",
                "last",
                "risk",
                "level"
            )?;
            for (i, cluster) in self.clusters.iter().enumerate() {
                match self.risks.get(i) {
                    Some(risk) => writeln!(f, "{} {}", cluster, risk)?,
                    None => writeln!(f, "{} {:>4} {:>8}", cluster, "-", "-")?,
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::FlashDatabase, transform::FlatRecord};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap()
    }

    /// Thirty records in three tight groups.
    fn three_storms() -> Vec<FlatRecord> {
        let storms = [(30.0, -95.0), (35.0, -85.0), (40.0, -100.0)];

        (0..30)
            .map(|i| {
                let (lat, lon) = storms[i as usize / 10];
                FlatRecord {
                    source_file: "f1".to_owned(),
                    event_id: i,
                    group_id: i / 10,
                    flash_id: i / 10,
                    timestamp: t0() + Duration::seconds(i),
                    group_time: t0(),
                    flash_time: t0(),
                    latitude: lat + 0.01 * (i % 5) as f64,
                    longitude: lon + 0.01 * (i % 2) as f64,
                    intensity: 2.0e-15,
                }
            })
            .collect()
    }

    fn stored() -> FlashDatabase {
        let mut db = FlashDatabase::in_memory().unwrap();
        database::load(&three_storms(), &mut db).unwrap();
        db
    }

    fn run(store: &dyn RecordStore, k_range: &[usize]) -> SatFlashResult<RunReport> {
        let window = TimeWindow::new(t0(), t0() + Duration::minutes(1)).unwrap();
        let evaluator = Evaluator {
            threads: 2,
            ..Evaluator::default()
        };

        analyze(
            store,
            &window,
            &BoundingBox::globe(),
            FeatureSelection::default(),
            &evaluator,
            k_range,
        )
    }

    #[test]
    fn k_below_two_is_rejected() {
        let db = stored();

        match run(&db, &[1, 3]) {
            Err(SatFlashError::InvalidK { k: 1, points: 30 }) => {}
            other => panic!("unexpected {:?}", other),
        }

        match run(&db, &[0, 1]) {
            Err(SatFlashError::InvalidK { k: 0, points: 30 }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fewer_than_two_distinct_candidates_is_rejected() {
        let db = stored();

        assert!(matches!(run(&db, &[3]), Err(SatFlashError::EmptyKRange(1))));
        assert!(matches!(run(&db, &[3, 3, 3]), Err(SatFlashError::EmptyKRange(1))));
        assert!(matches!(run(&db, &[]), Err(SatFlashError::EmptyKRange(0))));
    }

    #[test]
    fn too_few_points_gives_a_report_without_evaluation() {
        let db = stored();

        let report = run(&db, &[29, 30, 31]).unwrap();
        assert_eq!(report.records_processed, 30);
        assert!(report.evaluation.is_none());
        assert!(report.clusters.is_empty());
    }

    #[test]
    fn every_cluster_gets_a_risk_rating() {
        let db = stored();

        let report = run(&db, &[2, 3, 4]).unwrap();
        assert_eq!(report.recommended_k(), Some(3));
        assert_eq!(report.risks.len(), report.clusters.len());
        for (cluster, risk) in report.clusters.iter().zip(&report.risks) {
            assert_eq!(cluster.label, risk.label);
        }

        let text = report.to_string();
        assert!(text.contains("level"));
        assert!(text.contains(report.risks[0].level.name()));
    }

    /// Hands back everything it holds, whatever the query.
    struct Unfiltered(Vec<FlatRecord>);

    impl RecordStore for Unfiltered {
        fn upsert_if_absent(
            &mut self,
            _: crate::transform::RecordKey<'_>,
            _: &FlatRecord,
        ) -> SatFlashResult<bool> {
            Ok(false)
        }

        fn query(&self, _: &TimeWindow, _: &BoundingBox) -> SatFlashResult<Vec<FlatRecord>> {
            Ok(self.0.clone())
        }

        fn count(&self) -> SatFlashResult<u64> {
            Ok(self.0.len() as u64)
        }
    }

    #[test]
    fn records_outside_the_area_are_not_clustered() {
        let store = Unfiltered(three_storms());
        let window = TimeWindow::new(t0(), t0() + Duration::minutes(1)).unwrap();
        let area = BoundingBox {
            ll: Coord {
                lat: 25.0,
                lon: -97.0,
            },
            ur: Coord {
                lat: 36.0,
                lon: -84.0,
            },
        };

        let report = analyze(
            &store,
            &window,
            &area,
            FeatureSelection::default(),
            &Evaluator::default(),
            &[2, 3],
        )
        .unwrap();

        assert_eq!(report.records_processed, 20);
        assert_eq!(report.recommended_k(), Some(2));
    }

    #[test]
    fn report_without_evaluation_still_prints_counts() {
        let report = RunReport {
            records_processed: 12,
            records_skipped: 3,
            records_loaded: 9,
            ..RunReport::default()
        };

        let text = report.to_string();
        assert!(text.contains("Processed: 12"));
        assert!(text.contains("Skipped: 3"));
        assert!(text.contains("Loaded: 9"));
        assert!(text.contains("Recommended k: -"));
        assert_eq!(report.recommended_k(), None);
    }
}
