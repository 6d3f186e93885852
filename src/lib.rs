pub use cluster::{ClusterAssignment, ClusterSummary, KMeans};
pub use database::{load, FlashDatabase, RecordStore};
pub use error::{SatFlashError, SatFlashResult};
pub use evaluate::{silhouette, EvaluationResult, Evaluator, KScore};
pub use extract::{
    ByteStreamProvider, DirectoryArchive, Extractor, RawFile, DEFAULT_CADENCE_SECONDS,
};
pub use geo::{great_circle_distance, BoundingBox, Coord};
pub use preprocess::{
    preprocess, FeatureSelection, FeatureVector, NormalizationParams, Preprocessed,
};
pub use report::{analyze, ingest, RunReport};
pub use risk::{RiskAssessment, RiskAssessor, RiskComponents, RiskLevel};
pub use satellite::{file_key, Satellite, GLM_PRODUCT};
pub use source::{GlmFile, RawEvent, RawFlash, RawGroup};
pub use transform::{transform, transform_file, FlatRecord, RecordKey, TransformOutput};
pub use window::{parse_utc, TimeWindow};

/**************************************************************************************************
 * Private Implementation
 *************************************************************************************************/
mod cluster;
mod database;
mod error;
mod evaluate;
mod extract;
mod geo;
mod preprocess;
mod report;
mod risk;
mod satellite;
mod source;
mod transform;
mod window;
