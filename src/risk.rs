/*!
 * Rate how threatening a cluster of lightning is.
 *
 * Each cluster gets three component scores between 0 and 1, one each for event density, optical
 * energy and duration. Each component saturates at a critical value. The overall score is their
 * weighted sum and maps onto a [RiskLevel].
 */

use crate::cluster::ClusterSummary;
use log::debug;
use std::fmt::{self, Display};

/** Coarse bands of the overall risk score. */
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Score of 0.2 or less.
    Minimal,
    /// Above 0.2.
    Low,
    /// Above 0.4.
    Moderate,
    /// Above 0.6.
    High,
    /// Above 0.8.
    Critical,
}

impl RiskLevel {
    /// Get a string representing the name of the level.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// The band a score falls in. Each band is open at the bottom and closed at the top.
    pub fn from_score(score: f64) -> Self {
        use RiskLevel::*;

        if score > 0.8 {
            Critical
        } else if score > 0.6 {
            High
        } else if score > 0.4 {
            Moderate
        } else if score > 0.2 {
            Low
        } else {
            Minimal
        }
    }
}

/// The weighted contribution of each component to the overall score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskComponents {
    pub density: f64,
    pub energy: f64,
    pub duration: f64,
}

/// The risk rating of one cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    /// The label of the cluster that was rated.
    pub label: usize,
    /// Overall score between 0 and 1, rounded to hundredths.
    pub score: f64,
    pub level: RiskLevel,
    pub components: RiskComponents,
}

impl Display for RiskAssessment {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:>4.2} {:>8}", self.score, self.level.name())
    }
}

/// Rates clusters. The weights always sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessor {
    density_weight: f64,
    energy_weight: f64,
    duration_weight: f64,
    /// Events per square kilometer per hour that saturate the density component.
    pub critical_density: f64,
    /// Joules of optical energy that saturate the energy component.
    pub critical_energy: f64,
    /// Minutes of activity that saturate the duration component.
    pub critical_duration: f64,
}

impl Default for RiskAssessor {
    fn default() -> Self {
        RiskAssessor::new(0.6, 0.3, 0.1)
    }
}

impl RiskAssessor {
    /// The smallest area a cluster is treated as covering, about one GLM pixel.
    const MIN_AREA_KM2: f64 = 64.0;

    /// The shortest duration used when turning a count into a rate.
    const MIN_RATE_MINUTES: f64 = 1.0;

    /// Create an assessor with the default critical values.
    ///
    /// The weights are scaled so they sum to 1. Negative or non-finite weights count as 0, and if
    /// nothing is left the components are weighted equally.
    pub fn new(density_weight: f64, energy_weight: f64, duration_weight: f64) -> Self {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };

        let mut weights = [
            clean(density_weight),
            clean(energy_weight),
            clean(duration_weight),
        ];
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            weights.iter_mut().for_each(|w| *w /= total);
        } else {
            weights = [1.0 / 3.0; 3];
        }

        debug!(
            "risk weights: density {:.2}, energy {:.2}, duration {:.2}",
            weights[0], weights[1], weights[2]
        );

        RiskAssessor {
            density_weight: weights[0],
            energy_weight: weights[1],
            duration_weight: weights[2],
            critical_density: 10.0,
            critical_energy: 1.0e15,
            critical_duration: 60.0,
        }
    }

    /// The normalized weights for density, energy and duration.
    pub fn weights(&self) -> [f64; 3] {
        [self.density_weight, self.energy_weight, self.duration_weight]
    }

    /// Rate a single cluster.
    pub fn assess(&self, cluster: &ClusterSummary) -> RiskAssessment {
        let minutes = (cluster.last - cluster.first).num_milliseconds() as f64 / 60_000.0;

        let area = (std::f64::consts::PI * cluster.radius * cluster.radius).max(Self::MIN_AREA_KM2);
        let hours = minutes.max(Self::MIN_RATE_MINUTES) / 60.0;
        let density = cluster.count as f64 / area / hours;

        let components = RiskComponents {
            density: self.density_weight * saturate(density / self.critical_density),
            energy: self.energy_weight
                * saturate(cluster.energy.log10() / self.critical_energy.log10()),
            duration: self.duration_weight * saturate(minutes / self.critical_duration),
        };

        let score = round_hundredths(components.density + components.energy + components.duration);

        RiskAssessment {
            label: cluster.label,
            score,
            level: RiskLevel::from_score(score),
            components,
        }
    }

    /// Rate every cluster, in the same order.
    pub fn assess_all(&self, clusters: &[ClusterSummary]) -> Vec<RiskAssessment> {
        clusters.iter().map(|c| self.assess(c)).collect()
    }
}

/// Clamp a ratio into [0, 1], anything that isn't a number contributes nothing.
fn saturate(ratio: f64) -> f64 {
    if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}

fn round_hundredths(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}
