/*! Contains all the information about satellites and how their lightning files are named. */

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/** The GOES satellites carrying a Geostationary Lightning Mapper. */
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::Display,
    strum::EnumIter,
)]
pub enum Satellite {
    /// GOES-16 (formerly GOES-R), GOES East until April 2025.
    G16,
    /// GOES-17 (formerly GOES-S), GOES West until January 2023.
    G17,
    /// GOES-18 (formerly GOES-T), GOES West.
    G18,
    /// GOES-19 (formerly GOES-U), GOES East.
    G19,
}

impl Satellite {
    /// Get a string representing the name of the satellite.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// The public NOAA bucket the satellite's data is mirrored from.
    pub fn bucket(&self) -> &'static str {
        use Satellite::*;

        match self {
            G16 => "noaa-goes16",
            G17 => "noaa-goes17",
            G18 => "noaa-goes18",
            G19 => "noaa-goes19",
        }
    }

    /// Scan the string for the occurence of a satellite name.
    pub fn string_contains_satellite(string: &str) -> Option<Satellite> {
        use strum::IntoEnumIterator;

        Satellite::iter().find(|sat| string.contains(sat.name()))
    }

    /// Get the date and time (in UTC) that the satellite became operational.
    ///
    /// The satellite may have started sending data before this date, but it may not be
    /// trustworthy data.
    pub fn operational(&self) -> DateTime<Utc> {
        use Satellite::*;

        let (y, m, d) = match self {
            G16 => (2017, 12, 18),
            G17 => (2019, 2, 12),
            G18 => (2023, 1, 4),
            G19 => (2025, 4, 7),
        };

        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// The Level-2 lightning cluster-filter product, the only product this library reads.
pub const GLM_PRODUCT: &str = "GLM-L2-LCFA";

/// Build the key prefix for the file whose scan started at `scan_start`.
///
/// NOAA names the files `OR_<product>_<sat>_s<YYYYDDDHHMMSSt>_e<...>_c<...>.nc` and stores them
/// under `<product>/<year>/<day of year>/<hour>/`. The end and creation times cannot be known
/// ahead of time, so the key stops after the scan start field and providers resolve the rest.
pub fn file_key(product: &str, satellite: Satellite, scan_start: DateTime<Utc>) -> String {
    let year = scan_start.year();
    let doy = scan_start.ordinal();
    let hour = scan_start.hour();
    let tenths = scan_start.timestamp_subsec_millis() / 100;

    let dir = format!(
        "{product}/{year:04}/{doy:03}/{hour:02}",
        product = product,
        year = year,
        doy = doy,
        hour = hour,
    );

    format!(
        "{dir}/OR_{product}_{sat}_s{year:04}{doy:03}{hour:02}{min:02}{sec:02}{tenths}",
        dir = dir,
        product = product,
        sat = satellite.name(),
        year = year,
        doy = doy,
        hour = hour,
        min = scan_start.minute(),
        sec = scan_start.second(),
        tenths = tenths,
    )
}

/// The file name (no directories) a key refers to.
pub fn key_file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satellite_names_round_trip_through_strum() {
        let sat: Satellite = "G18".parse().unwrap();
        assert_eq!(sat, Satellite::G18);
        assert_eq!(sat.name(), "G18");
        assert_eq!(format!("{}", sat), "G18");
        assert_eq!(sat.bucket(), "noaa-goes18");

        assert_eq!(
            Satellite::string_contains_satellite("OR_GLM-L2-LCFA_G16_s2023"),
            Some(Satellite::G16)
        );
        assert_eq!(Satellite::string_contains_satellite("nothing here"), None);
    }

    #[test]
    fn keys_follow_the_bucket_layout() {
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 20).unwrap();
        let key = file_key(GLM_PRODUCT, Satellite::G18, start);

        assert_eq!(
            key,
            "GLM-L2-LCFA/2023/152/12/OR_GLM-L2-LCFA_G18_s20231521200200"
        );
        assert_eq!(key_file_name(&key), "OR_GLM-L2-LCFA_G18_s20231521200200");
    }
}
