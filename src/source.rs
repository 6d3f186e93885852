/*!
 * Reading GLM lightning files.
 *
 * A GLM file holds three tiers of detections. An event is a single pixel lighting up in a single
 * 2 ms frame, a group is a set of adjacent events in the same frame, and a flash is a set of groups
 * close together in space and time. Parents are referenced by id only, so the tiers are kept as
 * three flat arenas and resolving the hierarchy is left to the
 * [transformer](crate::transform()).
 */

use crate::{SatFlashError, SatFlashResult};
use chrono::{DateTime, Utc};

/// The coarsest tier, a whole lightning flash.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFlash {
    /// Unique within the file it came from.
    pub id: i64,
    /// Time of the first event in the flash.
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Total optical energy in joules.
    pub energy: f64,
}

/// The middle tier, a group of adjacent events seen in the same frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGroup {
    /// Unique within the file it came from.
    pub id: i64,
    /// The flash this group belongs to.
    pub parent_flash_id: i64,
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Total optical energy in joules.
    pub energy: f64,
}

/// The finest tier, a single pixel exceeding its background threshold in a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Unique within the file it came from.
    pub id: i64,
    /// The group this event belongs to.
    pub parent_group_id: i64,
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Optical energy in joules.
    pub energy: f64,
}

/// All three tiers of one GLM file.
#[derive(Debug, Clone, Default)]
pub struct GlmFile {
    name: String,
    flashes: Vec<RawFlash>,
    groups: Vec<RawGroup>,
    events: Vec<RawEvent>,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";
const CDF_MAGIC: &[u8] = b"CDF";

impl GlmFile {
    /// Assemble a file from tiers that are already in memory.
    pub fn new<S: Into<String>>(
        name: S,
        flashes: Vec<RawFlash>,
        groups: Vec<RawGroup>,
        events: Vec<RawEvent>,
    ) -> Self {
        GlmFile {
            name: name.into(),
            flashes,
            groups,
            events,
        }
    }

    /// Decode a file from its raw bytes.
    ///
    /// The encoding is detected from the leading bytes. Zip archives are the CSV staging format,
    /// HDF5 and classic NetCDF are the files NOAA publishes and need the `netcdf` feature.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> SatFlashResult<Self> {
        if bytes.starts_with(ZIP_MAGIC) {
            archive::read_archive(name, bytes)
        } else if bytes.starts_with(HDF5_MAGIC) || bytes.starts_with(CDF_MAGIC) {
            Self::from_netcdf(name, bytes)
        } else {
            Err(SatFlashError::malformed(name, "unrecognized file format"))
        }
    }

    #[cfg(feature = "netcdf")]
    fn from_netcdf(name: &str, bytes: &[u8]) -> SatFlashResult<Self> {
        netcdf::read_netcdf(name, bytes)
    }

    #[cfg(not(feature = "netcdf"))]
    fn from_netcdf(name: &str, _bytes: &[u8]) -> SatFlashResult<Self> {
        Err(SatFlashError::malformed(
            name,
            "NetCDF input requires the `netcdf` feature",
        ))
    }

    /// Encode the file in the zip/CSV staging format.
    pub fn to_archive_bytes(&self) -> SatFlashResult<Vec<u8>> {
        archive::write_archive(self)
    }

    /// The name of the file the tiers were read from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flashes(&self) -> &[RawFlash] {
        &self.flashes
    }

    pub fn groups(&self) -> &[RawGroup] {
        &self.groups
    }

    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }
}

mod archive;
#[cfg(feature = "netcdf")]
mod netcdf;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bytes_are_malformed() {
        let err = GlmFile::from_bytes("junk.bin", b"not a glm file").unwrap_err();
        assert!(matches!(
            err,
            SatFlashError::MalformedSource { ref file, .. } if file == "junk.bin"
        ));

        let err = GlmFile::from_bytes("empty.bin", &[]).unwrap_err();
        assert!(matches!(err, SatFlashError::MalformedSource { .. }));
    }

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn netcdf_needs_the_feature() {
        let err = GlmFile::from_bytes("OR_GLM.nc", b"\x89HDF\r\n\x1a\n....").unwrap_err();
        assert!(err.to_string().contains("netcdf"));
    }
}
