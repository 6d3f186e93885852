/*! The zip/CSV staging format, one CSV member per tier. */

use super::{GlmFile, RawEvent, RawFlash, RawGroup};
use crate::{SatFlashError, SatFlashResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Cursor, Read, Seek, Write};
use zip::{write::FileOptions, ZipArchive, ZipWriter};

const FLASHES: &str = "flashes.csv";
const GROUPS: &str = "groups.csv";
const EVENTS: &str = "events.csv";

#[derive(Debug, Deserialize, Serialize)]
struct FlashRow {
    flash_id: i64,
    time: String,
    lat: f64,
    lon: f64,
    energy: f64,
}

#[derive(Debug, Deserialize, Serialize)]
struct GroupRow {
    group_id: i64,
    parent_flash_id: i64,
    time: String,
    lat: f64,
    lon: f64,
    energy: f64,
}

#[derive(Debug, Deserialize, Serialize)]
struct EventRow {
    event_id: i64,
    parent_group_id: i64,
    time: String,
    lat: f64,
    lon: f64,
    energy: f64,
}

pub(super) fn read_archive(name: &str, bytes: &[u8]) -> SatFlashResult<GlmFile> {
    let mut zip =
        ZipArchive::new(Cursor::new(bytes)).map_err(|err| SatFlashError::malformed(name, err))?;

    let flashes = read_tier::<FlashRow, _>(name, &mut zip, FLASHES)?
        .into_iter()
        .map(|row| {
            Ok(RawFlash {
                id: row.flash_id,
                time: parse_time(name, &row.time)?,
                lat: row.lat,
                lon: row.lon,
                energy: row.energy,
            })
        })
        .collect::<SatFlashResult<Vec<_>>>()?;

    let groups = read_tier::<GroupRow, _>(name, &mut zip, GROUPS)?
        .into_iter()
        .map(|row| {
            Ok(RawGroup {
                id: row.group_id,
                parent_flash_id: row.parent_flash_id,
                time: parse_time(name, &row.time)?,
                lat: row.lat,
                lon: row.lon,
                energy: row.energy,
            })
        })
        .collect::<SatFlashResult<Vec<_>>>()?;

    let events = read_tier::<EventRow, _>(name, &mut zip, EVENTS)?
        .into_iter()
        .map(|row| {
            Ok(RawEvent {
                id: row.event_id,
                parent_group_id: row.parent_group_id,
                time: parse_time(name, &row.time)?,
                lat: row.lat,
                lon: row.lon,
                energy: row.energy,
            })
        })
        .collect::<SatFlashResult<Vec<_>>>()?;

    Ok(GlmFile::new(name, flashes, groups, events))
}

fn read_tier<T, R>(name: &str, zip: &mut ZipArchive<R>, member: &str) -> SatFlashResult<Vec<T>>
where
    T: DeserializeOwned,
    R: Read + Seek,
{
    let entry = zip
        .by_name(member)
        .map_err(|err| SatFlashError::malformed(name, format!("{}: {}", member, err)))?;

    csv::Reader::from_reader(entry)
        .deserialize()
        .map(|row| {
            row.map_err(|err| SatFlashError::malformed(name, format!("{}: {}", member, err)))
        })
        .collect()
}

/// Times may carry any offset, they are always stored in UTC.
fn parse_time(name: &str, text: &str) -> SatFlashResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| SatFlashError::malformed(name, format!("bad time '{}': {}", text, err)))
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn write_archive(file: &GlmFile) -> SatFlashResult<Vec<u8>> {
    let name = file.name();
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let flashes = file.flashes().iter().map(|f| FlashRow {
        flash_id: f.id,
        time: format_time(f.time),
        lat: f.lat,
        lon: f.lon,
        energy: f.energy,
    });
    write_tier(name, &mut zip, FLASHES, flashes)?;

    let groups = file.groups().iter().map(|g| GroupRow {
        group_id: g.id,
        parent_flash_id: g.parent_flash_id,
        time: format_time(g.time),
        lat: g.lat,
        lon: g.lon,
        energy: g.energy,
    });
    write_tier(name, &mut zip, GROUPS, groups)?;

    let events = file.events().iter().map(|e| EventRow {
        event_id: e.id,
        parent_group_id: e.parent_group_id,
        time: format_time(e.time),
        lat: e.lat,
        lon: e.lon,
        energy: e.energy,
    });
    write_tier(name, &mut zip, EVENTS, events)?;

    let cursor = zip.finish().map_err(|err| SatFlashError::malformed(name, err))?;
    Ok(cursor.into_inner())
}

fn write_tier<W, T, I>(
    name: &str,
    zip: &mut ZipWriter<W>,
    member: &str,
    rows: I,
) -> SatFlashResult<()>
where
    W: Write + Seek,
    T: Serialize,
    I: Iterator<Item = T>,
{
    let to_err = |err: &dyn std::fmt::Display| {
        SatFlashError::malformed(name, format!("{}: {}", member, err))
    };

    zip.start_file(member, FileOptions::default())
        .map_err(|err| to_err(&err))?;

    let mut writer = csv::Writer::from_writer(zip);
    for row in rows {
        writer.serialize(row).map_err(|err| to_err(&err))?;
    }
    writer.flush().map_err(|err| to_err(&err))?;

    Ok(())
}
