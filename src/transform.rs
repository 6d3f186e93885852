/*!
 * Flatten the flash/group/event hierarchy into one record per event.
 */

use crate::{
    extract::RawFile,
    source::{GlmFile, RawFlash, RawGroup},
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rustc_hash::FxHashMap as HashMap;
use std::collections::hash_map::Entry;

/// One event with everything needed to query it without joining back to its group or flash.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    /// The file the event was read from.
    pub source_file: String,
    pub event_id: i64,
    pub group_id: i64,
    pub flash_id: i64,
    /// Time of the event.
    pub timestamp: DateTime<Utc>,
    /// Time of the event's group.
    pub group_time: DateTime<Utc>,
    /// Time of the first event in the event's flash.
    pub flash_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Optical energy of the event in joules, exactly as it was in the source.
    pub intensity: f64,
}

/// The identity of a record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey<'a> {
    pub source_file: &'a str,
    pub event_id: i64,
}

impl FlatRecord {
    pub fn key(&self) -> RecordKey<'_> {
        RecordKey {
            source_file: &self.source_file,
            event_id: self.event_id,
        }
    }
}

/// Everything the transformer produced for a batch of files.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    /// One record per event whose ancestors were all present, in file then event order.
    pub records: Vec<FlatRecord>,
    /// Events dropped because their group, or their group's flash, was not in the file.
    pub skipped_orphans: usize,
    /// Groups whose flash was not in the file.
    pub orphan_groups: usize,
    /// Files that could not be decoded at all.
    pub malformed_files: usize,
    /// Events in all the files that could be decoded.
    pub total_events: usize,
}

/// Decode and flatten every file.
///
/// Files that can't be decoded are logged and skipped, so are orphaned events. Neither stops the
/// rest of the batch.
pub fn transform(files: &[RawFile]) -> TransformOutput {
    let mut output = TransformOutput::default();

    for raw in files {
        let glm = match GlmFile::from_bytes(&raw.source_file, &raw.bytes) {
            Ok(glm) => glm,
            Err(err) => {
                warn!("skipping {}: {}", raw.key, err);
                output.malformed_files += 1;
                continue;
            }
        };

        flatten_into(&glm, &mut output);
    }

    info!(
        "transformed {} files: {} records, {} orphaned events skipped, {} unreadable files",
        files.len(),
        output.records.len(),
        output.skipped_orphans,
        output.malformed_files
    );

    output
}

/// Flatten a single already decoded file.
pub fn transform_file(glm: &GlmFile) -> TransformOutput {
    let mut output = TransformOutput::default();
    flatten_into(glm, &mut output);
    output
}

fn flatten_into(glm: &GlmFile, output: &mut TransformOutput) {
    let name = glm.name();

    let flashes: HashMap<i64, &RawFlash> = index_by_id(name, "flash", glm.flashes(), |f| f.id);
    let groups: HashMap<i64, &RawGroup> = index_by_id(name, "group", glm.groups(), |g| g.id);

    let orphan_groups = glm
        .groups()
        .iter()
        .filter(|g| !flashes.contains_key(&g.parent_flash_id))
        .count();

    let mut skipped = 0;
    output.records.reserve(glm.events().len());

    for event in glm.events() {
        let group = match groups.get(&event.parent_group_id) {
            Some(group) => *group,
            None => {
                skipped += 1;
                continue;
            }
        };

        let flash = match flashes.get(&group.parent_flash_id) {
            Some(flash) => *flash,
            None => {
                skipped += 1;
                continue;
            }
        };

        output.records.push(FlatRecord {
            source_file: name.to_owned(),
            event_id: event.id,
            group_id: group.id,
            flash_id: flash.id,
            timestamp: event.time,
            group_time: group.time,
            flash_time: flash.time,
            latitude: event.lat,
            longitude: event.lon,
            intensity: event.energy,
        });
    }

    if skipped > 0 || orphan_groups > 0 {
        warn!(
            "{}: {} orphaned events, {} orphaned groups",
            name, skipped, orphan_groups
        );
    }
    debug!(
        "{}: {} flashes, {} groups, {} events",
        name,
        glm.flashes().len(),
        glm.groups().len(),
        glm.events().len()
    );

    output.skipped_orphans += skipped;
    output.orphan_groups += orphan_groups;
    output.total_events += glm.events().len();
}

/// Index a tier by id. If an id repeats, the first occurrence wins.
fn index_by_id<'a, T, F>(name: &str, tier: &str, items: &'a [T], id: F) -> HashMap<i64, &'a T>
where
    F: Fn(&T) -> i64,
{
    let mut index: HashMap<i64, &'a T> = HashMap::default();
    index.reserve(items.len());

    let mut duplicates = 0;
    for item in items {
        match index.entry(id(item)) {
            Entry::Occupied(_) => duplicates += 1,
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
    }

    if duplicates > 0 {
        warn!("{}: {} duplicate {} ids", name, duplicates, tier);
    }

    index
}
