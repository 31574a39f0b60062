//! Race aggregate: riders, races and the root [`RaceState`] pushed to every client.
//!
//! Nothing in here performs I/O. Every mutation goes through the command handlers in
//! [`crate::services::commands`], which call the helpers below to keep lap accounting,
//! positions and `current_lap` consistent.

use std::{cmp::Ordering, mem};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use utoipa::ToSchema;

/// Opaque race identifier (UUIDv7 strings for new races, legacy strings are kept as-is).
pub type RaceId = String;
/// Opaque rider identifier, unique within the whole state.
pub type RiderId = String;

/// Amount added to a rider's penalty total by a single `addPenalty` command.
pub const PENALTY_INCREMENT_MS: u64 = 5_000;
/// Lap cap given to races created without an explicit configuration.
pub const DEFAULT_MAX_LAPS: u32 = 20;
/// Identifier of the race synthesized when no usable state could be loaded.
pub const DEFAULT_RACE_ID: &str = "default";
const DEFAULT_RACE_NAME: &str = "Default Race";

/// A participant tracked within a race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rider {
    /// Internal identifier, creation-ordered.
    pub id: RiderId,
    /// Start number as typed by the operator; not guaranteed unique.
    pub number: String,
    /// Display name.
    pub name: String,
    /// Class label used to partition the ranking. Empty when unset.
    #[serde(default, deserialize_with = "null_as_default")]
    pub class: String,
    /// Completed laps, always equal to `lap_times.len()`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub laps: u32,
    /// Duration of each completed lap in milliseconds.
    #[serde(default, deserialize_with = "null_as_default")]
    pub lap_times: Vec<u64>,
    /// Sum of `lap_times` in milliseconds.
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_time: u64,
    /// Rank within the rider's class (1 = best).
    #[serde(default = "first_position", deserialize_with = "null_as_first_position")]
    pub position: u32,
    /// Epoch milliseconds of the most recent lap crossing.
    #[serde(default)]
    pub last_lap_time: Option<u64>,
    /// Duration of the most recently completed lap in milliseconds.
    #[serde(default)]
    pub previous_lap_time: Option<u64>,
    /// Accumulated penalty in milliseconds.
    #[serde(default, deserialize_with = "null_as_default")]
    pub penalty_ms: u64,
    /// Whether the rider still takes part in the race.
    #[serde(default = "active", deserialize_with = "null_as_active")]
    pub is_active: bool,
}

fn first_position() -> u32 {
    1
}

fn active() -> bool {
    true
}

fn default_max_laps() -> u32 {
    DEFAULT_MAX_LAPS
}

// Documents written by older clients carry `null` where a value was never set.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_first_position<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Ok(Option::deserialize(deserializer)?.unwrap_or_else(first_position))
}

fn null_as_active<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::deserialize(deserializer)?.unwrap_or_else(active))
}

fn null_as_max_laps<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Ok(Option::deserialize(deserializer)?.unwrap_or_else(default_max_laps))
}

impl Rider {
    /// Build a rider that has not completed any lap yet.
    pub fn new(id: RiderId, number: String, name: String, class: String) -> Self {
        Self {
            id,
            number,
            name,
            class,
            laps: 0,
            lap_times: Vec::new(),
            total_time: 0,
            position: 1,
            last_lap_time: None,
            previous_lap_time: None,
            penalty_ms: 0,
            is_active: true,
        }
    }

    /// Time used as ranking tie-break: total lap time plus penalties.
    pub fn ranking_time(&self) -> u64 {
        self.total_time.saturating_add(self.penalty_ms)
    }

    /// Average lap duration, `None` before the first lap.
    pub fn average_lap_ms(&self) -> Option<u64> {
        match self.lap_times.len() {
            0 => None,
            count => Some(self.total_time / count as u64),
        }
    }

    /// Append a completed lap of `duration` ms that ended at `crossed_at`.
    pub fn record_lap(&mut self, duration: u64, crossed_at: u64) {
        self.lap_times.push(duration);
        self.sync_lap_totals();
        self.previous_lap_time = Some(duration);
        self.last_lap_time = Some(crossed_at);
    }

    /// Drop the last recorded lap and rebuild the crossing timestamps from `race_start`.
    ///
    /// Returns `false` when the rider has no lap to remove.
    pub fn undo_lap(&mut self, race_start: Option<u64>) -> bool {
        if self.laps == 0 {
            return false;
        }

        self.lap_times.pop();
        self.sync_lap_totals();
        self.previous_lap_time = self.lap_times.last().copied();
        self.last_lap_time = race_start.map(|start| start.saturating_add(self.total_time));
        true
    }

    /// Clear lap data ahead of a restart. Penalties are kept.
    pub fn clear_laps(&mut self) {
        self.lap_times.clear();
        self.sync_lap_totals();
        self.last_lap_time = None;
        self.previous_lap_time = None;
    }

    /// Add one fixed penalty increment.
    pub fn add_penalty(&mut self) {
        self.penalty_ms = self.penalty_ms.saturating_add(PENALTY_INCREMENT_MS);
    }

    /// Prepend `missing` laps sharing the unaccounted time before the last crossing.
    fn backfill_laps(&mut self, missing: usize, race_start: Option<u64>) {
        let known: u64 = self.lap_times.iter().sum();
        let span = match (race_start, self.last_lap_time) {
            (Some(start), Some(last)) => last.saturating_sub(start).saturating_sub(known),
            _ => 0,
        };
        let share = span / missing as u64;
        let mut filled = vec![share; missing];
        if let Some(first) = filled.first_mut() {
            *first += span - share * missing as u64;
        }
        filled.append(&mut self.lap_times);
        self.lap_times = filled;
    }

    fn sync_lap_totals(&mut self) {
        self.laps = self.lap_times.len() as u32;
        self.total_time = self.lap_times.iter().sum();
    }
}

/// Ranking comparator: more laps first, then the lower `total_time + penalty_ms`.
///
/// Riders that are still equal compare as [`Ordering::Equal`]; since callers use a
/// stable sort they keep their relative order from the riders list. For riders with
/// no lap at all this means positions follow list order, which is arbitrary from
/// the operator's point of view.
pub fn rank_order(a: &Rider, b: &Rider) -> Ordering {
    b.laps
        .cmp(&a.laps)
        .then_with(|| a.ranking_time().cmp(&b.ranking_time()))
}

/// A single race with its riders and lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    /// Internal identifier, creation-ordered.
    pub id: RaceId,
    /// Display name.
    pub name: String,
    /// Riders in add/display order (not rank order).
    #[serde(default, deserialize_with = "null_as_default")]
    pub riders: Vec<Rider>,
    /// Class labels defined by the operator.
    #[serde(default, deserialize_with = "null_as_default")]
    #[schema(value_type = Vec<String>)]
    pub classes: IndexSet<String>,
    /// Whether laps are currently being counted.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_running: bool,
    /// Epoch milliseconds of the start signal, kept after the race stops.
    #[serde(default)]
    pub start_time: Option<u64>,
    /// Highest lap count among the riders.
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_lap: u32,
    /// Informational lap cap.
    #[serde(default = "default_max_laps", deserialize_with = "null_as_max_laps")]
    pub max_laps: u32,
}

impl Race {
    /// Build an empty, not yet started race.
    pub fn new(id: RaceId, name: String, max_laps: u32) -> Self {
        Self {
            id,
            name,
            riders: Vec::new(),
            classes: IndexSet::new(),
            is_running: false,
            start_time: None,
            current_lap: 0,
            max_laps,
        }
    }

    /// Look up a rider by identifier.
    pub fn rider(&self, rider_id: &str) -> Option<&Rider> {
        self.riders.iter().find(|rider| rider.id == rider_id)
    }

    /// Look up a rider mutably by identifier.
    pub fn rider_mut(&mut self, rider_id: &str) -> Option<&mut Rider> {
        self.riders.iter_mut().find(|rider| rider.id == rider_id)
    }

    /// Indices into `riders` grouped by class label and sorted by [`rank_order`].
    ///
    /// Groups appear in the order their label is first seen in the riders list; the
    /// empty label is a group of its own.
    pub fn ranked_groups(&self) -> IndexMap<&str, Vec<usize>> {
        let mut groups: IndexMap<&str, Vec<usize>> = IndexMap::new();
        for (index, rider) in self.riders.iter().enumerate() {
            groups.entry(rider.class.as_str()).or_default().push(index);
        }
        for indices in groups.values_mut() {
            indices.sort_by(|&a, &b| rank_order(&self.riders[a], &self.riders[b]));
        }
        groups
    }

    /// Full re-rank: rebuild the riders list in ranking order, class by class.
    pub fn update_positions(&mut self) {
        let order: Vec<Vec<usize>> = self.ranked_groups().into_values().collect();
        let mut slots: Vec<Option<Rider>> = mem::take(&mut self.riders)
            .into_iter()
            .map(Some)
            .collect();

        for indices in order {
            for (rank, index) in indices.into_iter().enumerate() {
                if let Some(mut rider) = slots[index].take() {
                    rider.position = rank as u32 + 1;
                    self.riders.push(rider);
                }
            }
        }
    }

    /// Positions-only re-rank: same ranking as [`Race::update_positions`] but the
    /// riders list keeps its current order.
    pub fn update_positions_only(&mut self) {
        let order: Vec<Vec<usize>> = self.ranked_groups().into_values().collect();
        for indices in order {
            for (rank, index) in indices.into_iter().enumerate() {
                self.riders[index].position = rank as u32 + 1;
            }
        }
    }

    /// Recompute `current_lap` as the highest lap count, 0 without riders.
    pub fn update_current_lap(&mut self) {
        self.current_lap = self.riders.iter().map(|rider| rider.laps).max().unwrap_or(0);
    }

    /// Return the race to its pre-race state.
    ///
    /// Positions are NOT a ranking afterwards: each rider gets
    /// `(first UTF-16 unit of its id) % rider_count + 1`, the placeholder formula
    /// existing clients expect. The next `sortRiders` or lap restores a real ranking.
    pub fn reset(&mut self) {
        let count = self.riders.len();
        for rider in &mut self.riders {
            rider.clear_laps();
            rider.position = placeholder_position(&rider.id, count);
        }
        self.is_running = false;
        self.start_time = None;
        self.current_lap = 0;
    }

    /// Recompute derived values after loading from storage.
    ///
    /// Older documents may carry a lap count without the matching lap history. The
    /// count wins: the missing leading laps are rebuilt from the time between the start
    /// signal and the rider's last crossing, split evenly, or as 0 ms laps when either
    /// timestamp is unknown. When the history is longer than the count, the history wins.
    fn repair(&mut self) {
        let start = self.start_time;
        for rider in &mut self.riders {
            let recorded = rider.lap_times.len();
            let stored = rider.laps as usize;
            if stored != recorded {
                warn!(
                    race_id = %self.id,
                    rider_id = %rider.id,
                    laps = rider.laps,
                    lap_times = recorded,
                    "stored lap count disagrees with lap times; rebuilding lap history"
                );
            }
            if stored > recorded {
                rider.backfill_laps(stored - recorded, start);
            }
            rider.sync_lap_totals();
            if rider.previous_lap_time.is_none() {
                rider.previous_lap_time = rider.lap_times.last().copied();
            }
        }
        self.update_current_lap();
    }
}

fn placeholder_position(rider_id: &str, rider_count: usize) -> u32 {
    let code = rider_id.encode_utf16().next().unwrap_or(0) as usize;
    (code % rider_count.max(1)) as u32 + 1
}

/// Root aggregate: every race plus the one currently in focus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceState {
    /// All known races, unique identifiers.
    pub races: Vec<Race>,
    /// Race targeted by rider/lap commands.
    #[serde(default)]
    pub current_race_id: Option<RaceId>,
}

impl RaceState {
    /// State used when nothing usable could be loaded: one empty race, selected.
    pub fn with_default_race(max_laps: u32) -> Self {
        let race = Race::new(DEFAULT_RACE_ID.into(), DEFAULT_RACE_NAME.into(), max_laps);
        Self {
            current_race_id: Some(race.id.clone()),
            races: vec![race],
        }
    }

    /// Look up a race by identifier.
    pub fn race(&self, race_id: &str) -> Option<&Race> {
        self.races.iter().find(|race| race.id == race_id)
    }

    /// The race in focus, if any.
    pub fn current_race(&self) -> Option<&Race> {
        self.current_race_id.as_deref().and_then(|id| self.race(id))
    }

    /// The race in focus, mutably.
    pub fn current_race_mut(&mut self) -> Option<&mut Race> {
        let id = self.current_race_id.as_deref()?;
        self.races.iter_mut().find(|race| race.id == id)
    }

    /// Point `current_race_id` at the first race when it references a missing one.
    ///
    /// Returns `true` when the selection was changed.
    pub fn ensure_current_race(&mut self) -> bool {
        match self.current_race_id.as_deref() {
            Some(id) if self.race(id).is_none() => {
                self.current_race_id = self.races.first().map(|race| race.id.clone());
                true
            }
            _ => false,
        }
    }

    /// Restore derived fields and a valid selection after loading from storage.
    pub fn repair(&mut self) {
        for race in &mut self.races {
            race.repair();
        }
        if self.ensure_current_race() {
            warn!(
                current_race_id = ?self.current_race_id,
                "stored current race did not exist; selection corrected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rider(id: &str, class: &str, laps: &[u64]) -> Rider {
        let mut rider = Rider::new(id.into(), id.into(), format!("Rider {id}"), class.into());
        for (index, duration) in laps.iter().enumerate() {
            rider.record_lap(*duration, 1_000 + index as u64);
        }
        rider
    }

    fn race_with(riders: Vec<Rider>) -> Race {
        let mut race = Race::new("r".into(), "Race".into(), DEFAULT_MAX_LAPS);
        race.riders = riders;
        race
    }

    fn positions(race: &Race) -> Vec<(&str, u32)> {
        race.riders
            .iter()
            .map(|rider| (rider.id.as_str(), rider.position))
            .collect()
    }

    #[test]
    fn record_and_undo_keep_totals_in_sync() {
        let mut rider = rider("a", "", &[]);
        rider.record_lap(60_000, 10_060_000);
        rider.record_lap(55_000, 10_115_000);
        assert_eq!(rider.laps, 2);
        assert_eq!(rider.total_time, 115_000);
        assert_eq!(rider.previous_lap_time, Some(55_000));

        assert!(rider.undo_lap(Some(10_000_000)));
        assert_eq!(rider.laps, 1);
        assert_eq!(rider.total_time, 60_000);
        assert_eq!(rider.previous_lap_time, Some(60_000));
        assert_eq!(rider.last_lap_time, Some(10_060_000));

        assert!(rider.undo_lap(Some(10_000_000)));
        assert_eq!(rider.previous_lap_time, None);
        assert_eq!(rider.last_lap_time, Some(10_000_000));
        assert!(!rider.undo_lap(Some(10_000_000)));
    }

    #[test]
    fn ranking_is_per_class_and_dense() {
        let mut race = race_with(vec![
            rider("a", "Cross", &[50_000]),
            rider("b", "Junior", &[40_000, 40_000]),
            rider("c", "Cross", &[30_000, 30_000]),
            rider("d", "Junior", &[]),
            rider("e", "", &[10_000]),
        ]);

        race.update_positions_only();

        assert_eq!(
            positions(&race),
            vec![("a", 2), ("b", 1), ("c", 1), ("d", 2), ("e", 1)]
        );
    }

    #[test]
    fn equal_laps_break_ties_on_time_plus_penalty() {
        let mut fast = rider("fast", "Cross", &[40_000]);
        let slow = rider("slow", "Cross", &[42_000]);
        let mut race = race_with(vec![slow, fast.clone()]);
        race.update_positions_only();
        assert_eq!(positions(&race), vec![("slow", 2), ("fast", 1)]);

        fast.add_penalty();
        let mut race = race_with(vec![race.riders[0].clone(), fast]);
        race.update_positions_only();
        assert_eq!(positions(&race), vec![("slow", 1), ("fast", 2)]);
    }

    #[test]
    fn full_rerank_rebuilds_list_grouped_by_first_seen_class() {
        let mut race = race_with(vec![
            rider("a", "Cross", &[50_000]),
            rider("b", "Quad", &[]),
            rider("c", "Cross", &[30_000, 30_000]),
            rider("d", "Quad", &[20_000]),
        ]);

        race.update_positions();

        assert_eq!(
            positions(&race),
            vec![("c", 1), ("a", 2), ("d", 1), ("b", 2)]
        );
    }

    #[test]
    fn full_rerank_is_idempotent() {
        let mut race = race_with(vec![
            rider("a", "", &[]),
            rider("b", "", &[]),
            rider("c", "X", &[5_000]),
            rider("d", "", &[7_000]),
        ]);
        race.update_positions();
        let once = race.clone();
        race.update_positions();
        assert_eq!(race, once);
    }

    #[test]
    fn current_lap_tracks_the_leader() {
        let mut race = race_with(vec![rider("a", "", &[1, 2, 3]), rider("b", "", &[1])]);
        race.update_current_lap();
        assert_eq!(race.current_lap, 3);

        race.riders.clear();
        race.update_current_lap();
        assert_eq!(race.current_lap, 0);
    }

    #[test]
    fn reset_uses_placeholder_positions_and_keeps_penalties() {
        let mut penalized = rider("7abc", "", &[10_000]);
        penalized.add_penalty();
        let mut race = race_with(vec![penalized, rider("1xyz", "", &[20_000])]);
        race.is_running = true;
        race.start_time = Some(42);
        race.current_lap = 1;

        race.reset();

        assert!(!race.is_running);
        assert_eq!(race.start_time, None);
        assert_eq!(race.current_lap, 0);
        // '7' = 55, '1' = 49; both odd.
        assert_eq!(positions(&race), vec![("7abc", 2), ("1xyz", 2)]);
        assert_eq!(race.riders[0].penalty_ms, PENALTY_INCREMENT_MS);
        assert!(race.riders.iter().all(|r| r.lap_times.is_empty()
            && r.total_time == 0
            && r.last_lap_time.is_none()));
    }

    #[test]
    fn repair_fixes_dangling_selection_and_totals() {
        let mut race = race_with(vec![rider("a", "", &[10, 20])]);
        race.riders[0].total_time = 0;
        race.current_lap = 0;
        let mut state = RaceState {
            races: vec![race],
            current_race_id: Some("gone".into()),
        };

        state.repair();

        assert_eq!(state.current_race_id.as_deref(), Some("r"));
        assert_eq!(state.races[0].riders[0].total_time, 30);
        assert_eq!(state.races[0].current_lap, 2);
    }

    #[test]
    fn legacy_documents_deserialize_with_defaults() {
        let json = r#"{
            "races": [{
                "id": "default",
                "name": "Default Race",
                "riders": [{"id": "1", "number": "12", "name": "Smith", "class": "Cross",
                            "laps": 0, "position": 1, "lastLapTime": null,
                            "previousLapTime": null, "isActive": true}],
                "isRunning": false,
                "startTime": null,
                "currentLap": 0,
                "maxLaps": 20
            }],
            "currentRaceId": "default"
        }"#;

        let state: RaceState = serde_json::from_str(json).unwrap();
        let rider = &state.races[0].riders[0];
        assert!(rider.lap_times.is_empty());
        assert_eq!(rider.penalty_ms, 0);
        assert!(state.races[0].classes.is_empty());
    }

    #[test]
    fn null_fields_decode_as_unset() {
        let json = r#"{
            "races": [{
                "id": "sat", "name": "Saturday Final",
                "riders": [{"id": "1", "number": "12", "name": "Smith", "class": null,
                            "laps": null, "lapTimes": null, "totalTime": null,
                            "position": null, "penaltyMs": null, "isActive": null}],
                "classes": null, "isRunning": null, "currentLap": null, "maxLaps": null
            }, {
                "id": "empty", "name": "Empty", "riders": null
            }],
            "currentRaceId": null
        }"#;

        let state: RaceState = serde_json::from_str(json).unwrap();
        let race = &state.races[0];
        let rider = &race.riders[0];
        assert_eq!(rider.class, "");
        assert_eq!(rider.laps, 0);
        assert_eq!(rider.position, 1);
        assert!(rider.is_active);
        assert!(race.classes.is_empty());
        assert!(!race.is_running);
        assert_eq!(race.max_laps, DEFAULT_MAX_LAPS);
        assert!(state.races[1].riders.is_empty());
    }

    #[test]
    fn repair_rebuilds_missing_lap_history_from_timestamps() {
        let mut counted = Rider::new("a".into(), "1".into(), "A".into(), String::new());
        counted.laps = 3;
        counted.last_lap_time = Some(1_000 + 190_000);
        counted.previous_lap_time = Some(62_000);
        let mut untimed = Rider::new("b".into(), "2".into(), "B".into(), String::new());
        untimed.laps = 2;
        let mut partial = rider("c", "", &[70_000]);
        partial.laps = 2;
        partial.last_lap_time = Some(1_000 + 150_000);

        let mut race = race_with(vec![counted, untimed, partial]);
        race.start_time = Some(1_000);
        race.repair();

        let [a, b, c] = &race.riders[..] else {
            panic!("expected three riders");
        };
        assert_eq!(a.lap_times, vec![63_334, 63_333, 63_333]);
        assert_eq!((a.laps, a.total_time), (3, 190_000));
        assert_eq!(a.previous_lap_time, Some(62_000));
        assert_eq!(b.lap_times, vec![0, 0]);
        assert_eq!(b.previous_lap_time, Some(0));
        assert_eq!(c.lap_times, vec![80_000, 70_000]);
        assert_eq!(race.current_lap, 3);
    }

    #[test]
    fn repair_prefers_lap_history_over_a_short_count() {
        let mut rider = rider("a", "", &[10, 20, 30]);
        rider.laps = 1;
        let mut race = race_with(vec![rider]);

        race.repair();

        assert_eq!(race.riders[0].laps, 3);
        assert_eq!(race.riders[0].total_time, 60);
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let state = RaceState::with_default_race(DEFAULT_MAX_LAPS);
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["currentRaceId"], "default");
        assert_eq!(value["races"][0]["maxLaps"], 20);
        assert_eq!(value["races"][0]["isRunning"], false);
    }
}
