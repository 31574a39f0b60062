//! Command handlers: one function per [`ClientCommand`], each a pure transformation of
//! the [`RaceState`] it is handed. Persistence and broadcast are the coordinator's job.

use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::RaceRules,
    dto::ws::ClientCommand,
    state::race::{Race, RaceId, RaceState, Rider, RiderId},
};

/// Inputs a handler needs besides the state itself.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    /// Epoch milliseconds at which the command is applied.
    pub now: u64,
    /// Defaults for omitted values.
    pub rules: &'a RaceRules,
}

/// What the coordinator must do after a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Persist and broadcast the new state.
    StateChanged,
    /// Persist and broadcast, then hand the finished race to the results publisher.
    RaceFinished(Race),
}

/// Why a command left the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejected {
    #[error("unknown command type")]
    UnknownCommand,
    #[error("`{0}` must not be empty")]
    BlankField(&'static str),
    #[error("no current race selected")]
    NoCurrentRace,
    #[error("race `{0}` not found")]
    RaceNotFound(RaceId),
    #[error("rider `{0}` not found in the current race")]
    RiderNotFound(RiderId),
    #[error("current race is not running")]
    RaceNotRunning,
    #[error("current race has no riders")]
    NoRiders,
    #[error("rider `{0}` has no lap to remove")]
    NoLapsToRemove(RiderId),
    #[error("class `{0}` already exists")]
    ClassExists(String),
    #[error("class `{0}` is not used by the current race")]
    ClassNotFound(String),
    #[error("no start time or previous crossing to time rider `{0}` against")]
    MissingTimingAnchor(RiderId),
}

type Outcome = Result<Effect, CommandRejected>;

/// Apply `command` to `state`. On `Err` the state is guaranteed unchanged.
pub fn apply(state: &mut RaceState, command: ClientCommand, ctx: &CommandContext<'_>) -> Outcome {
    match command {
        ClientCommand::CreateRace { name } => create_race(state, &name, ctx),
        ClientCommand::SelectRace { race_id } => select_race(state, race_id),
        ClientCommand::RemoveRace { race_id } => remove_race(state, &race_id),
        ClientCommand::AddRider {
            number,
            name,
            class,
        } => add_rider(state, &number, &name, class.as_deref(), ctx),
        ClientCommand::RemoveRider { rider_id } => remove_rider(state, &rider_id),
        ClientCommand::AddLap { rider_id } => add_lap(state, &rider_id, ctx.now),
        ClientCommand::RemoveLap { rider_id } => remove_lap(state, &rider_id),
        ClientCommand::StartRace => start_race(state, ctx.now),
        ClientCommand::FinishRace => finish_race(state),
        ClientCommand::ResetRace => reset_race(state),
        ClientCommand::SortRiders => sort_riders(state),
        ClientCommand::AddClass { name } => add_class(state, &name),
        ClientCommand::RemoveClass { name } => remove_class(state, &name),
        ClientCommand::AddPenalty { rider_id } => add_penalty(state, &rider_id),
        ClientCommand::Unknown => Err(CommandRejected::UnknownCommand),
    }
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

fn required<'v>(field: &'static str, value: &'v str) -> Result<&'v str, CommandRejected> {
    match value.trim() {
        "" => Err(CommandRejected::BlankField(field)),
        trimmed => Ok(trimmed),
    }
}

fn current_race(state: &mut RaceState) -> Result<&mut Race, CommandRejected> {
    state.current_race_mut().ok_or(CommandRejected::NoCurrentRace)
}

fn running_race(state: &mut RaceState) -> Result<&mut Race, CommandRejected> {
    let race = current_race(state)?;
    if !race.is_running {
        return Err(CommandRejected::RaceNotRunning);
    }
    Ok(race)
}

fn create_race(state: &mut RaceState, name: &str, ctx: &CommandContext<'_>) -> Outcome {
    let name = required("name", name)?;
    let race = Race::new(new_id(), name.to_string(), ctx.rules.default_max_laps);

    if state.current_race().is_none() {
        state.current_race_id = Some(race.id.clone());
    }
    state.races.push(race);
    Ok(Effect::StateChanged)
}

/// Unknown ids are rejected rather than stored, so `current_race_id` never dangles.
fn select_race(state: &mut RaceState, race_id: Option<RaceId>) -> Outcome {
    if let Some(id) = race_id.as_deref()
        && state.race(id).is_none()
    {
        return Err(CommandRejected::RaceNotFound(id.to_string()));
    }
    state.current_race_id = race_id;
    Ok(Effect::StateChanged)
}

fn remove_race(state: &mut RaceState, race_id: &str) -> Outcome {
    let index = state
        .races
        .iter()
        .position(|race| race.id == race_id)
        .ok_or_else(|| CommandRejected::RaceNotFound(race_id.to_string()))?;
    state.races.remove(index);

    if state.current_race_id.as_deref() == Some(race_id) {
        state.current_race_id = state.races.first().map(|race| race.id.clone());
    }
    Ok(Effect::StateChanged)
}

fn add_rider(
    state: &mut RaceState,
    number: &str,
    name: &str,
    class: Option<&str>,
    ctx: &CommandContext<'_>,
) -> Outcome {
    let number = required("number", number)?;
    let name = required("name", name)?;
    let class = class
        .map(str::trim)
        .filter(|class| !class.is_empty())
        .unwrap_or(ctx.rules.default_class.as_str());

    let race = current_race(state)?;
    race.riders.push(Rider::new(
        new_id(),
        number.to_string(),
        name.to_string(),
        class.to_string(),
    ));
    race.update_positions_only();
    race.update_current_lap();
    Ok(Effect::StateChanged)
}

fn remove_rider(state: &mut RaceState, rider_id: &str) -> Outcome {
    let race = current_race(state)?;
    let index = race
        .riders
        .iter()
        .position(|rider| rider.id == rider_id)
        .ok_or_else(|| CommandRejected::RiderNotFound(rider_id.to_string()))?;
    race.riders.remove(index);
    race.update_positions();
    race.update_current_lap();
    Ok(Effect::StateChanged)
}

/// The first lap is timed from the race start, later laps from the rider's previous crossing.
fn add_lap(state: &mut RaceState, rider_id: &str, now: u64) -> Outcome {
    let race = running_race(state)?;
    let start = race.start_time;
    let rider = race
        .rider_mut(rider_id)
        .ok_or_else(|| CommandRejected::RiderNotFound(rider_id.to_string()))?;

    let anchor = if rider.laps == 0 {
        start
    } else {
        rider.last_lap_time.or(start)
    };
    let anchor = anchor.ok_or_else(|| CommandRejected::MissingTimingAnchor(rider_id.to_string()))?;

    rider.record_lap(now.saturating_sub(anchor), now);
    race.update_positions_only();
    race.update_current_lap();
    Ok(Effect::StateChanged)
}

fn remove_lap(state: &mut RaceState, rider_id: &str) -> Outcome {
    let race = running_race(state)?;
    let start = race.start_time;
    let rider = race
        .rider_mut(rider_id)
        .ok_or_else(|| CommandRejected::RiderNotFound(rider_id.to_string()))?;

    if !rider.undo_lap(start) {
        return Err(CommandRejected::NoLapsToRemove(rider_id.to_string()));
    }
    race.update_positions_only();
    race.update_current_lap();
    Ok(Effect::StateChanged)
}

fn start_race(state: &mut RaceState, now: u64) -> Outcome {
    let race = current_race(state)?;
    if race.riders.is_empty() {
        return Err(CommandRejected::NoRiders);
    }
    race.is_running = true;
    race.start_time = Some(now);
    race.update_current_lap();
    Ok(Effect::StateChanged)
}

fn finish_race(state: &mut RaceState) -> Outcome {
    let race = current_race(state)?;
    race.is_running = false;
    Ok(Effect::RaceFinished(race.clone()))
}

fn reset_race(state: &mut RaceState) -> Outcome {
    current_race(state)?.reset();
    Ok(Effect::StateChanged)
}

fn sort_riders(state: &mut RaceState) -> Outcome {
    current_race(state)?.update_positions();
    Ok(Effect::StateChanged)
}

fn add_class(state: &mut RaceState, name: &str) -> Outcome {
    let name = required("name", name)?;
    let race = current_race(state)?;
    if !race.classes.insert(name.to_string()) {
        return Err(CommandRejected::ClassExists(name.to_string()));
    }
    Ok(Effect::StateChanged)
}

/// Riders in the removed class fall back to the unlabelled group and are re-ranked there.
fn remove_class(state: &mut RaceState, name: &str) -> Outcome {
    let name = required("name", name)?;
    let race = current_race(state)?;

    let defined = race.classes.shift_remove(name);
    let mut cleared = 0;
    for rider in race.riders.iter_mut().filter(|rider| rider.class == name) {
        rider.class.clear();
        cleared += 1;
    }

    if !defined && cleared == 0 {
        return Err(CommandRejected::ClassNotFound(name.to_string()));
    }
    if cleared > 0 {
        race.update_positions_only();
    }
    Ok(Effect::StateChanged)
}

fn add_penalty(state: &mut RaceState, rider_id: &str) -> Outcome {
    let race = current_race(state)?;
    race.rider_mut(rider_id)
        .ok_or_else(|| CommandRejected::RiderNotFound(rider_id.to_string()))?
        .add_penalty();
    race.update_positions_only();
    Ok(Effect::StateChanged)
}
