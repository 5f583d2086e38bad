//! Cascading premises locator: entrance, floor, premises type, unit.
//!
//! [`PremisesLocator`] is a synchronous state machine. Every selection
//! returns the [`FetchRequest`] the caller must run, and the response comes
//! back through [`PremisesLocator::apply`] with the request's ticket. A
//! response whose ticket is no longer pending for its stage is discarded,
//! so a slow answer for entrance "1" cannot overwrite the floors of
//! entrance "2".
//!
//! Buildings without entrances skip the first stage entirely: an empty
//! entrance list switches the locator to entrance-less mode and the
//! unfiltered floor list is requested straight away.
//!
//! [`LocatorSession`] drives the machine against a [`PremisesSource`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::format::{EMPTY_INVENTORY_MESSAGE, entrance_inline_label};

pub const STAGE_LOAD_FAILED_MESSAGE: &str = "Не удалось загрузить список";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocatorStage {
    Entrances,
    Floors,
    Types,
    Units,
}

impl LocatorStage {
    pub const ALL: [Self; 4] = [Self::Entrances, Self::Floors, Self::Types, Self::Units];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entrances => "entrances",
            Self::Floors => "floors",
            Self::Types => "types",
            Self::Units => "units",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Entrances => 0,
            Self::Floors => 1,
            Self::Types => 2,
            Self::Units => 3,
        }
    }

    fn downstream(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |stage| *stage > self)
    }
}

impl fmt::Display for LocatorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One selectable unit. `id` is the cadastral number the contact form
/// submits; `display_number` is what the resident recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOption {
    #[serde(rename = "premise_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "number", default, deserialize_with = "string_or_number")]
    pub display_number: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPath {
    pub entrance: Option<String>,
    pub floor: Option<String>,
    pub premises_type: Option<String>,
}

impl SelectionPath {
    /// The part of the path a fetch for `stage` depends on.
    fn upstream_of(&self, stage: LocatorStage) -> Self {
        Self {
            entrance: self.entrance.clone().filter(|_| stage > LocatorStage::Entrances),
            floor: self.floor.clone().filter(|_| stage > LocatorStage::Floors),
            premises_type: self
                .premises_type
                .clone()
                .filter(|_| stage > LocatorStage::Types),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageQuery {
    Entrances,
    Floors {
        entrance: Option<String>,
    },
    Types {
        entrance: Option<String>,
        floor: String,
    },
    Units {
        entrance: Option<String>,
        floor: String,
        premises_type: String,
    },
}

impl StageQuery {
    #[must_use]
    pub fn stage(&self) -> LocatorStage {
        match self {
            Self::Entrances => LocatorStage::Entrances,
            Self::Floors { .. } => LocatorStage::Floors,
            Self::Types { .. } => LocatorStage::Types,
            Self::Units { .. } => LocatorStage::Units,
        }
    }
}

/// Identifies one in-flight fetch: its stage, a sequence number unique per
/// locator, and the selection path it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub stage: LocatorStage,
    pub sequence: u64,
    pub path: SelectionPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: FetchTicket,
    pub query: StageQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagePayload {
    Labels(Vec<String>),
    Units(Vec<UnitOption>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { follow_up: Option<FetchRequest> },
    Failed,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorPhase {
    Loading,
    LoadFailed,
    NoInventory,
    NoEntrances,
    HasEntrances,
    EntranceChosen,
    FloorChosen,
    TypeChosen,
    UnitChosen,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("entrance list has not loaded yet")]
    NotReady,
    #[error("building has no entrances")]
    EntrancesUnavailable,
    #[error("{stage} cannot be chosen before the previous stage")]
    PreconditionUnmet { stage: LocatorStage },
    #[error("{stage} selection must not be blank")]
    BlankLabel { stage: LocatorStage },
    #[error("{value:?} is not an offered {stage} option")]
    UnknownOption { stage: LocatorStage, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntranceMode {
    Unknown,
    Present,
    Absent,
}

/// Everything the contact form needs about the chosen unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProceedSelection {
    pub unit: UnitOption,
    pub entrance: Option<String>,
    pub floor: String,
    pub premises_type: String,
}

impl ProceedSelection {
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(entrance) = &self.entrance {
            parts.push(entrance_inline_label(entrance));
        }
        parts.push(format!("этаж {}", self.floor));
        parts.push(format!(
            "{} № {}",
            self.premises_type, self.unit.display_number
        ));
        format!("Выбрано: {}", parts.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct PremisesLocator {
    entrance_mode: EntranceMode,
    entrances: Vec<String>,
    floors: Vec<String>,
    types: Vec<String>,
    units: Vec<UnitOption>,
    selection: SelectionPath,
    unit: Option<UnitOption>,
    pending: [Option<FetchTicket>; 4],
    errors: [Option<String>; 4],
    next_sequence: u64,
}

impl PremisesLocator {
    /// A fresh locator plus the entrance request to run.
    #[must_use]
    pub fn start() -> (Self, FetchRequest) {
        let mut locator = Self {
            entrance_mode: EntranceMode::Unknown,
            entrances: Vec::new(),
            floors: Vec::new(),
            types: Vec::new(),
            units: Vec::new(),
            selection: SelectionPath::default(),
            unit: None,
            pending: [None, None, None, None],
            errors: [None, None, None, None],
            next_sequence: 0,
        };
        let request = locator.issue(StageQuery::Entrances);
        (locator, request)
    }

    /// Drops all state and asks for the entrance list again. Outstanding
    /// tickets become stale.
    pub fn reload(&mut self) -> FetchRequest {
        self.entrance_mode = EntranceMode::Unknown;
        self.entrances.clear();
        self.clear_choice(LocatorStage::Entrances);
        self.pending = [None, None, None, None];
        self.errors = [None, None, None, None];
        self.issue(StageQuery::Entrances)
    }

    pub fn select_entrance(&mut self, label: &str) -> Result<FetchRequest, LocatorError> {
        match self.entrance_mode {
            EntranceMode::Unknown => return Err(LocatorError::NotReady),
            EntranceMode::Absent => return Err(LocatorError::EntrancesUnavailable),
            EntranceMode::Present => {}
        }
        let entrance = pick_label(&self.entrances, label, LocatorStage::Entrances)?;
        self.clear_choice(LocatorStage::Entrances);
        self.selection.entrance = Some(entrance.clone());
        Ok(self.issue(StageQuery::Floors {
            entrance: Some(entrance),
        }))
    }

    pub fn select_floor(&mut self, label: &str) -> Result<FetchRequest, LocatorError> {
        if !self.floor_precondition_holds() {
            return Err(LocatorError::PreconditionUnmet {
                stage: LocatorStage::Floors,
            });
        }
        let floor = pick_label(&self.floors, label, LocatorStage::Floors)?;
        self.clear_choice(LocatorStage::Floors);
        self.selection.floor = Some(floor.clone());
        Ok(self.issue(StageQuery::Types {
            entrance: self.selection.entrance.clone(),
            floor,
        }))
    }

    pub fn select_type(&mut self, label: &str) -> Result<FetchRequest, LocatorError> {
        let Some(floor) = self.selection.floor.clone() else {
            return Err(LocatorError::PreconditionUnmet {
                stage: LocatorStage::Types,
            });
        };
        let premises_type = pick_label(&self.types, label, LocatorStage::Types)?;
        self.clear_choice(LocatorStage::Types);
        self.selection.premises_type = Some(premises_type.clone());
        Ok(self.issue(StageQuery::Units {
            entrance: self.selection.entrance.clone(),
            floor,
            premises_type,
        }))
    }

    pub fn select_unit(&mut self, unit_id: &str) -> Result<&UnitOption, LocatorError> {
        if self.selection.premises_type.is_none() {
            return Err(LocatorError::PreconditionUnmet {
                stage: LocatorStage::Units,
            });
        }
        let unit_id = unit_id.trim();
        if unit_id.is_empty() {
            return Err(LocatorError::BlankLabel {
                stage: LocatorStage::Units,
            });
        }
        let unit = self
            .units
            .iter()
            .find(|unit| unit.id == unit_id)
            .cloned()
            .ok_or_else(|| LocatorError::UnknownOption {
                stage: LocatorStage::Units,
                value: unit_id.to_string(),
            })?;
        Ok(self.unit.insert(unit))
    }

    /// Re-issues the fetch for `stage` with the current path, for a stage
    /// that failed and has no selection the user could re-trigger.
    pub fn retry(&mut self, stage: LocatorStage) -> Result<FetchRequest, LocatorError> {
        let query = match stage {
            LocatorStage::Entrances => return Ok(self.reload()),
            LocatorStage::Floors => {
                if !self.floor_precondition_holds() {
                    return Err(LocatorError::PreconditionUnmet { stage });
                }
                StageQuery::Floors {
                    entrance: self.selection.entrance.clone(),
                }
            }
            LocatorStage::Types => StageQuery::Types {
                entrance: self.selection.entrance.clone(),
                floor: self
                    .selection
                    .floor
                    .clone()
                    .ok_or(LocatorError::PreconditionUnmet { stage })?,
            },
            LocatorStage::Units => StageQuery::Units {
                entrance: self.selection.entrance.clone(),
                floor: self
                    .selection
                    .floor
                    .clone()
                    .ok_or(LocatorError::PreconditionUnmet { stage })?,
                premises_type: self
                    .selection
                    .premises_type
                    .clone()
                    .ok_or(LocatorError::PreconditionUnmet { stage })?,
            },
        };
        self.reset_from(stage);
        Ok(self.issue(query))
    }

    /// Applies a fetch result. Results for superseded tickets are ignored.
    pub fn apply(
        &mut self,
        ticket: &FetchTicket,
        result: Result<StagePayload, String>,
    ) -> ApplyOutcome {
        let slot = ticket.stage.index();
        if self.pending[slot].as_ref() != Some(ticket) {
            tracing::warn!(
                stage = %ticket.stage,
                sequence = ticket.sequence,
                "discarding stale premises response"
            );
            return ApplyOutcome::Stale;
        }
        self.pending[slot] = None;

        let payload = match result {
            Ok(payload) => payload,
            Err(message) => return self.fail(ticket.stage, message),
        };
        match (ticket.stage, payload) {
            (LocatorStage::Entrances, StagePayload::Labels(labels)) => {
                let labels = clean_labels(labels);
                self.errors[slot] = None;
                if labels.is_empty() {
                    tracing::debug!("building has no entrances, loading all floors");
                    self.entrance_mode = EntranceMode::Absent;
                    self.entrances.clear();
                    let follow_up = self.issue(StageQuery::Floors { entrance: None });
                    return ApplyOutcome::Applied {
                        follow_up: Some(follow_up),
                    };
                }
                self.entrance_mode = EntranceMode::Present;
                self.entrances = labels;
            }
            (LocatorStage::Floors, StagePayload::Labels(labels)) => {
                self.floors = clean_labels(labels);
            }
            (LocatorStage::Types, StagePayload::Labels(labels)) => {
                self.types = clean_labels(labels);
            }
            (LocatorStage::Units, StagePayload::Units(units)) => {
                self.units = units
                    .into_iter()
                    .filter_map(|unit| {
                        let id = unit.id.trim();
                        (!id.is_empty()).then(|| UnitOption {
                            id: id.to_string(),
                            display_number: unit.display_number.trim().to_string(),
                        })
                    })
                    .collect();
            }
            (stage, _) => return self.fail(stage, STAGE_LOAD_FAILED_MESSAGE.to_string()),
        }
        self.errors[slot] = None;
        ApplyOutcome::Applied { follow_up: None }
    }

    #[must_use]
    pub fn phase(&self) -> LocatorPhase {
        if self.unit.is_some() {
            return LocatorPhase::UnitChosen;
        }
        if self.selection.premises_type.is_some() {
            return LocatorPhase::TypeChosen;
        }
        if self.selection.floor.is_some() {
            return LocatorPhase::FloorChosen;
        }
        if self.selection.entrance.is_some() {
            return LocatorPhase::EntranceChosen;
        }
        match self.entrance_mode {
            EntranceMode::Present => LocatorPhase::HasEntrances,
            EntranceMode::Absent if self.inventory_is_empty() => LocatorPhase::NoInventory,
            EntranceMode::Absent => LocatorPhase::NoEntrances,
            EntranceMode::Unknown if self.errors[LocatorStage::Entrances.index()].is_some() => {
                LocatorPhase::LoadFailed
            }
            EntranceMode::Unknown => LocatorPhase::Loading,
        }
    }

    /// The empty-state text, when the building has nothing to choose from.
    #[must_use]
    pub fn empty_state_message(&self) -> Option<&'static str> {
        (self.phase() == LocatorPhase::NoInventory).then_some(EMPTY_INVENTORY_MESSAGE)
    }

    #[must_use]
    pub fn shows_entrance_control(&self) -> bool {
        self.entrance_mode == EntranceMode::Present
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.pending.iter().any(Option::is_some)
    }

    #[must_use]
    pub fn is_stage_loading(&self, stage: LocatorStage) -> bool {
        self.pending[stage.index()].is_some()
    }

    #[must_use]
    pub fn stage_error(&self, stage: LocatorStage) -> Option<&str> {
        self.errors[stage.index()].as_deref()
    }

    #[must_use]
    pub fn entrances(&self) -> &[String] {
        &self.entrances
    }

    #[must_use]
    pub fn floors(&self) -> &[String] {
        &self.floors
    }

    #[must_use]
    pub fn types(&self) -> &[String] {
        &self.types
    }

    #[must_use]
    pub fn units(&self) -> &[UnitOption] {
        &self.units
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionPath {
        &self.selection
    }

    #[must_use]
    pub fn selected_unit(&self) -> Option<&UnitOption> {
        self.unit.as_ref()
    }

    #[must_use]
    pub fn can_proceed(&self) -> bool {
        self.unit.is_some()
    }

    pub fn proceed(&self) -> Result<ProceedSelection, LocatorError> {
        let (Some(unit), Some(floor), Some(premises_type)) = (
            self.unit.clone(),
            self.selection.floor.clone(),
            self.selection.premises_type.clone(),
        ) else {
            return Err(LocatorError::PreconditionUnmet {
                stage: LocatorStage::Units,
            });
        };
        Ok(ProceedSelection {
            unit,
            entrance: self.selection.entrance.clone(),
            floor,
            premises_type,
        })
    }

    fn floor_precondition_holds(&self) -> bool {
        match self.entrance_mode {
            EntranceMode::Present => self.selection.entrance.is_some(),
            EntranceMode::Absent => true,
            EntranceMode::Unknown => false,
        }
    }

    fn inventory_is_empty(&self) -> bool {
        let floors = LocatorStage::Floors.index();
        self.floors.is_empty() && self.pending[floors].is_none() && self.errors[floors].is_none()
    }

    fn issue(&mut self, query: StageQuery) -> FetchRequest {
        let stage = query.stage();
        let ticket = FetchTicket {
            stage,
            sequence: self.next_sequence,
            path: self.selection.upstream_of(stage),
        };
        self.next_sequence += 1;
        self.pending[stage.index()] = Some(ticket.clone());
        tracing::debug!(
            stage = %stage,
            sequence = ticket.sequence,
            "issuing premises fetch"
        );
        FetchRequest { ticket, query }
    }

    fn fail(&mut self, stage: LocatorStage, message: String) -> ApplyOutcome {
        tracing::warn!(stage = %stage, %message, "premises fetch failed");
        self.clear_options(stage);
        self.errors[stage.index()] = Some(message);
        ApplyOutcome::Failed
    }

    /// Clears the stage's options as well as its choice and everything below.
    fn reset_from(&mut self, stage: LocatorStage) {
        self.clear_options(stage);
        self.errors[stage.index()] = None;
        self.clear_choice(stage);
    }

    /// Clears the choice made at `stage` and every option list, ticket and
    /// error that depends on it.
    fn clear_choice(&mut self, stage: LocatorStage) {
        self.clear_selection(stage);
        for below in stage.downstream() {
            self.clear_options(below);
            self.clear_selection(below);
            self.pending[below.index()] = None;
            self.errors[below.index()] = None;
        }
    }

    fn clear_selection(&mut self, stage: LocatorStage) {
        match stage {
            LocatorStage::Entrances => self.selection.entrance = None,
            LocatorStage::Floors => self.selection.floor = None,
            LocatorStage::Types => self.selection.premises_type = None,
            LocatorStage::Units => self.unit = None,
        }
    }

    fn clear_options(&mut self, stage: LocatorStage) {
        match stage {
            LocatorStage::Entrances => self.entrances.clear(),
            LocatorStage::Floors => self.floors.clear(),
            LocatorStage::Types => self.types.clear(),
            LocatorStage::Units => self.units.clear(),
        }
    }
}

/// Trimmed, non-blank labels in first-seen order without duplicates.
fn clean_labels(labels: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if !label.is_empty() && !cleaned.iter().any(|seen| seen == label) {
            cleaned.push(label.to_string());
        }
    }
    cleaned
}

fn pick_label(options: &[String], label: &str, stage: LocatorStage) -> Result<String, LocatorError> {
    let wanted = label.trim();
    if wanted.is_empty() {
        return Err(LocatorError::BlankLabel { stage });
    }
    options
        .iter()
        .find(|option| option.as_str() == wanted)
        .cloned()
        .ok_or_else(|| LocatorError::UnknownOption {
            stage,
            value: wanted.to_string(),
        })
}

/// Backend lookups behind the four stages.
#[async_trait(?Send)]
pub trait PremisesSource {
    type Error: Into<ApiError>;

    async fn list_entrances(&self) -> Result<Vec<String>, Self::Error>;
    async fn list_floors(&self, entrance: Option<&str>) -> Result<Vec<String>, Self::Error>;
    async fn list_types(
        &self,
        floor: &str,
        entrance: Option<&str>,
    ) -> Result<Vec<String>, Self::Error>;
    async fn list_units(
        &self,
        floor: &str,
        premises_type: &str,
        entrance: Option<&str>,
    ) -> Result<Vec<UnitOption>, Self::Error>;
}

pub async fn fetch_stage<S>(source: &S, query: &StageQuery) -> Result<StagePayload, ApiError>
where
    S: PremisesSource + ?Sized,
{
    let payload = match query {
        StageQuery::Entrances => StagePayload::Labels(source.list_entrances().await.map_err(Into::into)?),
        StageQuery::Floors { entrance } => StagePayload::Labels(
            source
                .list_floors(entrance.as_deref())
                .await
                .map_err(Into::into)?,
        ),
        StageQuery::Types { entrance, floor } => StagePayload::Labels(
            source
                .list_types(floor, entrance.as_deref())
                .await
                .map_err(Into::into)?,
        ),
        StageQuery::Units {
            entrance,
            floor,
            premises_type,
        } => StagePayload::Units(
            source
                .list_units(floor, premises_type, entrance.as_deref())
                .await
                .map_err(Into::into)?,
        ),
    };
    Ok(payload)
}

/// Runs the locator against a source, one request at a time.
#[derive(Debug)]
pub struct LocatorSession<S> {
    source: S,
    locator: PremisesLocator,
}

impl<S: PremisesSource> LocatorSession<S> {
    pub async fn open(source: S) -> Self {
        let (locator, request) = PremisesLocator::start();
        let mut session = Self { source, locator };
        session.run(request).await;
        session
    }

    #[must_use]
    pub fn locator(&self) -> &PremisesLocator {
        &self.locator
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub async fn choose_entrance(&mut self, label: &str) -> Result<ApplyOutcome, LocatorError> {
        let request = self.locator.select_entrance(label)?;
        Ok(self.run(request).await)
    }

    pub async fn choose_floor(&mut self, label: &str) -> Result<ApplyOutcome, LocatorError> {
        let request = self.locator.select_floor(label)?;
        Ok(self.run(request).await)
    }

    pub async fn choose_type(&mut self, label: &str) -> Result<ApplyOutcome, LocatorError> {
        let request = self.locator.select_type(label)?;
        Ok(self.run(request).await)
    }

    pub fn choose_unit(&mut self, unit_id: &str) -> Result<&UnitOption, LocatorError> {
        self.locator.select_unit(unit_id)
    }

    pub async fn retry(&mut self, stage: LocatorStage) -> Result<ApplyOutcome, LocatorError> {
        let request = self.locator.retry(stage)?;
        Ok(self.run(request).await)
    }

    pub async fn reload(&mut self) -> ApplyOutcome {
        let request = self.locator.reload();
        self.run(request).await
    }

    /// Runs `request` and any follow-up it triggers; returns the last outcome.
    async fn run(&mut self, request: FetchRequest) -> ApplyOutcome {
        let mut next = Some(request);
        let mut outcome = ApplyOutcome::Applied { follow_up: None };
        while let Some(request) = next.take() {
            let result = fetch_stage(&self.source, &request.query)
                .await
                .map_err(|error| error.message);
            outcome = self.locator.apply(&request.ticket, result);
            if let ApplyOutcome::Applied { follow_up } = &outcome {
                next.clone_from(follow_up);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    fn labels(items: &[&str]) -> StagePayload {
        StagePayload::Labels(items.iter().map(|item| (*item).to_string()).collect())
    }

    fn unit(id: &str, number: &str) -> UnitOption {
        UnitOption {
            id: id.to_string(),
            display_number: number.to_string(),
        }
    }

    fn loaded_with_entrances(entrances: &[&str]) -> PremisesLocator {
        let (mut locator, request) = PremisesLocator::start();
        let outcome = locator.apply(&request.ticket, Ok(labels(entrances)));
        assert_eq!(outcome, ApplyOutcome::Applied { follow_up: None });
        locator
    }

    #[test]
    fn cascade_scopes_each_query_to_the_path() {
        let mut locator = loaded_with_entrances(&["1", "2"]);
        assert_eq!(locator.phase(), LocatorPhase::HasEntrances);
        assert!(locator.shows_entrance_control());

        let floors = locator.select_entrance("1").expect("entrance");
        assert_eq!(
            floors.query,
            StageQuery::Floors {
                entrance: Some("1".to_string())
            }
        );
        locator.apply(&floors.ticket, Ok(labels(&["1", "2", "3"])));

        let types = locator.select_floor("3").expect("floor");
        locator.apply(&types.ticket, Ok(labels(&["Apartment", "Storage"])));

        let units = locator.select_type("Apartment").expect("type");
        assert_eq!(
            units.query,
            StageQuery::Units {
                entrance: Some("1".to_string()),
                floor: "3".to_string(),
                premises_type: "Apartment".to_string(),
            }
        );
        assert_eq!(
            units.ticket.path,
            SelectionPath {
                entrance: Some("1".to_string()),
                floor: Some("3".to_string()),
                premises_type: Some("Apartment".to_string()),
            }
        );
        locator.apply(
            &units.ticket,
            Ok(StagePayload::Units(vec![unit("77:01:0001:12", "12")])),
        );
        assert_eq!(locator.phase(), LocatorPhase::TypeChosen);

        locator.select_unit("77:01:0001:12").expect("unit");
        assert_eq!(locator.phase(), LocatorPhase::UnitChosen);
        let selection = locator.proceed().expect("proceed");
        assert_eq!(selection.entrance.as_deref(), Some("1"));
        assert_eq!(
            selection.describe(),
            "Выбрано: подъезд 1, этаж 3, Apartment № 12"
        );
    }

    #[test]
    fn changing_entrance_clears_everything_downstream() {
        let mut locator = loaded_with_entrances(&["1", "2"]);
        let floors = locator.select_entrance("1").expect("entrance");
        locator.apply(&floors.ticket, Ok(labels(&["3"])));
        let types = locator.select_floor("3").expect("floor");
        locator.apply(&types.ticket, Ok(labels(&["Apartment"])));
        let units = locator.select_type("Apartment").expect("type");
        locator.apply(&units.ticket, Ok(StagePayload::Units(vec![unit("a", "1")])));
        locator.select_unit("a").expect("unit");

        locator.select_entrance("2").expect("entrance");
        assert_eq!(locator.phase(), LocatorPhase::EntranceChosen);
        assert_eq!(locator.selection().entrance.as_deref(), Some("2"));
        assert_eq!(locator.selection().floor, None);
        assert_eq!(locator.selection().premises_type, None);
        assert_eq!(locator.selected_unit(), None);
        assert!(locator.floors().is_empty());
        assert!(locator.types().is_empty());
        assert!(locator.units().is_empty());
        assert!(locator.is_stage_loading(LocatorStage::Floors));
        assert!(!locator.is_stage_loading(LocatorStage::Units));
    }

    fn chosen_unit(locator: &mut PremisesLocator) {
        let floors = locator.select_entrance("1").expect("entrance");
        locator.apply(&floors.ticket, Ok(labels(&["3", "4"])));
        let types = locator.select_floor("3").expect("floor");
        locator.apply(&types.ticket, Ok(labels(&["Apartment", "Storage"])));
        let units = locator.select_type("Apartment").expect("type");
        locator.apply(&units.ticket, Ok(StagePayload::Units(vec![unit("a", "1")])));
        locator.select_unit("a").expect("unit");
    }

    #[test]
    fn changing_floor_clears_type_and_unit() {
        let mut locator = loaded_with_entrances(&["1", "2"]);
        chosen_unit(&mut locator);
        let in_flight = locator.select_type("Storage").expect("type");

        let types = locator.select_floor("4").expect("floor");
        assert_eq!(locator.phase(), LocatorPhase::FloorChosen);
        assert_eq!(locator.selection().entrance.as_deref(), Some("1"));
        assert_eq!(locator.selection().floor.as_deref(), Some("4"));
        assert_eq!(locator.selection().premises_type, None);
        assert_eq!(locator.selected_unit(), None);
        assert_eq!(locator.floors(), ["3".to_string(), "4".to_string()]);
        assert!(locator.types().is_empty());
        assert!(locator.units().is_empty());

        assert_eq!(
            locator.apply(
                &in_flight.ticket,
                Ok(StagePayload::Units(vec![unit("b", "2")]))
            ),
            ApplyOutcome::Stale
        );
        assert!(locator.units().is_empty());
        assert_eq!(
            locator.apply(&types.ticket, Ok(labels(&["Office"]))),
            ApplyOutcome::Applied { follow_up: None }
        );
        assert_eq!(locator.types(), ["Office".to_string()]);
    }

    #[test]
    fn changing_type_clears_unit() {
        let mut locator = loaded_with_entrances(&["1"]);
        chosen_unit(&mut locator);

        locator.select_type("Storage").expect("type");
        assert_eq!(locator.phase(), LocatorPhase::TypeChosen);
        assert_eq!(locator.selection().floor.as_deref(), Some("3"));
        assert_eq!(locator.selection().premises_type.as_deref(), Some("Storage"));
        assert_eq!(locator.selected_unit(), None);
        assert_eq!(locator.types().len(), 2);
        assert!(locator.units().is_empty());
        assert!(locator.is_stage_loading(LocatorStage::Units));
    }

    #[test]
    fn retrying_types_drops_the_chosen_type() {
        let mut locator = loaded_with_entrances(&["1"]);
        chosen_unit(&mut locator);

        let retry = locator.retry(LocatorStage::Types).expect("retry");
        assert_eq!(
            retry.query,
            StageQuery::Types {
                entrance: Some("1".to_string()),
                floor: "3".to_string()
            }
        );
        assert_eq!(locator.selection().floor.as_deref(), Some("3"));
        assert_eq!(locator.selection().premises_type, None);
        assert_eq!(locator.selected_unit(), None);
        assert!(locator.types().is_empty());
        assert!(locator.units().is_empty());
        assert_eq!(locator.phase(), LocatorPhase::FloorChosen);
    }

    #[test]
    fn labels_are_trimmed_and_deduplicated() {
        let mut locator = loaded_with_entrances(&[" 1", "1", "2 ", " "]);
        assert_eq!(locator.entrances(), ["1".to_string(), "2".to_string()]);

        let floors = locator.select_entrance(" 1").expect("entrance");
        assert_eq!(locator.selection().entrance.as_deref(), Some("1"));
        assert_eq!(
            floors.query,
            StageQuery::Floors {
                entrance: Some("1".to_string())
            }
        );
        assert_eq!(floors.ticket.path.entrance.as_deref(), Some("1"));

        locator.apply(&floors.ticket, Ok(labels(&["3", " 3 "])));
        assert_eq!(locator.floors(), ["3".to_string()]);
    }

    #[test]
    fn stale_floor_response_is_discarded() {
        let mut locator = loaded_with_entrances(&["1", "2"]);
        let first = locator.select_entrance("1").expect("entrance 1");
        let second = locator.select_entrance("2").expect("entrance 2");

        assert_eq!(
            locator.apply(&first.ticket, Ok(labels(&["1", "2", "3"]))),
            ApplyOutcome::Stale
        );
        assert!(locator.floors().is_empty());

        locator.apply(&second.ticket, Ok(labels(&["7"])));
        assert_eq!(locator.floors(), ["7".to_string()]);
        assert_eq!(
            locator.apply(&second.ticket, Ok(labels(&["8"]))),
            ApplyOutcome::Stale
        );
    }

    #[test]
    fn entrance_less_building_loads_unfiltered_floors() {
        let (mut locator, request) = PremisesLocator::start();
        let outcome = locator.apply(&request.ticket, Ok(labels(&[])));
        let ApplyOutcome::Applied {
            follow_up: Some(floors),
        } = outcome
        else {
            unreachable!("expected a floors follow-up");
        };
        assert_eq!(floors.query, StageQuery::Floors { entrance: None });
        assert!(!locator.shows_entrance_control());
        assert_eq!(
            locator.select_entrance("1"),
            Err(LocatorError::EntrancesUnavailable)
        );

        locator.apply(&floors.ticket, Ok(labels(&["1", "2"])));
        assert_eq!(locator.phase(), LocatorPhase::NoEntrances);
        let types = locator.select_floor("2").expect("floor");
        assert_eq!(
            types.query,
            StageQuery::Types {
                entrance: None,
                floor: "2".to_string()
            }
        );
    }

    #[test]
    fn no_entrances_and_no_floors_is_empty_inventory() {
        let (mut locator, request) = PremisesLocator::start();
        let ApplyOutcome::Applied {
            follow_up: Some(floors),
        } = locator.apply(&request.ticket, Ok(labels(&["  "])))
        else {
            unreachable!("expected a floors follow-up");
        };
        assert_eq!(locator.phase(), LocatorPhase::NoEntrances);
        locator.apply(&floors.ticket, Ok(labels(&[])));
        assert_eq!(locator.phase(), LocatorPhase::NoInventory);
        assert_eq!(locator.empty_state_message(), Some(EMPTY_INVENTORY_MESSAGE));
    }

    #[test]
    fn failed_stage_records_error_and_retry_clears_it() {
        let mut locator = loaded_with_entrances(&["1"]);
        let floors = locator.select_entrance("1").expect("entrance");
        assert_eq!(
            locator.apply(&floors.ticket, Err("Ошибка сети".to_string())),
            ApplyOutcome::Failed
        );
        assert!(locator.floors().is_empty());
        assert_eq!(locator.stage_error(LocatorStage::Floors), Some("Ошибка сети"));

        let again = locator.select_entrance("1").expect("re-select entrance");
        assert_eq!(locator.stage_error(LocatorStage::Floors), None);
        locator.apply(&again.ticket, Ok(labels(&["4"])));
        assert_eq!(locator.floors(), ["4".to_string()]);
    }

    #[test]
    fn entrance_failure_is_load_failed_until_reload() {
        let (mut locator, request) = PremisesLocator::start();
        assert_eq!(locator.phase(), LocatorPhase::Loading);
        locator.apply(&request.ticket, Err("Ошибка сети".to_string()));
        assert_eq!(locator.phase(), LocatorPhase::LoadFailed);
        assert_eq!(locator.select_entrance("1"), Err(LocatorError::NotReady));

        let reload = locator.retry(LocatorStage::Entrances).expect("reload");
        assert_eq!(reload.query, StageQuery::Entrances);
        assert_eq!(
            locator.apply(&request.ticket, Ok(labels(&["1"]))),
            ApplyOutcome::Stale
        );
        locator.apply(&reload.ticket, Ok(labels(&["1"])));
        assert_eq!(locator.phase(), LocatorPhase::HasEntrances);
    }

    #[test]
    fn blank_and_unknown_labels_are_not_selections() {
        let mut locator = loaded_with_entrances(&["1", " ", ""]);
        assert_eq!(locator.entrances(), ["1".to_string()]);
        assert_eq!(
            locator.select_entrance("   "),
            Err(LocatorError::BlankLabel {
                stage: LocatorStage::Entrances
            })
        );
        assert_eq!(
            locator.select_entrance("9"),
            Err(LocatorError::UnknownOption {
                stage: LocatorStage::Entrances,
                value: "9".to_string()
            })
        );
        assert_eq!(
            locator.select_floor("1"),
            Err(LocatorError::PreconditionUnmet {
                stage: LocatorStage::Floors
            })
        );
        assert_eq!(
            locator.select_type("Apartment"),
            Err(LocatorError::PreconditionUnmet {
                stage: LocatorStage::Types
            })
        );
    }

    #[test]
    fn mismatched_payload_is_a_stage_failure() {
        let mut locator = loaded_with_entrances(&["1"]);
        let floors = locator.select_entrance("1").expect("entrance");
        assert_eq!(
            locator.apply(&floors.ticket, Ok(StagePayload::Units(Vec::new()))),
            ApplyOutcome::Failed
        );
        assert_eq!(
            locator.stage_error(LocatorStage::Floors),
            Some(STAGE_LOAD_FAILED_MESSAGE)
        );
    }

    #[test]
    fn unit_option_accepts_numeric_ids() {
        let parsed: Vec<UnitOption> = serde_json::from_str(
            r#"[{"premise_id": "77:01:0001:12", "number": 12}, {"premise_id": 5, "number": null}]"#,
        )
        .expect("units");
        assert_eq!(parsed, vec![unit("77:01:0001:12", "12"), unit("5", "")]);
    }

    #[derive(Default)]
    struct FakeBuilding {
        floors_by_entrance: BTreeMap<Option<String>, Vec<String>>,
        entrances: Vec<String>,
        calls: RefCell<Vec<String>>,
    }

    #[async_trait(?Send)]
    impl PremisesSource for FakeBuilding {
        type Error = ApiError;

        async fn list_entrances(&self) -> Result<Vec<String>, Self::Error> {
            self.calls.borrow_mut().push("entrances".to_string());
            Ok(self.entrances.clone())
        }

        async fn list_floors(&self, entrance: Option<&str>) -> Result<Vec<String>, Self::Error> {
            self.calls
                .borrow_mut()
                .push(format!("floors entrance={entrance:?}"));
            Ok(self
                .floors_by_entrance
                .get(&entrance.map(str::to_string))
                .cloned()
                .unwrap_or_default())
        }

        async fn list_types(
            &self,
            floor: &str,
            entrance: Option<&str>,
        ) -> Result<Vec<String>, Self::Error> {
            self.calls
                .borrow_mut()
                .push(format!("types floor={floor} entrance={entrance:?}"));
            Ok(vec!["Квартира".to_string()])
        }

        async fn list_units(
            &self,
            floor: &str,
            premises_type: &str,
            entrance: Option<&str>,
        ) -> Result<Vec<UnitOption>, Self::Error> {
            self.calls.borrow_mut().push(format!(
                "units floor={floor} type={premises_type} entrance={entrance:?}"
            ));
            Err(ApiError::network())
        }
    }

    #[tokio::test]
    async fn session_never_filters_floors_by_entrance_in_entrance_less_building() {
        let building = FakeBuilding {
            floors_by_entrance: BTreeMap::from([(None, vec!["1".to_string()])]),
            ..FakeBuilding::default()
        };
        let mut session = LocatorSession::open(building).await;
        assert_eq!(session.locator().phase(), LocatorPhase::NoEntrances);
        assert_eq!(session.locator().floors(), ["1".to_string()]);

        session.choose_floor("1").await.expect("floor");
        let outcome = session.choose_type("Квартира").await.expect("type");
        assert_eq!(outcome, ApplyOutcome::Failed);
        assert_eq!(
            session.locator().stage_error(LocatorStage::Units),
            Some("Ошибка сети")
        );

        let calls = session.into_source().calls.into_inner();
        assert_eq!(
            calls,
            vec![
                "entrances".to_string(),
                "floors entrance=None".to_string(),
                "types floor=1 entrance=None".to_string(),
                "units floor=1 type=Квартира entrance=None".to_string(),
            ]
        );
    }
}
