use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::common::{GeoPoint, OwnerId, RequestId};
use crate::domains::requests::error::{RequestError, Result};

/// Largest supported travel range; also the cascade radius for DM changes.
pub const MAX_TRAVEL_RANGE_MILES: u32 = 500;

/// Travel range applied when the submitter does not pick one.
pub const DEFAULT_TRAVEL_RANGE_MILES: u32 = 1;

// =============================================================================
// Game system
// =============================================================================

/// Closed set of supported rule systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GameSystem {
    #[serde(rename = "3.5e")]
    ThreeFiveE,
    #[serde(rename = "PF")]
    Pathfinder,
    #[serde(rename = "4e")]
    FourE,
    #[serde(rename = "5e")]
    FiveE,
    #[serde(rename = "6e")]
    SixEPlaytest,
}

impl GameSystem {
    pub const ALL: [GameSystem; 5] = [
        Self::ThreeFiveE,
        Self::Pathfinder,
        Self::FourE,
        Self::FiveE,
        Self::SixEPlaytest,
    ];

    /// Storage tag, e.g. `"5e"`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreeFiveE => "3.5e",
            Self::Pathfinder => "PF",
            Self::FourE => "4e",
            Self::FiveE => "5e",
            Self::SixEPlaytest => "6e",
        }
    }

    /// Human-readable name used in notifications
    pub fn label(&self) -> &'static str {
        match self {
            Self::ThreeFiveE => "D&D 3.5e",
            Self::Pathfinder => "Pathfinder",
            Self::FourE => "D&D 4e",
            Self::FiveE => "D&D 5e",
            Self::SixEPlaytest => "D&D 6e Playtest",
        }
    }
}

impl fmt::Display for GameSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameSystem {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|system| system.as_str() == s.trim())
            .ok_or_else(|| RequestError::InvalidSystem(s.to_string()))
    }
}

// =============================================================================
// Role
// =============================================================================

/// What the submitter offers: hosting a table, or a seat at one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Dm,
    Player,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Player => "player",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "dm" => Ok(Self::Dm),
            "player" => Ok(Self::Player),
            _ => Err(RequestError::InvalidRole(s.to_string())),
        }
    }
}

// =============================================================================
// Address
// =============================================================================

/// Postal address; edited as a unit, compared field by field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        postal_code: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            postal_code: postal_code.into(),
        }
    }

    /// Single-line form sent to geocoding providers
    pub fn one_line(&self) -> String {
        [&self.street, &self.city, &self.state, &self.postal_code]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Case- and whitespace-insensitive key, so "12 Main St" and "12  main st"
    /// hit the same geocode cache entry.
    pub fn normalized(&self) -> NormalizedAddress {
        fn norm(s: &str) -> String {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        }
        NormalizedAddress {
            street: norm(&self.street),
            city: norm(&self.city),
            state: norm(&self.state),
            postal_code: norm(&self.postal_code),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl NormalizedAddress {
    /// Stable text form, used to seed synthetic coordinates.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

// =============================================================================
// GameRequest
// =============================================================================

/// One user's offer to run, or wish to join, a game of one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRequest {
    pub id: RequestId,
    pub owner: OwnerId,
    pub name: String,
    pub system: GameSystem,
    pub role: Role,
    pub travel_range: u32,
    pub address: Address,
    /// Unset until the geocoder resolves `address`
    pub coordinates: Option<GeoPoint>,
    /// DM requests this request can reach. Recomputed, never edited by callers.
    pub candidate_dms: BTreeSet<RequestId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameRequest {
    /// Build a fresh record from a validated submission.
    pub fn from_new(new: NewRequest) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            owner: new.owner,
            name: new.name,
            system: new.system,
            role: new.role,
            travel_range: new.travel_range,
            address: new.address,
            coordinates: None,
            candidate_dms: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_dm(&self) -> bool {
        self.role == Role::Dm
    }

    pub fn is_resolved(&self) -> bool {
        self.coordinates.is_some()
    }

    /// Distance to another resolved request, if both are resolved.
    pub fn distance_to(&self, other: &GameRequest) -> Option<f64> {
        match (&self.coordinates, &other.coordinates) {
            (Some(a), Some(b)) => Some(a.distance_miles(b)),
            _ => None,
        }
    }

    /// Apply a patch in place and report which fields actually changed value.
    ///
    /// Writing a field's current value back is not a change.
    pub fn apply(&mut self, patch: &RequestPatch) -> ChangedFields {
        let mut changed = ChangedFields::default();
        let c = &patch.changes;

        if let Some(name) = &c.name {
            if *name != self.name {
                self.name = name.clone();
                changed.insert(RequestField::Name);
            }
        }
        if let Some(system) = c.system {
            if system != self.system {
                self.system = system;
                changed.insert(RequestField::System);
            }
        }
        if let Some(role) = c.role {
            if role != self.role {
                self.role = role;
                changed.insert(RequestField::Role);
            }
        }
        if let Some(range) = c.travel_range {
            if range != self.travel_range {
                self.travel_range = range;
                changed.insert(RequestField::TravelRange);
            }
        }
        if let Some(address) = &c.address {
            let fields = [
                (&mut self.address.street, &address.street, RequestField::Street),
                (&mut self.address.city, &address.city, RequestField::City),
                (&mut self.address.state, &address.state, RequestField::State),
                (
                    &mut self.address.postal_code,
                    &address.postal_code,
                    RequestField::PostalCode,
                ),
            ];
            for (current, next, field) in fields {
                if current != next {
                    *current = next.clone();
                    changed.insert(field);
                }
            }
        }
        if let Some(coordinates) = patch.coordinates {
            if coordinates != self.coordinates {
                self.coordinates = coordinates;
                changed.insert(RequestField::Coordinates);
            }
        }
        if let Some(candidates) = &patch.candidate_dms {
            if *candidates != self.candidate_dms {
                self.candidate_dms = candidates.clone();
                changed.insert(RequestField::CandidateDms);
            }
        }

        if !changed.is_empty() {
            self.updated_at = Utc::now();
        }
        changed
    }
}

// =============================================================================
// Mutations
// =============================================================================

/// A submission that has not been assigned an id yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub owner: OwnerId,
    pub name: String,
    pub system: GameSystem,
    pub role: Role,
    #[serde(default = "default_travel_range")]
    pub travel_range: u32,
    pub address: Address,
}

fn default_travel_range() -> u32 {
    DEFAULT_TRAVEL_RANGE_MILES
}

impl NewRequest {
    pub fn new(
        owner: OwnerId,
        name: impl Into<String>,
        system: GameSystem,
        role: Role,
        address: Address,
    ) -> Self {
        Self {
            owner,
            name: name.into(),
            system,
            role,
            travel_range: DEFAULT_TRAVEL_RANGE_MILES,
            address,
        }
    }

    pub fn with_travel_range(mut self, miles: u32) -> Self {
        self.travel_range = miles;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_travel_range(self.travel_range)
    }
}

/// Caller-editable fields. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system: Option<GameSystem>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub travel_range: Option<u32>,
    #[serde(default)]
    pub address: Option<Address>,
}

impl RequestChanges {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn system(mut self, system: GameSystem) -> Self {
        self.system = Some(system);
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn travel_range(mut self, miles: u32) -> Self {
        self.travel_range = Some(miles);
        self
    }

    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.travel_range {
            Some(range) => validate_travel_range(range),
            None => Ok(()),
        }
    }
}

/// Everything a store commit may touch.
///
/// `coordinates` and `candidate_dms` are written only by the pipeline; a patch
/// carrying nothing else is a recompute-only commit and never triggers
/// re-resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    pub changes: RequestChanges,
    pub coordinates: Option<Option<GeoPoint>>,
    pub candidate_dms: Option<BTreeSet<RequestId>>,
}

impl RequestPatch {
    pub fn from_changes(changes: RequestChanges) -> Self {
        Self {
            changes,
            ..Default::default()
        }
    }

    pub fn coordinates(coordinates: Option<GeoPoint>) -> Self {
        Self {
            coordinates: Some(coordinates),
            ..Default::default()
        }
    }

    pub fn candidates(candidate_dms: BTreeSet<RequestId>) -> Self {
        Self {
            candidate_dms: Some(candidate_dms),
            ..Default::default()
        }
    }

    pub fn is_recompute_only(&self) -> bool {
        self.changes == RequestChanges::default()
    }
}

fn validate_travel_range(range: u32) -> Result<()> {
    if range == 0 || range > MAX_TRAVEL_RANGE_MILES {
        return Err(RequestError::InvalidTravelRange {
            got: range,
            max: MAX_TRAVEL_RANGE_MILES,
        });
    }
    Ok(())
}

// =============================================================================
// Change tracking
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestField {
    Name,
    System,
    Role,
    TravelRange,
    Street,
    City,
    State,
    PostalCode,
    Coordinates,
    CandidateDms,
}

impl RequestField {
    pub fn is_location(&self) -> bool {
        matches!(
            self,
            Self::Street | Self::City | Self::State | Self::PostalCode
        )
    }
}

/// The set of fields whose value a commit actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedFields(BTreeSet<RequestField>);

impl ChangedFields {
    pub fn insert(&mut self, field: RequestField) {
        self.0.insert(field);
    }

    pub fn contains(&self, field: RequestField) -> bool {
        self.0.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Any of street, city, state or postal code changed.
    pub fn is_location_change(&self) -> bool {
        self.0.iter().any(RequestField::is_location)
    }

    pub fn iter(&self) -> impl Iterator<Item = RequestField> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<RequestField> for ChangedFields {
    fn from_iter<I: IntoIterator<Item = RequestField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of a store update: the new record plus what changed.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub request: GameRequest,
    pub changed: ChangedFields,
}
