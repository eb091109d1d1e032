//! Task payload parsing.
//!
//! Envelope:
//!
//! ```json
//! { "source": "tgn", "action": "add", "type": "pit",
//!   "data": { "id": "7006952", "name": "Amsterdam", "type": "hg:Place" } }
//! ```
//!
//! Canonical-ID fragments without a `/` are namespaced with `source`.
//! Empty string fields count as absent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::identity::{self, IdMethod};
use crate::model::{tokens, PropertyMap, Value};
use crate::taxonomy::RelationType;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Pit,
    Relation,
}

/// A PIT as carried by add and update tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitData {
    pub hgid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub pit_type: String,
    pub source: String,
    pub uri: Option<String>,
    /// Geometry as a serialized JSON string.
    pub geometry: Option<String>,
    pub has_beginning: Option<String>,
    pub has_end: Option<String>,
    /// Opaque blob as a serialized JSON string.
    pub data: Option<String>,
}

impl PitData {
    /// Node properties for this PIT. Absent optionals are left out.
    pub fn to_properties(&self) -> PropertyMap {
        use tokens::pit;
        let mut props = PropertyMap::new();
        props.insert(pit::HGID.into(), Value::from(self.hgid.as_str()));
        props.insert(pit::NAME.into(), Value::from(self.name.as_str()));
        props.insert(pit::TYPE.into(), Value::from(self.pit_type.as_str()));
        props.insert(pit::SOURCE.into(), Value::from(self.source.as_str()));
        let optional = [
            (pit::URI, &self.uri),
            (pit::GEOMETRY, &self.geometry),
            (pit::HAS_BEGINNING, &self.has_beginning),
            (pit::HAS_END, &self.has_end),
            (pit::DATA, &self.data),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                props.insert(key.into(), Value::from(v.as_str()));
            }
        }
        props
    }
}

/// A relation between two identified endpoints.
///
/// This is also the shape reported back when relations are removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationParams {
    pub from: String,
    pub from_id_method: IdMethod,
    pub to: String,
    pub to_id_method: IdMethod,
    pub label: RelationType,
    pub source: String,
}

/// The outer shape of every payload. `data` is walked per task type.
#[derive(Deserialize)]
struct Envelope {
    source: Option<String>,
    action: Action,
    #[serde(rename = "type")]
    task_type: TaskType,
    data: Option<Map<String, Json>>,
}

/// One parsed queue task.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    AddPit(PitData),
    UpdatePit(PitData),
    DeletePit { hgid: String },
    AddRelation {
        relation: RelationParams,
        /// Set when the payload is a retry of a previously rejected relation.
        rejection_cause: Option<String>,
    },
    UpdateRelation(RelationParams),
    DeleteRelation(RelationParams),
}

impl Task {
    pub fn action(&self) -> Action {
        match self {
            Task::AddPit(_) | Task::AddRelation { .. } => Action::Add,
            Task::UpdatePit(_) | Task::UpdateRelation(_) => Action::Update,
            Task::DeletePit { .. } | Task::DeleteRelation(_) => Action::Delete,
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Task::AddPit(_) | Task::UpdatePit(_) | Task::DeletePit { .. } => TaskType::Pit,
            _ => TaskType::Relation,
        }
    }

    /// Parse a JSON payload. Every failure is `Error::Malformed`.
    pub fn parse(payload: &str) -> Result<Task> {
        let json: Json = serde_json::from_str(payload)
            .map_err(|e| Error::Malformed(format!("invalid JSON: {e}")))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &Json) -> Result<Task> {
        let Envelope { source, action, task_type, data } = Envelope::deserialize(json)
            .map_err(|e| Error::Malformed(format!("invalid task: {e}")))?;
        let source = source
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Malformed("missing field: source".into()))?;
        let data = &data.ok_or_else(|| Error::Malformed("no data in task".into()))?;

        Ok(match (task_type, action) {
            (TaskType::Pit, Action::Add) => Task::AddPit(parse_pit(data, &source)?),
            (TaskType::Pit, Action::Update) => Task::UpdatePit(parse_pit(data, &source)?),
            (TaskType::Pit, Action::Delete) => Task::DeletePit {
                hgid: identity::namespace(&source, &required(data, "id")?),
            },
            (TaskType::Relation, Action::Add) => Task::AddRelation {
                relation: parse_relation(data, &source)?,
                rejection_cause: optional(data, "rejectionCause"),
            },
            (TaskType::Relation, Action::Update) => {
                Task::UpdateRelation(parse_relation(data, &source)?)
            }
            (TaskType::Relation, Action::Delete) => {
                Task::DeleteRelation(parse_relation(data, &source)?)
            }
        })
    }
}

fn parse_pit(data: &Map<String, Json>, source: &str) -> Result<PitData> {
    Ok(PitData {
        hgid: identity::namespace(source, &required(data, "id")?),
        name: required(data, "name")?,
        pit_type: required(data, "type")?,
        source: source.to_owned(),
        uri: optional(data, "uri"),
        geometry: optional(data, "geometry"),
        has_beginning: optional(data, "hasBeginning"),
        has_end: optional(data, "hasEnd"),
        data: optional(data, "data"),
    })
}

fn parse_relation(data: &Map<String, Json>, source: &str) -> Result<RelationParams> {
    let from = required(data, "from")?;
    let to = required(data, "to")?;
    Ok(RelationParams {
        from_id_method: identity::classify(&from),
        from: identity::namespace(source, &from),
        to_id_method: identity::classify(&to),
        to: identity::namespace(source, &to),
        label: RelationType::from_label(&required(data, "label")?)?,
        source: source.to_owned(),
    })
}

/// String form of a field: strings as-is, scalars printed, objects and
/// arrays serialized. Null and empty strings are absent.
fn optional(obj: &Map<String, Json>, key: &str) -> Option<String> {
    let s = match obj.get(key)? {
        Json::Null => return None,
        Json::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

fn required(obj: &Map<String, Json>, key: &str) -> Result<String> {
    optional(obj, key).ok_or_else(|| Error::Malformed(format!("missing field: {key}")))
}
