use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{Error, Result, vector};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
	#[serde(rename = "SYSTEM")]
	System,
	#[serde(rename = "LEARNED")]
	Learned,
	#[serde(rename = "MEMORY")]
	Memory,
	#[serde(rename = "semantic")]
	Semantic,
	#[serde(rename = "episodic")]
	Episodic,
	#[serde(rename = "procedural")]
	Procedural,
	#[serde(rename = "fact")]
	Fact,
}

impl MemoryType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::System => "SYSTEM",
			Self::Learned => "LEARNED",
			Self::Memory => "MEMORY",
			Self::Semantic => "semantic",
			Self::Episodic => "episodic",
			Self::Procedural => "procedural",
			Self::Fact => "fact",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"SYSTEM" => Ok(Self::System),
			"LEARNED" => Ok(Self::Learned),
			"MEMORY" => Ok(Self::Memory),
			"semantic" => Ok(Self::Semantic),
			"episodic" => Ok(Self::Episodic),
			"procedural" => Ok(Self::Procedural),
			"fact" => Ok(Self::Fact),
			other => Err(Error::InvalidArgument(format!("Unknown memory type {other:?}."))),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
	Person,
	Organization,
	Project,
	Concept,
	Location,
	Event,
}

impl EntityType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Person => "person",
			Self::Organization => "organization",
			Self::Project => "project",
			Self::Concept => "concept",
			Self::Location => "location",
			Self::Event => "event",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"person" => Ok(Self::Person),
			"organization" => Ok(Self::Organization),
			"project" => Ok(Self::Project),
			"concept" => Ok(Self::Concept),
			"location" => Ok(Self::Location),
			"event" => Ok(Self::Event),
			other => Err(Error::InvalidArgument(format!("Unknown entity type {other:?}."))),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	Incoming,
	Outgoing,
	None,
}

impl Direction {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Incoming => "incoming",
			Self::Outgoing => "outgoing",
			Self::None => "none",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"incoming" => Ok(Self::Incoming),
			"outgoing" => Ok(Self::Outgoing),
			"none" => Ok(Self::None),
			other => Err(Error::InvalidArgument(format!("Unknown direction {other:?}."))),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteState {
	Pending,
	InFlight,
	Failed,
}

impl WriteState {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::InFlight => "in_flight",
			Self::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"pending" => Ok(Self::Pending),
			"in_flight" => Ok(Self::InFlight),
			"failed" => Ok(Self::Failed),
			other => Err(Error::InvalidArgument(format!("Unknown write state {other:?}."))),
		}
	}
}

#[derive(Clone, Debug, FromRow)]
pub struct User {
	pub user_id: String,
	pub email: String,
	pub display_name: String,
	pub is_active: bool,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct Memory {
	pub id: String,
	pub user_id: String,
	pub title: String,
	pub content: String,
	pub memory_type: MemoryType,
	pub importance: f32,
	pub tags: Vec<String>,
	pub entity_refs: Vec<String>,
	pub embedding: Option<Vec<f32>>,
	pub metadata: Map<String, Value>,
	pub is_archived: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

/// Raw `memories` row. The id is `Option` on purpose: SQLite permits NULL in
/// a TEXT primary key, and the backfill scanner has to survive such rows.
#[derive(Clone, Debug, FromRow)]
pub struct MemoryRow {
	pub id: Option<String>,
	pub user_id: String,
	pub title: String,
	pub content: String,
	pub memory_type: String,
	pub importance: f32,
	pub tags: String,
	pub entity_refs: String,
	pub embedding: Option<Vec<u8>>,
	pub metadata: String,
	pub is_archived: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

impl MemoryRow {
	pub fn into_memory(self) -> Result<Memory> {
		let id = self
			.id
			.ok_or_else(|| Error::InvariantViolation("Memory row has a null id.".to_string()))?;
		let embedding = match self.embedding {
			Some(raw) if !raw.is_empty() => Some(vector::decode_vector(&raw)?),
			_ => None,
		};

		Ok(Memory {
			id,
			user_id: self.user_id,
			title: self.title,
			content: self.content,
			memory_type: MemoryType::parse(&self.memory_type)?,
			importance: self.importance,
			tags: decode_string_list(&self.tags)?,
			entity_refs: decode_string_list(&self.entity_refs)?,
			embedding,
			metadata: decode_metadata(&self.metadata)?,
			is_archived: self.is_archived,
			created_at: self.created_at,
			updated_at: self.updated_at,
		})
	}
}

#[derive(Clone, Debug)]
pub struct Entity {
	pub id: String,
	pub user_id: String,
	pub entity_type: String,
	pub name: String,
	pub person_type: Option<String>,
	pub first_name: Option<String>,
	pub last_name: Option<String>,
	pub company: Option<String>,
	pub title: Option<String>,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub address: Option<String>,
	pub website: Option<String>,
	pub notes: Option<String>,
	pub tags: Vec<String>,
	pub importance: f32,
	pub metadata: Map<String, Value>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, FromRow)]
pub struct EntityRow {
	pub id: String,
	pub user_id: String,
	pub entity_type: String,
	pub name: String,
	pub person_type: Option<String>,
	pub first_name: Option<String>,
	pub last_name: Option<String>,
	pub company: Option<String>,
	pub title: Option<String>,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub address: Option<String>,
	pub website: Option<String>,
	pub notes: Option<String>,
	pub tags: String,
	pub importance: f32,
	pub metadata: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

impl EntityRow {
	pub fn into_entity(self) -> Result<Entity> {
		Ok(Entity {
			id: self.id,
			user_id: self.user_id,
			entity_type: self.entity_type,
			name: self.name,
			person_type: self.person_type,
			first_name: self.first_name,
			last_name: self.last_name,
			company: self.company,
			title: self.title,
			email: self.email,
			phone: self.phone,
			address: self.address,
			website: self.website,
			notes: self.notes,
			tags: decode_string_list(&self.tags)?,
			importance: self.importance,
			metadata: decode_metadata(&self.metadata)?,
			created_at: self.created_at,
			updated_at: self.updated_at,
		})
	}
}

#[derive(Clone, Debug)]
pub struct Interaction {
	pub id: String,
	pub user_id: String,
	pub entity_refs: Vec<String>,
	pub content: String,
	pub direction: Direction,
	pub occurred_at: OffsetDateTime,
}

#[derive(Clone, Debug, FromRow)]
pub struct InteractionRow {
	pub id: String,
	pub user_id: String,
	pub entity_refs: String,
	pub content: String,
	pub direction: String,
	pub occurred_at: OffsetDateTime,
}

impl InteractionRow {
	pub fn into_interaction(self) -> Result<Interaction> {
		Ok(Interaction {
			id: self.id,
			user_id: self.user_id,
			entity_refs: decode_string_list(&self.entity_refs)?,
			content: self.content,
			direction: Direction::parse(&self.direction)?,
			occurred_at: self.occurred_at,
		})
	}
}

#[derive(Clone, Debug, FromRow)]
pub struct UsageRecord {
	pub id: String,
	pub user_id: String,
	pub provider: String,
	pub operation: String,
	pub tokens: i64,
	pub cost: f64,
	pub timestamp: OffsetDateTime,
}

#[derive(Clone, Debug, FromRow)]
pub struct BufferedWrite {
	pub id: String,
	pub user_id: String,
	pub memory_id: String,
	pub payload: String,
	pub attempts: i64,
	pub next_attempt_at: OffsetDateTime,
	pub state: String,
	pub last_error: Option<String>,
	pub enqueued_at: OffsetDateTime,
}

/// Payload carried by a buffered write. Serialized to JSON in the queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BufferedPayload {
	CreateMemory { draft: MemoryDraft },
	UpdateMemory { id: String, patch: MemoryPatch },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryDraft {
	pub id: String,
	pub title: String,
	pub content: String,
	pub memory_type: MemoryType,
	pub importance: f32,
	pub tags: Vec<String>,
	pub entity_refs: Vec<String>,
	pub metadata: Map<String, Value>,
	pub generate_embedding: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemoryPatch {
	pub title: Option<String>,
	pub content: Option<String>,
	pub memory_type: Option<MemoryType>,
	pub importance: Option<f32>,
	pub tags: Option<Vec<String>>,
	pub entity_refs: Option<Vec<String>>,
	pub metadata: Option<Map<String, Value>>,
	pub is_archived: Option<bool>,
}

impl MemoryPatch {
	pub fn is_empty(&self) -> bool {
		self.title.is_none()
			&& self.content.is_none()
			&& self.memory_type.is_none()
			&& self.importance.is_none()
			&& self.tags.is_none()
			&& self.entity_refs.is_none()
			&& self.metadata.is_none()
			&& self.is_archived.is_none()
	}

	pub fn changes_text(&self) -> bool {
		self.title.is_some() || self.content.is_some()
	}
}

pub fn encode_string_list(values: &[String]) -> String {
	serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

pub fn decode_string_list(raw: &str) -> Result<Vec<String>> {
	serde_json::from_str(raw)
		.map_err(|err| Error::InvariantViolation(format!("Malformed string list column: {err}.")))
}

pub fn encode_metadata(metadata: &Map<String, Value>) -> String {
	serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

pub fn decode_metadata(raw: &str) -> Result<Map<String, Value>> {
	serde_json::from_str(raw)
		.map_err(|err| Error::InvariantViolation(format!("Malformed metadata column: {err}.")))
}
