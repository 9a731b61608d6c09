use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use mnemo_storage::{
	entities,
	models::{Entity, EntityType},
};

use crate::{Error, MemoryService, Result, validate_importance};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateEntityRequest {
	pub entity_type: EntityType,
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
	#[serde(default)]
	pub tags: Vec<String>,
	pub importance: Option<f32>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateEntityRequest {
	pub name: Option<String>,
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
	pub tags: Option<Vec<String>>,
	pub importance: Option<f32>,
	pub metadata: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityView {
	pub id: String,
	pub entity_type: String,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub person_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub first_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub company: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub phone: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub address: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub website: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	pub tags: Vec<String>,
	pub importance: f32,
	pub metadata: Map<String, Value>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}

impl EntityView {
	pub fn from_entity(entity: &Entity) -> Self {
		Self {
			id: entity.id.clone(),
			entity_type: entity.entity_type.clone(),
			name: entity.name.clone(),
			person_type: entity.person_type.clone(),
			first_name: entity.first_name.clone(),
			last_name: entity.last_name.clone(),
			company: entity.company.clone(),
			title: entity.title.clone(),
			email: entity.email.clone(),
			phone: entity.phone.clone(),
			address: entity.address.clone(),
			website: entity.website.clone(),
			notes: entity.notes.clone(),
			tags: entity.tags.clone(),
			importance: entity.importance,
			metadata: entity.metadata.clone(),
			created_at: entity.created_at,
			updated_at: entity.updated_at,
		}
	}
}

impl MemoryService {
	pub async fn create_entity(
		&self,
		user_id: &str,
		req: CreateEntityRequest,
	) -> Result<EntityView> {
		self.require_user(user_id).await?;

		if req.name.trim().is_empty() {
			return Err(Error::InvalidArgument { message: "name is required.".to_string() });
		}

		let importance = req.importance.unwrap_or(0.5);

		validate_importance(importance)?;
		self.check_entity_quota(user_id).await?;

		let now = OffsetDateTime::now_utc();
		let entity = Entity {
			id: Uuid::new_v4().to_string(),
			user_id: user_id.to_string(),
			entity_type: req.entity_type.as_str().to_string(),
			name: req.name,
			person_type: req.person_type,
			first_name: req.first_name,
			last_name: req.last_name,
			company: req.company,
			title: req.title,
			email: req.email,
			phone: req.phone,
			address: req.address,
			website: req.website,
			notes: req.notes,
			tags: req.tags,
			importance,
			metadata: req.metadata,
			created_at: now,
			updated_at: now,
		};

		entities::insert_entity(&self.db, &entity).await?;

		Ok(EntityView::from_entity(&entity))
	}

	pub async fn get_entity(&self, user_id: &str, id: &str) -> Result<EntityView> {
		self.require_user(user_id).await?;

		let entity = entities::get_entity(&self.db, id, user_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Entity {id} not found.") })?;

		Ok(EntityView::from_entity(&entity))
	}

	pub async fn update_entity(
		&self,
		user_id: &str,
		id: &str,
		req: UpdateEntityRequest,
	) -> Result<EntityView> {
		self.require_user(user_id).await?;

		if let Some(importance) = req.importance {
			validate_importance(importance)?;
		}

		let mut entity = entities::get_entity(&self.db, id, user_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Entity {id} not found.") })?;

		if let Some(name) = req.name {
			if name.trim().is_empty() {
				return Err(Error::InvalidArgument {
					message: "name must not be empty.".to_string(),
				});
			}

			entity.name = name;
		}

		apply_field(&mut entity.person_type, req.person_type);
		apply_field(&mut entity.first_name, req.first_name);
		apply_field(&mut entity.last_name, req.last_name);
		apply_field(&mut entity.company, req.company);
		apply_field(&mut entity.title, req.title);
		apply_field(&mut entity.email, req.email);
		apply_field(&mut entity.phone, req.phone);
		apply_field(&mut entity.address, req.address);
		apply_field(&mut entity.website, req.website);
		apply_field(&mut entity.notes, req.notes);

		if let Some(tags) = req.tags {
			entity.tags = tags;
		}
		if let Some(importance) = req.importance {
			entity.importance = importance;
		}
		if let Some(metadata) = req.metadata {
			entity.metadata = metadata;
		}

		entity.updated_at = OffsetDateTime::now_utc();

		entities::update_entity(&self.db, &entity).await?;

		Ok(EntityView::from_entity(&entity))
	}

	pub async fn delete_entity(&self, user_id: &str, id: &str) -> Result<()> {
		self.require_user(user_id).await?;

		if !entities::delete_entity(&self.db, id, user_id, OffsetDateTime::now_utc()).await? {
			return Err(Error::NotFound { message: format!("Entity {id} not found.") });
		}

		Ok(())
	}

	/// Keyword search over the tenant's entities. Entities carry no
	/// embeddings; matching is substring over the structured fields.
	pub async fn search_entities(
		&self,
		user_id: &str,
		query: &str,
		entity_type: Option<EntityType>,
		limit: u32,
	) -> Result<Vec<EntityView>> {
		self.require_user(user_id).await?;

		let needle = query.trim().to_lowercase();

		if needle.is_empty() {
			return Ok(Vec::new());
		}

		let records =
			entities::list_entities(&self.db, user_id, entity_type.map(|t| t.as_str())).await?;
		let mut views: Vec<EntityView> = records
			.iter()
			.filter(|entity| entity_matches(entity, &needle))
			.map(EntityView::from_entity)
			.collect();

		views.truncate(limit as usize);

		Ok(views)
	}

	async fn check_entity_quota(&self, user_id: &str) -> Result<()> {
		let count = entities::count_entities(&self.db, user_id).await?;
		let quota = self.cfg.quota.entities_per_user;

		if count as u64 >= quota {
			return Err(Error::QuotaExceeded {
				message: format!("Entity quota of {quota} records reached."),
			});
		}

		Ok(())
	}
}

fn apply_field(target: &mut Option<String>, value: Option<String>) {
	if let Some(value) = value {
		*target = (!value.trim().is_empty()).then_some(value);
	}
}

fn entity_matches(entity: &Entity, needle: &str) -> bool {
	let fields = [
		Some(entity.name.as_str()),
		entity.first_name.as_deref(),
		entity.last_name.as_deref(),
		entity.company.as_deref(),
		entity.title.as_deref(),
		entity.email.as_deref(),
		entity.phone.as_deref(),
		entity.notes.as_deref(),
	];

	fields
		.into_iter()
		.flatten()
		.any(|field| field.to_lowercase().contains(needle))
		|| entity.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
}
