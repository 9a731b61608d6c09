//! Conflict resolution for matched entity/contact pairs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use mnemo_storage::models::Entity;

use crate::{EXTERNAL_UID_FIELD, PROVIDER_UID_KEY, adapter::Contact, matching};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
	#[default]
	Newest,
	Oldest,
	Merge,
}

/// Which sides of a matched pair need writing after resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
	pub local_changed: bool,
	pub remote_changed: bool,
}

pub fn contact_from_entity(entity: &Entity) -> Contact {
	let mut extra = Map::new();

	extra.insert(EXTERNAL_UID_FIELD.to_string(), Value::String(entity.id.clone()));

	Contact {
		uid: matching::entity_provider_uid(entity).unwrap_or_else(|| entity.id.clone()),
		full_name: entity.name.clone(),
		first: entity.first_name.clone(),
		last: entity.last_name.clone(),
		org: entity.company.clone(),
		title: entity.title.clone(),
		emails: entity.email.clone().into_iter().collect(),
		phones: entity.phone.clone().into_iter().collect(),
		addresses: entity.address.clone().into_iter().collect(),
		notes: entity.notes.clone(),
		categories: entity.tags.clone(),
		updated_at: Some(entity.updated_at),
		extra,
	}
}

pub fn entity_from_contact(user_id: &str, contact: &Contact, now: OffsetDateTime) -> Entity {
	let mut metadata = Map::new();

	if !contact.uid.trim().is_empty() {
		metadata.insert(PROVIDER_UID_KEY.to_string(), Value::String(contact.uid.clone()));
	}

	Entity {
		id: Uuid::new_v4().to_string(),
		user_id: user_id.to_string(),
		entity_type: "person".to_string(),
		name: contact.full_name.clone(),
		person_type: None,
		first_name: contact.first.clone(),
		last_name: contact.last.clone(),
		company: contact.org.clone(),
		title: contact.title.clone(),
		email: contact.emails.first().cloned(),
		phone: contact.phones.first().cloned(),
		address: contact.addresses.first().cloned(),
		website: None,
		notes: contact.notes.clone(),
		tags: contact.categories.clone(),
		importance: 0.5,
		metadata,
		created_at: now,
		updated_at: now,
	}
}

/// Resolves a matched pair in place. The entity is mutated when the local
/// side loses or merges; the returned contact replaces the remote side when
/// it loses or merges.
pub fn resolve(
	entity: &mut Entity,
	contact: &Contact,
	policy: ConflictPolicy,
	now: OffsetDateTime,
) -> (Resolution, Contact) {
	// An unknown remote timestamp is treated as older than any local edit.
	let remote_newer = contact
		.updated_at
		.is_some_and(|remote_updated| remote_updated > entity.updated_at);

	match policy {
		ConflictPolicy::Newest =>
			if remote_newer {
				let local_changed = overwrite_entity(entity, contact, now);

				(Resolution { local_changed, remote_changed: false }, contact.clone())
			} else {
				let (remote_changed, next) = overwrite_contact(entity, contact);

				(Resolution { local_changed: false, remote_changed }, next)
			},
		ConflictPolicy::Oldest =>
			if remote_newer {
				let (remote_changed, next) = overwrite_contact(entity, contact);

				(Resolution { local_changed: false, remote_changed }, next)
			} else {
				let local_changed = overwrite_entity(entity, contact, now);

				(Resolution { local_changed, remote_changed: false }, contact.clone())
			},
		ConflictPolicy::Merge => merge(entity, contact, remote_newer, now),
	}
}

fn overwrite_entity(entity: &mut Entity, contact: &Contact, now: OffsetDateTime) -> bool {
	let mut changed = false;

	changed |= set_string(&mut entity.name, &contact.full_name);
	changed |= set_option(&mut entity.first_name, contact.first.as_deref());
	changed |= set_option(&mut entity.last_name, contact.last.as_deref());
	changed |= set_option(&mut entity.company, contact.org.as_deref());
	changed |= set_option(&mut entity.title, contact.title.as_deref());
	changed |= set_option(&mut entity.email, contact.emails.first().map(String::as_str));
	changed |= set_option(&mut entity.phone, contact.phones.first().map(String::as_str));
	changed |= set_option(&mut entity.address, contact.addresses.first().map(String::as_str));
	changed |= set_option(&mut entity.notes, contact.notes.as_deref());

	if entity.tags != contact.categories && !contact.categories.is_empty() {
		entity.tags = contact.categories.clone();
		changed = true;
	}
	if changed {
		entity.updated_at = now;
	}

	changed
}

fn overwrite_contact(entity: &Entity, contact: &Contact) -> (bool, Contact) {
	let mut next = contact_from_entity(entity);

	next.uid = if contact.uid.trim().is_empty() { next.uid } else { contact.uid.clone() };

	let changed = next.full_name != contact.full_name
		|| next.first != contact.first
		|| next.last != contact.last
		|| next.org != contact.org
		|| next.title != contact.title
		|| next.emails != contact.emails
		|| next.phones != contact.phones
		|| next.addresses != contact.addresses
		|| next.notes != contact.notes
		|| next.categories != contact.categories;

	(changed, next)
}

/// Field-level union. The newer side wins populated fields; fields only one
/// side has are kept. Notes are never discarded: the loser's text is
/// appended in a dated block.
fn merge(
	entity: &mut Entity,
	contact: &Contact,
	remote_newer: bool,
	now: OffsetDateTime,
) -> (Resolution, Contact) {
	let mut local_changed = false;

	local_changed |= merge_field(&mut entity.first_name, contact.first.as_deref(), remote_newer);
	local_changed |= merge_field(&mut entity.last_name, contact.last.as_deref(), remote_newer);
	local_changed |= merge_field(&mut entity.company, contact.org.as_deref(), remote_newer);
	local_changed |= merge_field(&mut entity.title, contact.title.as_deref(), remote_newer);
	local_changed |= merge_field(&mut entity.email, contact.emails.first().map(String::as_str), remote_newer);
	local_changed |= merge_field(&mut entity.phone, contact.phones.first().map(String::as_str), remote_newer);
	local_changed |=
		merge_field(&mut entity.address, contact.addresses.first().map(String::as_str), remote_newer);

	if remote_newer && !contact.full_name.trim().is_empty() {
		local_changed |= set_string(&mut entity.name, &contact.full_name);
	}

	for category in &contact.categories {
		if !entity.tags.contains(category) {
			entity.tags.push(category.clone());
			local_changed = true;
		}
	}

	let merged_notes = merge_notes(
		entity.notes.as_deref(),
		contact.notes.as_deref(),
		remote_newer,
		now,
	);

	if merged_notes != entity.notes {
		entity.notes = merged_notes;
		local_changed = true;
	}
	if local_changed {
		entity.updated_at = now;
	}

	let (remote_changed, mut next) = overwrite_contact(entity, contact);

	next.updated_at = Some(now);

	(Resolution { local_changed, remote_changed }, next)
}

fn merge_field(local: &mut Option<String>, remote: Option<&str>, remote_newer: bool) -> bool {
	let remote = remote.map(str::trim).filter(|value| !value.is_empty());

	match (local.as_deref(), remote) {
		(None, Some(value)) => {
			*local = Some(value.to_string());

			true
		},
		(Some(current), Some(value)) if remote_newer && current != value => {
			*local = Some(value.to_string());

			true
		},
		_ => false,
	}
}

/// Newest side wins the field; the older text is appended in a dated block
/// so nothing is silently discarded.
pub fn merge_notes(
	local: Option<&str>,
	remote: Option<&str>,
	remote_newer: bool,
	now: OffsetDateTime,
) -> Option<String> {
	let local = local.map(str::trim).filter(|value| !value.is_empty());
	let remote = remote.map(str::trim).filter(|value| !value.is_empty());

	match (local, remote) {
		(None, None) => None,
		(Some(value), None) | (None, Some(value)) => Some(value.to_string()),
		(Some(local), Some(remote)) if local == remote => Some(local.to_string()),
		(Some(local), Some(remote)) => {
			let stamp = now.format(&Rfc3339).unwrap_or_else(|_| now.to_string());
			let (winner, loser) = if remote_newer { (remote, local) } else { (local, remote) };

			Some(format!("{winner}\n--- merged {stamp} ---\n{loser}"))
		},
	}
}

fn set_string(target: &mut String, value: &str) -> bool {
	if target == value || value.trim().is_empty() {
		return false;
	}

	*target = value.to_string();

	true
}

fn set_option(target: &mut Option<String>, value: Option<&str>) -> bool {
	let value = value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

	if *target == value {
		return false;
	}
	if value.is_none() {
		// Overwrite keeps existing data rather than erasing it with an
		// absent remote field.
		return false;
	}

	*target = value;

	true
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entity_at(updated_at: OffsetDateTime) -> Entity {
		Entity {
			id: "e-1".to_string(),
			user_id: "u".to_string(),
			entity_type: "person".to_string(),
			name: "Ada Lovelace".to_string(),
			person_type: None,
			first_name: Some("Ada".to_string()),
			last_name: Some("Lovelace".to_string()),
			company: None,
			title: Some("Engineer".to_string()),
			email: Some("ada@example.test".to_string()),
			phone: None,
			address: None,
			website: None,
			notes: Some("local notes".to_string()),
			tags: vec!["vip".to_string()],
			importance: 0.5,
			metadata: Map::new(),
			created_at: updated_at,
			updated_at,
		}
	}

	fn contact_at(updated_at: Option<OffsetDateTime>) -> Contact {
		Contact {
			uid: "c-1".to_string(),
			full_name: "Ada K. Lovelace".to_string(),
			first: Some("Ada".to_string()),
			org: Some("Analytical Engines".to_string()),
			emails: vec!["ada@corp.test".to_string()],
			notes: Some("remote notes".to_string()),
			categories: vec!["colleague".to_string()],
			updated_at,
			..Contact::default()
		}
	}

	#[test]
	fn newest_policy_prefers_the_newer_remote() {
		let base = OffsetDateTime::UNIX_EPOCH;
		let mut entity = entity_at(base);
		let contact = contact_at(Some(base + time::Duration::days(1)));
		let (resolution, _) =
			resolve(&mut entity, &contact, ConflictPolicy::Newest, base + time::Duration::days(2));

		assert!(resolution.local_changed);
		assert!(!resolution.remote_changed);
		assert_eq!(entity.name, "Ada K. Lovelace");
		assert_eq!(entity.email.as_deref(), Some("ada@corp.test"));
	}

	#[test]
	fn newest_policy_treats_unknown_remote_timestamp_as_older() {
		let base = OffsetDateTime::UNIX_EPOCH + time::Duration::days(10);
		let mut entity = entity_at(base);
		let contact = contact_at(None);
		let (resolution, next) =
			resolve(&mut entity, &contact, ConflictPolicy::Newest, base + time::Duration::days(1));

		assert!(!resolution.local_changed);
		assert!(resolution.remote_changed);
		assert_eq!(next.full_name, "Ada Lovelace");
		assert_eq!(entity.name, "Ada Lovelace");
	}

	#[test]
	fn merge_unions_fields_and_keeps_both_notes() {
		let base = OffsetDateTime::UNIX_EPOCH;
		let mut entity = entity_at(base);
		let contact = contact_at(Some(base + time::Duration::days(1)));
		let now = base + time::Duration::days(2);
		let (resolution, _) = resolve(&mut entity, &contact, ConflictPolicy::Merge, now);

		assert!(resolution.local_changed);
		// Field only the remote has.
		assert_eq!(entity.company.as_deref(), Some("Analytical Engines"));
		// Tag union.
		assert!(entity.tags.contains(&"vip".to_string()));
		assert!(entity.tags.contains(&"colleague".to_string()));

		let notes = entity.notes.as_deref().expect("notes lost in merge");

		assert!(notes.contains("remote notes"));
		assert!(notes.contains("local notes"));
		assert!(notes.contains("--- merged "));
		assert!(notes.starts_with("remote notes"));
	}

	#[test]
	fn oldest_policy_discards_the_newer_remote() {
		let base = OffsetDateTime::UNIX_EPOCH;
		let mut entity = entity_at(base);
		let contact = contact_at(Some(base + time::Duration::days(5)));
		let (resolution, _) =
			resolve(&mut entity, &contact, ConflictPolicy::Oldest, base + time::Duration::days(6));

		assert!(!resolution.local_changed);
		assert!(resolution.remote_changed);
		assert_eq!(entity.name, "Ada Lovelace");
	}
}
