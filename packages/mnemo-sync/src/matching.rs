//! Pair matching between local person entities and remote contacts.
//! First match wins, in order: external uid, email, phone, full name.

use serde_json::Value;

use mnemo_storage::models::Entity;

use crate::{EXTERNAL_UID_FIELD, PROVIDER_UID_KEY, adapter::Contact};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
	Uid,
	Email,
	Phone,
	Name,
}

/// Round-trip uid carried by the remote side: the custom extra field, or a
/// tagged line inside the notes as a fallback for providers that drop
/// custom fields.
pub fn contact_external_uid(contact: &Contact) -> Option<String> {
	if let Some(Value::String(uid)) = contact.extra.get(EXTERNAL_UID_FIELD)
		&& !uid.trim().is_empty()
	{
		return Some(uid.trim().to_string());
	}

	let notes = contact.notes.as_deref()?;
	let tag = format!("[{EXTERNAL_UID_FIELD}:");
	let start = notes.find(&tag)?;
	let rest = &notes[start + tag.len()..];
	let end = rest.find(']')?;
	let uid = rest[..end].trim();

	(!uid.is_empty()).then(|| uid.to_string())
}

/// Provider-side uid remembered on the entity from an earlier sync.
pub fn entity_provider_uid(entity: &Entity) -> Option<String> {
	match entity.metadata.get(PROVIDER_UID_KEY) {
		Some(Value::String(uid)) if !uid.trim().is_empty() => Some(uid.trim().to_string()),
		_ => None,
	}
}

pub fn normalize_phone(raw: &str) -> String {
	raw.chars().filter(|ch| ch.is_ascii_digit()).collect()
}

pub fn normalize_name(raw: &str) -> String {
	raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn normalize_email(raw: &str) -> String {
	raw.trim().to_lowercase()
}

/// Finds the first local entity matching the contact. `consumed` marks
/// locals already paired with an earlier contact; each local matches at
/// most one remote.
pub fn match_contact(
	locals: &[Entity],
	consumed: &[bool],
	contact: &Contact,
) -> Option<(usize, MatchKind)> {
	let available =
		|idx: &usize| !consumed.get(*idx).copied().unwrap_or(false);

	if let Some(uid) = contact_external_uid(contact)
		&& let Some(idx) = (0..locals.len()).filter(available).find(|idx| locals[*idx].id == uid)
	{
		return Some((idx, MatchKind::Uid));
	}

	if !contact.uid.trim().is_empty()
		&& let Some(idx) = (0..locals.len())
			.filter(available)
			.find(|idx| entity_provider_uid(&locals[*idx]).as_deref() == Some(contact.uid.as_str()))
	{
		return Some((idx, MatchKind::Uid));
	}

	let emails: Vec<String> = contact.emails.iter().map(|email| normalize_email(email)).collect();

	if !emails.is_empty()
		&& let Some(idx) = (0..locals.len()).filter(available).find(|idx| {
			locals[*idx]
				.email
				.as_deref()
				.map(normalize_email)
				.is_some_and(|email| emails.contains(&email))
		}) {
		return Some((idx, MatchKind::Email));
	}

	let phones: Vec<String> = contact
		.phones
		.iter()
		.map(|phone| normalize_phone(phone))
		.filter(|phone| !phone.is_empty())
		.collect();

	if !phones.is_empty()
		&& let Some(idx) = (0..locals.len()).filter(available).find(|idx| {
			locals[*idx]
				.phone
				.as_deref()
				.map(normalize_phone)
				.is_some_and(|phone| phones.contains(&phone))
		}) {
		return Some((idx, MatchKind::Phone));
	}

	let name = normalize_name(&contact.full_name);

	if !name.is_empty()
		&& let Some(idx) = (0..locals.len())
			.filter(available)
			.find(|idx| normalize_name(&locals[*idx].name) == name)
	{
		return Some((idx, MatchKind::Name));
	}

	None
}
