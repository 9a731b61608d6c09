//! Minimal vCard 3.0 codec: enough of the card grammar for contact
//! round-tripping, including the `X-MCP-UUID` extension field.

use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{EXTERNAL_UID_FIELD, Error, Result, adapter::Contact};

const FOLD_WIDTH: usize = 75;

pub fn emit_vcard(contact: &Contact) -> String {
	let mut lines = Vec::new();

	lines.push("BEGIN:VCARD".to_string());
	lines.push("VERSION:3.0".to_string());
	lines.push(format!("FN:{}", escape_text(&contact.full_name)));
	lines.push(format!(
		"N:{};{};;;",
		escape_text(contact.last.as_deref().unwrap_or("")),
		escape_text(contact.first.as_deref().unwrap_or(""))
	));

	if let Some(org) = contact.org.as_deref() {
		lines.push(format!("ORG:{}", escape_text(org)));
	}
	if let Some(title) = contact.title.as_deref() {
		lines.push(format!("TITLE:{}", escape_text(title)));
	}

	for email in &contact.emails {
		lines.push(format!("EMAIL;TYPE=INTERNET:{}", escape_text(email)));
	}
	for phone in &contact.phones {
		lines.push(format!("TEL;TYPE=VOICE:{}", escape_text(phone)));
	}
	for address in &contact.addresses {
		lines.push(format!("ADR:;;{};;;;", escape_text(address)));
	}

	if let Some(notes) = contact.notes.as_deref() {
		lines.push(format!("NOTE:{}", escape_text(notes)));
	}
	if !contact.categories.is_empty() {
		let categories: Vec<String> =
			contact.categories.iter().map(|value| escape_text(value)).collect();

		lines.push(format!("CATEGORIES:{}", categories.join(",")));
	}
	if let Some(updated_at) = contact.updated_at
		&& let Ok(formatted) = updated_at.format(&Rfc3339)
	{
		lines.push(format!("REV:{formatted}"));
	}

	lines.push(format!("UID:{}", escape_text(&contact.uid)));

	if let Some(Value::String(uuid)) = contact.extra.get(EXTERNAL_UID_FIELD) {
		lines.push(format!("{EXTERNAL_UID_FIELD}:{}", escape_text(uuid)));
	}

	lines.push("END:VCARD".to_string());

	let mut out = String::new();

	for line in lines {
		out.push_str(&fold_line(&line));
		out.push_str("\r\n");
	}

	out
}

pub fn parse_vcards(raw: &str) -> Result<Vec<Contact>> {
	let lines = unfold_lines(raw);
	let mut contacts = Vec::new();
	let mut current: Option<Contact> = None;

	for line in lines {
		let upper = line.to_ascii_uppercase();

		if upper == "BEGIN:VCARD" {
			if current.is_some() {
				return Err(Error::MalformedCard("Nested BEGIN:VCARD.".to_string()));
			}

			current = Some(Contact::default());

			continue;
		}
		if upper == "END:VCARD" {
			let contact = current
				.take()
				.ok_or_else(|| Error::MalformedCard("END:VCARD without BEGIN.".to_string()))?;

			contacts.push(contact);

			continue;
		}

		let Some(contact) = current.as_mut() else {
			continue;
		};
		let Some((name_part, value)) = line.split_once(':') else {
			continue;
		};
		let property = name_part.split(';').next().unwrap_or("").to_ascii_uppercase();

		apply_property(contact, &property, value);
	}

	if current.is_some() {
		return Err(Error::MalformedCard("Unterminated vCard.".to_string()));
	}

	Ok(contacts)
}

fn apply_property(contact: &mut Contact, property: &str, value: &str) {
	match property {
		"FN" => contact.full_name = unescape_text(value),
		"N" => {
			let mut parts = split_unescaped(value, ';').into_iter();
			let last = parts.next().map(|part| unescape_text(&part)).unwrap_or_default();
			let first = parts.next().map(|part| unescape_text(&part)).unwrap_or_default();

			contact.last = (!last.is_empty()).then_some(last);
			contact.first = (!first.is_empty()).then_some(first);
		},
		"ORG" => contact.org = non_empty(unescape_text(value)),
		"TITLE" => contact.title = non_empty(unescape_text(value)),
		"EMAIL" => {
			let email = unescape_text(value);

			if !email.is_empty() {
				contact.emails.push(email);
			}
		},
		"TEL" => {
			let phone = unescape_text(value);

			if !phone.is_empty() {
				contact.phones.push(phone);
			}
		},
		"ADR" => {
			let joined = split_unescaped(value, ';')
				.into_iter()
				.map(|part| unescape_text(&part))
				.filter(|part| !part.is_empty())
				.collect::<Vec<_>>()
				.join(", ");

			if !joined.is_empty() {
				contact.addresses.push(joined);
			}
		},
		"NOTE" => contact.notes = non_empty(unescape_text(value)),
		"CATEGORIES" => {
			contact.categories = split_unescaped(value, ',')
				.into_iter()
				.map(|part| unescape_text(&part))
				.filter(|part| !part.is_empty())
				.collect();
		},
		"REV" => {
			contact.updated_at = OffsetDateTime::parse(value.trim(), &Rfc3339).ok();
		},
		"UID" => contact.uid = unescape_text(value),
		_ if property == EXTERNAL_UID_FIELD => {
			contact
				.extra
				.insert(EXTERNAL_UID_FIELD.to_string(), Value::String(unescape_text(value)));
		},
		_ => {
			// Unknown properties are preserved in extra so re-export does not
			// drop provider data.
			if property.starts_with("X-") {
				contact
					.extra
					.insert(property.to_string(), Value::String(unescape_text(value)));
			}
		},
	}
}

/// Card text escaping. The provider-command escape order (backslash, double
/// quote, single quote, newline, carriage return) runs first; the card
/// separators are escaped afterwards so their backslashes survive.
pub fn escape_text(raw: &str) -> String {
	crate::adapter::escape_value(raw).replace(';', "\\;").replace(',', "\\,")
}

pub fn unescape_text(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut chars = raw.chars();

	while let Some(ch) = chars.next() {
		if ch != '\\' {
			out.push(ch);

			continue;
		}

		match chars.next() {
			Some('n') | Some('N') => out.push('\n'),
			Some('r') => out.push('\r'),
			Some(other) => out.push(other),
			None => out.push('\\'),
		}
	}

	out
}

fn split_unescaped(raw: &str, separator: char) -> Vec<String> {
	let mut parts = Vec::new();
	let mut current = String::new();
	let mut escaped = false;

	for ch in raw.chars() {
		if escaped {
			current.push('\\');
			current.push(ch);
			escaped = false;

			continue;
		}
		if ch == '\\' {
			escaped = true;

			continue;
		}
		if ch == separator {
			parts.push(std::mem::take(&mut current));

			continue;
		}

		current.push(ch);
	}

	if escaped {
		current.push('\\');
	}

	parts.push(current);

	parts
}

fn fold_line(line: &str) -> String {
	if line.len() <= FOLD_WIDTH {
		return line.to_string();
	}

	let mut out = String::with_capacity(line.len() + line.len() / FOLD_WIDTH * 3);
	let mut width = 0;

	for ch in line.chars() {
		if width >= FOLD_WIDTH {
			out.push_str("\r\n ");
			width = 1;
		}

		out.push(ch);
		width += 1;
	}

	out
}

fn unfold_lines(raw: &str) -> Vec<String> {
	let mut lines: Vec<String> = Vec::new();

	for line in raw.lines() {
		if let Some(rest) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
			if let Some(last) = lines.last_mut() {
				last.push_str(rest);

				continue;
			}
		}

		lines.push(line.to_string());
	}

	lines
}

fn non_empty(value: String) -> Option<String> {
	(!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_contact() -> Contact {
		Contact {
			uid: "card-1".to_string(),
			full_name: "Ada Lovelace".to_string(),
			first: Some("Ada".to_string()),
			last: Some("Lovelace".to_string()),
			org: Some("Analytical Engines; Ltd".to_string()),
			title: Some("Engineer".to_string()),
			emails: vec!["ada@example.test".to_string()],
			phones: vec!["+1 (555) 010-0001".to_string()],
			addresses: vec!["12 Byron Row, London".to_string()],
			notes: Some("Met at the\nsymposium".to_string()),
			categories: vec!["colleague".to_string(), "vip".to_string()],
			updated_at: None,
			extra: {
				let mut extra = Map::new();

				extra.insert(
					EXTERNAL_UID_FIELD.to_string(),
					Value::String("entity-42".to_string()),
				);

				extra
			},
		}
	}

	#[test]
	fn round_trips_a_card_with_extension_uid() {
		let card = emit_vcard(&sample_contact());
		let parsed = parse_vcards(&card).expect("parse failed");

		assert_eq!(parsed.len(), 1);

		let contact = &parsed[0];

		assert_eq!(contact.full_name, "Ada Lovelace");
		assert_eq!(contact.first.as_deref(), Some("Ada"));
		assert_eq!(contact.last.as_deref(), Some("Lovelace"));
		assert_eq!(contact.org.as_deref(), Some("Analytical Engines; Ltd"));
		assert_eq!(contact.emails, vec!["ada@example.test"]);
		assert_eq!(contact.notes.as_deref(), Some("Met at the\nsymposium"));
		assert_eq!(contact.categories, vec!["colleague", "vip"]);
		assert_eq!(
			contact.extra.get(EXTERNAL_UID_FIELD),
			Some(&Value::String("entity-42".to_string()))
		);
	}

	#[test]
	fn unfolds_continuation_lines() {
		let raw = "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:Augusta Ada\r\n  King-Noel\r\nUID:u\r\nEND:VCARD\r\n";
		let parsed = parse_vcards(raw).expect("parse failed");

		assert_eq!(parsed[0].full_name, "Augusta Ada King-Noel");
	}

	#[test]
	fn rejects_unterminated_cards() {
		assert!(parse_vcards("BEGIN:VCARD\r\nFN:X\r\n").is_err());
	}

	#[test]
	fn folds_long_lines() {
		let mut contact = sample_contact();

		contact.notes = Some("x".repeat(200));

		let card = emit_vcard(&contact);

		assert!(card.lines().all(|line| line.len() <= FOLD_WIDTH + 1));

		let parsed = parse_vcards(&card).expect("parse failed");

		assert_eq!(parsed[0].notes.as_deref(), Some("x".repeat(200)).as_deref());
	}
}
