//! LLM-assisted duplicate detection. A cheap similarity score gates which
//! pairs are worth a judge call.

use mnemo_providers::judge::{JudgeResponse, JudgeVerdict};

use crate::{
	BoxFuture, Result,
	adapter::Contact,
	matching::{normalize_email, normalize_name, normalize_phone},
};

const EMAIL_WEIGHT: f32 = 0.6;
const PHONE_WEIGHT: f32 = 0.25;
const NAME_WEIGHT: f32 = 0.15;

pub trait DuplicateJudge
where
	Self: Send + Sync,
{
	fn judge<'a>(
		&'a self,
		left: &'a Contact,
		right: &'a Contact,
	) -> BoxFuture<'a, Result<JudgeResponse>>;
}

/// Production judge backed by the configured LLM endpoint.
pub struct HttpDuplicateJudge {
	cfg: mnemo_config::Llm,
}

impl HttpDuplicateJudge {
	pub fn new(cfg: mnemo_config::Llm) -> Self {
		Self { cfg }
	}
}

impl DuplicateJudge for HttpDuplicateJudge {
	fn judge<'a>(
		&'a self,
		left: &'a Contact,
		right: &'a Contact,
	) -> BoxFuture<'a, Result<JudgeResponse>> {
		Box::pin(async move {
			let response = mnemo_providers::judge::judge_duplicate(
				&self.cfg,
				&render_contact(left),
				&render_contact(right),
			)
			.await?;

			Ok(response)
		})
	}
}

pub fn render_contact(contact: &Contact) -> String {
	let mut out = format!("name: {}", contact.full_name);

	if let Some(org) = contact.org.as_deref() {
		out.push_str(&format!("\norg: {org}"));
	}
	if !contact.emails.is_empty() {
		out.push_str(&format!("\nemails: {}", contact.emails.join(", ")));
	}
	if !contact.phones.is_empty() {
		out.push_str(&format!("\nphones: {}", contact.phones.join(", ")));
	}

	out
}

/// Preliminary similarity over (email, phone, normalized name), in [0, 1].
/// An exact email match alone reaches the default pre-threshold.
pub fn similarity_score(a: &Contact, b: &Contact) -> f32 {
	let mut score = 0.0;

	let emails_a: Vec<String> = a.emails.iter().map(|email| normalize_email(email)).collect();
	let emails_b: Vec<String> = b.emails.iter().map(|email| normalize_email(email)).collect();

	if emails_a.iter().any(|email| emails_b.contains(email)) {
		score += EMAIL_WEIGHT;
	}

	let phones_a: Vec<String> = a
		.phones
		.iter()
		.map(|phone| normalize_phone(phone))
		.filter(|phone| !phone.is_empty())
		.collect();
	let phones_b: Vec<String> = b
		.phones
		.iter()
		.map(|phone| normalize_phone(phone))
		.filter(|phone| !phone.is_empty())
		.collect();

	if phones_a.iter().any(|phone| phones_b.contains(phone)) {
		score += PHONE_WEIGHT;
	}

	let name_a = normalize_name(&a.full_name);
	let name_b = normalize_name(&b.full_name);

	if !name_a.is_empty() && name_a == name_b {
		score += NAME_WEIGHT;
	}

	score
}

/// Merge gate: the judge must call it a duplicate at or above the
/// confidence threshold, and auto-merge must be on.
pub fn should_merge(verdict: &JudgeVerdict, confidence_threshold: u32, auto_merge: bool) -> bool {
	auto_merge && verdict.duplicate && verdict.confidence >= confidence_threshold
}

#[cfg(test)]
mod tests {
	use super::*;

	fn contact(name: &str, email: Option<&str>, phone: Option<&str>) -> Contact {
		Contact {
			full_name: name.to_string(),
			emails: email.map(str::to_string).into_iter().collect(),
			phones: phone.map(str::to_string).into_iter().collect(),
			..Contact::default()
		}
	}

	#[test]
	fn identical_email_reaches_default_pre_threshold() {
		let a = contact("Ada", Some("ada@example.test"), None);
		let b = contact("A. Lovelace", Some("ADA@example.test"), None);

		assert!(similarity_score(&a, &b) >= 0.6);
	}

	#[test]
	fn name_alone_stays_below_pre_threshold() {
		let a = contact("Ada Lovelace", None, None);
		let b = contact("ada lovelace", None, None);

		let score = similarity_score(&a, &b);

		assert!(score > 0.0);
		assert!(score < 0.6);
	}

	#[test]
	fn all_three_signals_sum_to_one() {
		let a = contact("Ada Lovelace", Some("ada@example.test"), Some("+1 555 010 0001"));
		let b = contact("Ada  Lovelace", Some("ada@example.test"), Some("15550100001"));

		assert!((similarity_score(&a, &b) - 1.0).abs() < 1e-6);
	}

	#[test]
	fn merge_gate_requires_all_three_conditions() {
		let verdict = JudgeVerdict { duplicate: true, confidence: 95, reason: String::new() };

		assert!(should_merge(&verdict, 90, true));
		assert!(!should_merge(&verdict, 90, false));
		assert!(!should_merge(
			&JudgeVerdict { duplicate: true, confidence: 80, reason: String::new() },
			90,
			true
		));
		assert!(!should_merge(
			&JudgeVerdict { duplicate: false, confidence: 99, reason: String::new() },
			90,
			true
		));
	}
}
