//! File-backed contact provider: a single `.vcf` file holding one card per
//! contact. The whole file is small enough to rewrite on every mutation.

use std::{fs, path::PathBuf};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
	BoxFuture,
	adapter::{AdapterError, Contact, ContactProvider, UpsertOutcome, UpsertReceipt},
	vcard,
};

pub struct VcardFileProvider {
	path: PathBuf,
	cards: Mutex<Option<Vec<Contact>>>,
}

impl VcardFileProvider {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), cards: Mutex::new(None) }
	}

	async fn with_cards<T>(
		&self,
		f: impl FnOnce(&mut Vec<Contact>) -> T,
	) -> Result<(T, bool), AdapterError> {
		let mut guard = self.cards.lock().await;

		if guard.is_none() {
			*guard = Some(self.read_file()?);
		}

		let cards = guard.get_or_insert_with(Vec::new);
		let before = cards.len();
		let result = f(cards);
		let changed = cards.len() != before;

		Ok((result, changed))
	}

	fn read_file(&self) -> Result<Vec<Contact>, AdapterError> {
		if !self.path.exists() {
			return Ok(Vec::new());
		}

		let raw = fs::read_to_string(&self.path).map_err(|err| {
			AdapterError::TransientFailure { message: format!("Failed to read card file: {err}.") }
		})?;

		vcard::parse_vcards(&raw).map_err(|err| AdapterError::TransientFailure {
			message: format!("Failed to parse card file: {err}"),
		})
	}

	fn write_file(&self, cards: &[Contact]) -> Result<(), AdapterError> {
		let mut out = String::new();

		for contact in cards {
			out.push_str(&vcard::emit_vcard(contact));
		}

		fs::write(&self.path, out).map_err(|err| AdapterError::TransientFailure {
			message: format!("Failed to write card file: {err}."),
		})
	}

	async fn persist(&self) -> Result<(), AdapterError> {
		let guard = self.cards.lock().await;

		if let Some(cards) = guard.as_ref() {
			self.write_file(cards)?;
		}

		Ok(())
	}
}

impl ContactProvider for VcardFileProvider {
	fn count<'a>(&'a self) -> BoxFuture<'a, Result<u64, AdapterError>> {
		Box::pin(async move {
			let (count, _) = self.with_cards(|cards| cards.len() as u64).await?;

			Ok(count)
		})
	}

	fn list<'a>(
		&'a self,
		offset: u64,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<Contact>, AdapterError>> {
		Box::pin(async move {
			let (page, _) = self
				.with_cards(|cards| {
					cards
						.iter()
						.skip(offset as usize)
						.take(limit as usize)
						.cloned()
						.collect::<Vec<_>>()
				})
				.await?;

			Ok(page)
		})
	}

	fn get<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, Result<Contact, AdapterError>> {
		Box::pin(async move {
			let (found, _) = self
				.with_cards(|cards| cards.iter().find(|card| card.uid == uid).cloned())
				.await?;

			found.ok_or_else(|| AdapterError::NotFound { uid: uid.to_string() })
		})
	}

	fn upsert<'a>(
		&'a self,
		contact: &'a Contact,
	) -> BoxFuture<'a, Result<UpsertReceipt, AdapterError>> {
		Box::pin(async move {
			let (receipt, _) = self
				.with_cards(|cards| {
					let mut contact = contact.clone();

					if contact.uid.trim().is_empty() {
						contact.uid = Uuid::new_v4().to_string();
					}

					let uid = contact.uid.clone();

					match cards.iter_mut().find(|card| card.uid == uid) {
						Some(existing) => {
							*existing = contact;

							UpsertReceipt { uid, outcome: UpsertOutcome::Updated }
						},
						None => {
							cards.push(contact);

							UpsertReceipt { uid, outcome: UpsertOutcome::Created }
						},
					}
				})
				.await?;

			self.persist().await?;

			Ok(receipt)
		})
	}

	fn delete<'a>(&'a self, uid: &'a str) -> BoxFuture<'a, Result<(), AdapterError>> {
		Box::pin(async move {
			let (removed, _) = self
				.with_cards(|cards| {
					let before = cards.len();

					cards.retain(|card| card.uid != uid);

					cards.len() != before
				})
				.await?;

			if !removed {
				return Err(AdapterError::NotFound { uid: uid.to_string() });
			}

			self.persist().await?;

			Ok(())
		})
	}
}
