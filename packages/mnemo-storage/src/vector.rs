//! Embeddings are persisted as BLOBs of little-endian f32 components.

use crate::{Error, Result};

pub fn encode_vector(vec: &[f32]) -> Vec<u8> {
	let mut out = Vec::with_capacity(vec.len() * 4);

	for value in vec {
		out.extend_from_slice(&value.to_le_bytes());
	}

	out
}

pub fn decode_vector(raw: &[u8]) -> Result<Vec<f32>> {
	if raw.len() % 4 != 0 {
		return Err(Error::InvariantViolation(format!(
			"Embedding blob length {} is not a multiple of 4.",
			raw.len()
		)));
	}

	let mut out = Vec::with_capacity(raw.len() / 4);

	for chunk in raw.chunks_exact(4) {
		out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
	}

	Ok(out)
}
