//! Static price table. Cost is computed locally from token counts so usage
//! records never depend on a billing API.

/// USD per 1,000 tokens, keyed by model name prefix.
const PRICE_PER_1K_TOKENS: [(&str, f64); 6] = [
	("text-embedding-3-small", 0.000_02),
	("text-embedding-3-large", 0.000_13),
	("text-embedding-ada-002", 0.000_1),
	("gpt-4o-mini", 0.000_375),
	("gpt-4o", 0.006_25),
	("gpt-4.1", 0.005),
];

const DEFAULT_PRICE_PER_1K_TOKENS: f64 = 0.000_1;

pub fn cost_for_tokens(model: &str, tokens: i64) -> f64 {
	let per_1k = PRICE_PER_1K_TOKENS
		.iter()
		.find(|(prefix, _)| model.starts_with(prefix))
		.map(|(_, price)| *price)
		.unwrap_or(DEFAULT_PRICE_PER_1K_TOKENS);

	tokens.max(0) as f64 / 1_000.0 * per_1k
}
