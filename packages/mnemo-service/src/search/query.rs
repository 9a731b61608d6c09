//! Query parsing: `key:value` and `metadata.key:value` tokens become
//! metadata predicates; everything else is a keyword term.

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedQuery {
	pub keywords: Vec<String>,
	pub predicates: Vec<MetadataPredicate>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataPredicate {
	pub key: String,
	pub value: String,
}

impl ParsedQuery {
	pub fn is_empty(&self) -> bool {
		self.keywords.is_empty() && self.predicates.is_empty()
	}
}

pub fn parse_query(raw: &str) -> ParsedQuery {
	let mut parsed = ParsedQuery::default();

	for token in raw.split_whitespace() {
		if let Some((key, value)) = token.split_once(':')
			&& !key.is_empty()
			&& !value.is_empty()
		{
			let key = key.strip_prefix("metadata.").unwrap_or(key);

			if !key.is_empty() {
				parsed.predicates.push(MetadataPredicate {
					key: key.to_string(),
					value: value.to_string(),
				});

				continue;
			}
		}

		parsed.keywords.push(token.to_string());
	}

	parsed
}
