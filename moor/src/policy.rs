use std::collections::HashSet;

/// The submission rules a session enforces: which recipient domains we take
/// mail for, and how large a message may be.
#[derive(Clone, Debug)]
pub struct Policy {
	domains: HashSet<String>,
	max_message_size: usize,
}

impl Policy {
	pub fn new<I, S>(domains: I, max_message_size: usize) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			domains: domains.into_iter().map(Into::into).collect(),
			max_message_size,
		}
	}

	/// Exact, case-sensitive membership. An empty domain is never allowed.
	pub fn domain_is_allowed(&self, domain: &str) -> bool {
		!domain.is_empty() && self.domains.contains(domain)
	}

	pub fn size_is_within_limit(&self, byte_count: usize) -> bool {
		byte_count <= self.max_message_size
	}

	pub fn max_message_size(&self) -> usize {
		self.max_message_size
	}
}
