use std::fmt::{Display, Formatter};

use super::Validator;

/// A normalized mailbox as given in MAIL FROM or RCPT TO. Parsing never
/// fails; input with no recognizable address becomes the empty address,
/// which has an empty domain and so never passes a domain check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Address(String);

impl Address {
	pub fn extract(arg: &str) -> Self {
		Self(
			Validator::find_mailbox(arg)
				.map(str::to_lowercase)
				.unwrap_or_default(),
		)
	}

	/// Everything after the last `@`, or an empty string when there is none.
	pub fn domain(&self) -> &str {
		self.0.rsplit_once('@').map(|(_, domain)| domain).unwrap_or("")
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl Display for Address {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "<{}>", self.0)
	}
}
