use pest::Parser;
use pest_derive::*;

#[derive(Parser)]
#[grammar = "smtp/args/address_grammar.pest"]
pub struct GrammarParser;

pub struct Validator;
impl Validator {
	/// Finds the mailbox inside an address-spec. Returns None when the input
	/// holds neither a bracketed address nor a bare token.
	pub fn find_mailbox(text: &str) -> Option<&str> {
		Self::find_bracketed(text).or_else(|| Self::find_bare(text))
	}

	/// The first `<...>` holding at least one character. A `<` whose
	/// closing `>` follows it directly is skipped, so each byte is looked
	/// at a bounded number of times.
	fn find_bracketed(text: &str) -> Option<&str> {
		let mut from = 0;

		while let Some(open) = text[from..].find('<').map(|at| from + at) {
			let close = open + 1 + text[open + 1..].find('>')?;

			if close > open + 1 {
				return Some(&text[open + 1..close]);
			}
			from = close + 1;
		}

		None
	}

	fn find_bare(text: &str) -> Option<&str> {
		let pairs = GrammarParser::parse(Rule::address, text).ok()?;

		pairs
			.flatten()
			.find(|pair| pair.as_rule() == Rule::bare_addr)
			.map(|pair| pair.as_str())
	}
}
