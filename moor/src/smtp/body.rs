use std::borrow::Cow;

/// How a line received during DATA is to be treated.
#[derive(Debug, PartialEq)]
pub enum BodyLine<'a> {
	/// The lone dot that ends the message
	Terminator,
	/// Message content, already un-stuffed
	Data(&'a [u8]),
}

pub fn decode_line(line: &[u8]) -> BodyLine<'_> {
	if line == b"." {
		BodyLine::Terminator
	} else {
		BodyLine::Data(unstuff(line))
	}
}

/// Removes the transparency dot from a line that starts with two of them.
/// Anything else is returned untouched.
pub fn unstuff(line: &[u8]) -> &[u8] {
	if line.starts_with(b"..") {
		&line[1..]
	} else {
		line
	}
}

/// The sending side of the transparency rule: any line starting with a dot
/// gets another one in front.
pub fn stuff(line: &[u8]) -> Cow<'_, [u8]> {
	if line.starts_with(b".") {
		let mut stuffed = Vec::with_capacity(line.len() + 1);
		stuffed.push(b'.');
		stuffed.extend_from_slice(line);
		Cow::Owned(stuffed)
	} else {
		Cow::Borrowed(line)
	}
}
