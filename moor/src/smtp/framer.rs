/// What the framer hands the session: a complete line without its CRLF, or
/// notice that a line overran the length cap and was thrown away.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
	Line(Vec<u8>),
	Overlong,
}

/// Splits a byte stream into CRLF-terminated lines. Chunks may be cut
/// anywhere, including between the CR and the LF.
pub struct LineFramer {
	buffer: Vec<u8>,
	max_line_length: usize,
	// Bytes of `buffer` already searched for a terminator.
	scanned: usize,
	discarding: bool,
}

impl LineFramer {
	pub fn new(max_line_length: usize) -> Self {
		Self {
			buffer: vec![],
			max_line_length,
			scanned: 0,
			discarding: false,
		}
	}

	pub fn push(&mut self, chunk: &[u8]) {
		self.buffer.extend_from_slice(chunk);
	}

	/// Bytes held while waiting for a terminator.
	pub fn buffered(&self) -> usize {
		self.buffer.len()
	}

	pub fn next_frame(&mut self) -> Option<Frame> {
		// Back up one byte in case the last search ended on a lone CR
		let start = self.scanned.saturating_sub(1);

		match find_crlf(&self.buffer[start..]) {
			Some(offset) => {
				let end = start + offset;
				let line: Vec<u8> = self.buffer.drain(..end + 2).take(end).collect();
				self.scanned = 0;

				if self.discarding || line.len() > self.max_line_length {
					self.discarding = false;
					Some(Frame::Overlong)
				} else {
					Some(Frame::Line(line))
				}
			}
			None => {
				self.scanned = self.buffer.len();

				let pending = match self.buffer.last() {
					Some(b'\r') => self.buffer.len() - 1,
					_ => self.buffer.len(),
				};

				if pending > self.max_line_length {
					// Keep a trailing CR, it may be the start of the terminator
					let keep_cr = pending < self.buffer.len();
					self.buffer.clear();
					if keep_cr {
						self.buffer.push(b'\r');
					}
					self.scanned = self.buffer.len();
					self.discarding = true;
				}

				None
			}
		}
	}
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
	haystack.windows(2).position(|window| window == b"\r\n")
}
