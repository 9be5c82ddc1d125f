//! Durable storage for accepted messages.
//!
//! Each message becomes two files in the spool directory named by a fresh
//! UUID: `<id>.eml` holding the body exactly as received, and
//! `<id>.meta.json` holding the [Envelope]. Both are written under `tmp/`
//! first and renamed into place, body before metadata, so a metadata file
//! only ever appears next to a complete body.

use std::{
	fs::{self, OpenOptions},
	io::{self, Write},
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{
	runtime::{Handle, RuntimeFlavor},
	task,
};
use uuid::Uuid;

/// What the session knows about a message when it hands it over.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
	pub remote: String,
	pub identity: Option<String>,
	pub sender: String,
	pub recipients: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
	pub id: Uuid,
	pub received_at: String,
	pub remote: String,
	pub helo: Option<String>,
	pub mail_from: String,
	pub rcpt_to: Vec<String>,
}

impl Envelope {
	/// Gives a submission its identifier and receipt time.
	pub fn stamp(submission: Submission) -> Result<Self, StoreError> {
		let Submission {
			remote,
			identity,
			sender,
			recipients,
		} = submission;

		Ok(Self {
			id: Uuid::new_v4(),
			received_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
			remote,
			helo: identity,
			mail_from: sender,
			rcpt_to: recipients,
		})
	}
}

/// Runs a blocking store call. On a multi-threaded runtime the worker's
/// other tasks are handed off first so a slow disk stalls only this session.
pub fn blocking<T>(call: impl FnOnce() -> T) -> T {
	match Handle::try_current().map(|handle| handle.runtime_flavor()) {
		Ok(RuntimeFlavor::MultiThread) => task::block_in_place(call),
		_ => call(),
	}
}

pub trait Store: Send + Sync {
	/// Durably records a message. Only an `Ok` means both halves were
	/// written; on error nothing from this call is left behind.
	fn persist(&self, submission: Submission, body: &[u8]) -> Result<Envelope, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("spool i/o failed: {0}")]
	Io(#[from] io::Error),
	#[error("could not serialize the envelope: {0}")]
	Serialize(#[from] serde_json::Error),
	#[error("could not format the receipt time: {0}")]
	Timestamp(#[from] time::error::Format),
}

pub struct Spool {
	root: PathBuf,
}

impl Spool {
	pub fn new<B: Into<PathBuf>>(root: B) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn create_directories(&self) -> io::Result<()> {
		fs::create_dir_all(self.tmp_dir())
	}

	pub fn message_path(&self, id: &Uuid) -> PathBuf {
		self.root.join(format!("{}.eml", id))
	}

	pub fn metadata_path(&self, id: &Uuid) -> PathBuf {
		self.root.join(format!("{}.meta.json", id))
	}

	/// Reads a stored message back.
	pub fn load(&self, id: &Uuid) -> Result<(Envelope, Vec<u8>), StoreError> {
		let envelope = serde_json::from_slice(&fs::read(self.metadata_path(id))?)?;
		let body = fs::read(self.message_path(id))?;

		Ok((envelope, body))
	}

	/// Identifiers of every complete message in the spool.
	pub fn ids(&self) -> io::Result<Vec<Uuid>> {
		let mut ids = vec![];

		for entry in fs::read_dir(&self.root)? {
			let name = entry?.file_name();
			let id = name
				.to_str()
				.and_then(|name| name.strip_suffix(".meta.json"))
				.and_then(|stem| stem.parse().ok());

			if let Some(id) = id {
				ids.push(id);
			}
		}

		Ok(ids)
	}

	fn store(&self, envelope: Envelope, body: &[u8]) -> Result<Envelope, StoreError> {
		let tmp = self.tmp_dir();
		let mut staged = Staged {
			body: tmp.join(format!("{}.eml", envelope.id)),
			metadata: tmp.join(format!("{}.meta.json", envelope.id)),
			body_written: false,
			metadata_written: false,
			body_renamed: None,
		};

		match self.commit(&envelope, body, &mut staged) {
			Ok(()) => {
				tracing::debug!(id = %envelope.id, spool = ?self.root, "message written");
				Ok(envelope)
			}
			Err(err) => {
				staged.roll_back();
				Err(err)
			}
		}
	}

	fn tmp_dir(&self) -> PathBuf {
		self.root.join("tmp")
	}

	// `created` is set as soon as the file exists, so a failed write is
	// still cleaned up.
	fn write_new(path: &Path, bytes: &[u8], created: &mut bool) -> io::Result<()> {
		let mut file = OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(path)?;
		*created = true;
		file.write_all(bytes)?;
		file.sync_all()
	}

	fn commit(&self, envelope: &Envelope, body: &[u8], staged: &mut Staged) -> Result<(), StoreError> {
		let metadata = serde_json::to_vec_pretty(envelope)?;

		Self::write_new(&staged.body, body, &mut staged.body_written)?;
		Self::write_new(&staged.metadata, &metadata, &mut staged.metadata_written)?;

		let message_path = self.message_path(&envelope.id);
		fs::rename(&staged.body, &message_path)?;
		staged.body_renamed = Some(message_path);
		fs::rename(&staged.metadata, self.metadata_path(&envelope.id))?;

		Ok(())
	}
}

// Files this call created, so a failure can take back exactly those.
struct Staged {
	body: PathBuf,
	metadata: PathBuf,
	body_written: bool,
	metadata_written: bool,
	body_renamed: Option<PathBuf>,
}

impl Staged {
	fn roll_back(self) {
		// Errors here are ignored; the original failure is what gets reported
		if let Some(renamed) = self.body_renamed {
			let _ = fs::remove_file(renamed);
		} else if self.body_written {
			let _ = fs::remove_file(self.body);
		}

		if self.metadata_written {
			let _ = fs::remove_file(self.metadata);
		}
	}
}

impl Store for Spool {
	fn persist(&self, submission: Submission, body: &[u8]) -> Result<Envelope, StoreError> {
		self.store(Envelope::stamp(submission)?, body)
	}
}
