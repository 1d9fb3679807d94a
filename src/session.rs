use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use uuid::Uuid;

/// Header carrying the originating session identity on outbound mutations.
///
/// The server echoes its value back as `tabId` in the resulting change event.
pub const TAB_ID_HEADER: &str = "X-Tab-Id";

/// Identity of this process, generated on first use.
static CURRENT_SESSION: Lazy<SessionId> = Lazy::new(SessionId::generate);

/// Identity of one connected client instance ("tab id").
///
/// Cheap to clone. Two values compare equal when their textual form is equal,
/// which is exactly the comparison the self-origin filter performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
	/// A fresh random identity, distinct from every other generated one.
	pub fn generate() -> Self {
		Self(Arc::from(Uuid::new_v4().to_string()))
	}

	/// The identity of the current process. Stable for the process lifetime,
	/// never persisted.
	pub fn current() -> Self {
		CURRENT_SESSION.clone()
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for SessionId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl From<&str> for SessionId {
	fn from(value: &str) -> Self {
		Self(Arc::from(value))
	}
}

impl From<String> for SessionId {
	fn from(value: String) -> Self {
		Self(Arc::from(value))
	}
}

/// Stamps an outbound request with the local session identity so the server
/// can attribute the resulting change event to this client.
pub trait StampOrigin {
	fn stamp_origin(self, header: &str, session: &SessionId) -> Self;
}

impl StampOrigin for reqwest::RequestBuilder {
	fn stamp_origin(self, header: &str, session: &SessionId) -> Self {
		self.header(header, session.as_str())
	}
}
