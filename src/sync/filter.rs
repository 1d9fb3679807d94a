use crate::session::SessionId;
use crate::sync::event::SyncEvent;

/// Drops echoes of mutations made by the local session.
///
/// The local UI already applied those changes optimistically, so refreshing
/// on them would only cause redundant work or flicker.
#[derive(Debug, Clone)]
pub struct OriginFilter {
	local: SessionId,
}

impl OriginFilter {
	pub fn new(local: SessionId) -> Self {
		Self { local }
	}

	pub fn local(&self) -> &SessionId {
		&self.local
	}

	/// `false` iff the event was stamped with the local session identity.
	/// Unattributed events are always accepted.
	pub fn accepts(&self, event: &SyncEvent) -> bool {
		event.origin_id.as_deref() != Some(self.local.as_str())
	}
}
