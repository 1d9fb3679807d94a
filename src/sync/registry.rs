use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use log::debug;

/// A zero-argument refresh supplied by a data-owning area of the app.
pub type RefreshFn = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// What happened when a settled entity type was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
	/// The callback ran and returned `Ok`
	Refreshed,
	/// No callback is registered for the entity type
	Unhandled,
	/// The callback returned an error
	Failed(String),
	/// The callback panicked; the panic was contained
	Panicked(String),
}

/// Mapping from entity type to its refresh callback. Last registration wins.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
	callbacks: HashMap<String, Arc<RefreshFn>>,
}

impl CallbackRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder form of [`register`](Self::register).
	pub fn with<F>(mut self, entity_type: impl Into<String>, callback: F) -> Self
	where
		F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.register(entity_type, callback);
		self
	}

	/// Register `callback` for `entity_type`, returning the callback it
	/// replaced, if any.
	pub fn register<F>(
		&mut self,
		entity_type: impl Into<String>,
		callback: F,
	) -> Option<Arc<RefreshFn>>
	where
		F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.insert(entity_type.into(), Arc::new(callback))
	}

	/// Register an already shared callback.
	pub fn insert(
		&mut self,
		entity_type: String,
		callback: Arc<RefreshFn>,
	) -> Option<Arc<RefreshFn>> {
		let replaced = self.callbacks.insert(entity_type, callback);
		if replaced.is_some() {
			debug!("Replaced refresh callback; last registration wins");
		}
		replaced
	}

	pub fn unregister(&mut self, entity_type: &str) -> Option<Arc<RefreshFn>> {
		self.callbacks.remove(entity_type)
	}

	pub fn get(&self, entity_type: &str) -> Option<Arc<RefreshFn>> {
		self.callbacks.get(entity_type).cloned()
	}

	pub fn contains(&self, entity_type: &str) -> bool {
		self.callbacks.contains_key(entity_type)
	}

	/// Registered entity types, sorted for stable output.
	pub fn entity_types(&self) -> Vec<String> {
		let mut types: Vec<String> = self.callbacks.keys().cloned().collect();
		types.sort();
		types
	}

	pub fn len(&self) -> usize {
		self.callbacks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.callbacks.is_empty()
	}

	/// Invoke the callback for `entity_type`. Errors and panics are contained
	/// and reported through the returned [`Dispatch`].
	pub fn invoke(&self, entity_type: &str) -> Dispatch {
		let Some(callback) = self.callbacks.get(entity_type) else {
			return Dispatch::Unhandled;
		};

		match catch_unwind(AssertUnwindSafe(|| callback())) {
			Ok(Ok(())) => Dispatch::Refreshed,
			Ok(Err(e)) => Dispatch::Failed(format!("{:#}", e)),
			Err(payload) => Dispatch::Panicked(panic_message(payload.as_ref())),
		}
	}
}

impl fmt::Debug for CallbackRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallbackRegistry")
			.field("entity_types", &self.entity_types())
			.finish()
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
