use std::sync::atomic::{AtomicI64, Ordering};

use mnemo_service::MemoryService;
use mnemo_storage::models::User;

use crate::{Transport, tools::ToolDefinition};

pub struct ServerState {
	pub service: MemoryService,
	pub transport: Transport,
	pub tools: Vec<ToolDefinition>,
	/// Tenant served by the unauthenticated stdio transport.
	pub default_user: Option<User>,
	auto_id: AtomicI64,
}

impl ServerState {
	pub fn new(service: MemoryService, transport: Transport, default_user: Option<User>) -> Self {
		Self {
			service,
			transport,
			tools: crate::tools::build_tools(transport),
			default_user,
			auto_id: AtomicI64::new(1),
		}
	}

	/// Monotonic id for requests that arrived without one, so every
	/// response carries a stable id.
	pub fn next_auto_id(&self) -> i64 {
		self.auto_id.fetch_add(1, Ordering::Relaxed)
	}

	pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
		self.tools.iter().find(|tool| tool.name == name)
	}
}
