//! Call-scoped inspection context.
//!
//! A [`CallContext`] lives from the outermost guarded entry to its return and
//! threads metadata plus skip/done flags through nested guarded calls.
//! Synchronous callers get dynamic scope through a thread-local; async
//! callers bind a context to the logical task with [`scope`]. Work handed to
//! a worker pool must copy the context into the child explicitly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::decision::Decision;

#[derive(Debug, Default)]
struct ContextInner {
	metadata: HashMap<String, serde_json::Value>,
	skip_llm: bool,
	skip_mcp: bool,
	done: bool,
	decision: Option<Decision>,
}

/// Shared handle to the per-call context. Clones observe the same cell, so a
/// nested guarded call sees flags set by its caller.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
	inner: Arc<Mutex<ContextInner>>,
}

impl CallContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn metadata(&self) -> HashMap<String, serde_json::Value> {
		self.inner.lock().metadata.clone()
	}

	pub fn insert_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
		self.inner.lock().metadata.insert(key.into(), value);
	}

	pub fn decision(&self) -> Option<Decision> {
		self.inner.lock().decision.clone()
	}

	pub fn is_done(&self) -> bool {
		self.inner.lock().done
	}

	pub fn skip_llm(&self) -> bool {
		self.inner.lock().skip_llm
	}

	pub fn skip_mcp(&self) -> bool {
		self.inner.lock().skip_mcp
	}

	/// Merge a decision and/or done flag into the context.
	pub fn set(&self, decision: Option<Decision>, done: Option<bool>) {
		let mut inner = self.inner.lock();
		if let Some(d) = decision {
			inner.decision = Some(d);
		}
		if let Some(done) = done {
			inner.done = done;
		}
	}

	fn set_skip_llm(&self, value: bool) -> bool {
		let mut inner = self.inner.lock();
		std::mem::replace(&mut inner.skip_llm, value)
	}

	fn set_skip_mcp(&self, value: bool) -> bool {
		let mut inner = self.inner.lock();
		std::mem::replace(&mut inner.skip_mcp, value)
	}
}

thread_local! {
	static CURRENT: RefCell<Option<CallContext>> = const { RefCell::new(None) };
}

tokio::task_local! {
	static TASK_CURRENT: CallContext;
}

/// Current context, creating one at the top of a guarded entry if none is
/// installed. Task scope wins over the thread slot.
pub fn get_context() -> CallContext {
	if let Ok(ctx) = TASK_CURRENT.try_with(|c| c.clone()) {
		return ctx;
	}
	CURRENT.with(|slot| {
		slot
			.borrow_mut()
			.get_or_insert_with(CallContext::new)
			.clone()
	})
}

/// Merge into the current context; see [`CallContext::set`].
pub fn set_context(decision: Option<Decision>, done: Option<bool>) {
	get_context().set(decision, done);
}

/// Run `fut` with `ctx` bound as the task's context. Parallel tasks given
/// distinct contexts stay independent.
pub async fn scope<F: Future>(ctx: CallContext, fut: F) -> F::Output {
	TASK_CURRENT.scope(ctx, fut).await
}

/// Drop the thread's context slot. The next guarded entry starts fresh.
pub fn clear_context() {
	CURRENT.with(|slot| slot.borrow_mut().take());
}

pub fn is_llm_skip_active() -> bool {
	get_context().skip_llm()
}

pub fn is_mcp_skip_active() -> bool {
	get_context().skip_mcp()
}

/// Scoped opt-out of LLM inspection. The flag is restored on drop, so every
/// exit path (including unwinding) releases it.
#[must_use = "the skip is released when the guard is dropped"]
pub struct SkipLlmGuard {
	ctx: CallContext,
	prev: bool,
}

pub fn skip_llm_guard() -> SkipLlmGuard {
	let ctx = get_context();
	let prev = ctx.set_skip_llm(true);
	SkipLlmGuard { ctx, prev }
}

impl Drop for SkipLlmGuard {
	fn drop(&mut self) {
		self.ctx.set_skip_llm(self.prev);
	}
}

/// Scoped opt-out of MCP inspection; same release contract as
/// [`SkipLlmGuard`].
#[must_use = "the skip is released when the guard is dropped"]
pub struct SkipMcpGuard {
	ctx: CallContext,
	prev: bool,
}

pub fn skip_mcp_guard() -> SkipMcpGuard {
	let ctx = get_context();
	let prev = ctx.set_skip_mcp(true);
	SkipMcpGuard { ctx, prev }
}

impl Drop for SkipMcpGuard {
	fn drop(&mut self) {
		self.ctx.set_skip_mcp(self.prev);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::decision::Action;

	#[test]
	fn nested_calls_share_one_context() {
		clear_context();
		let outer = get_context();
		outer.insert_metadata("user", serde_json::json!("alice"));
		let inner = get_context();
		assert_eq!(inner.metadata().get("user"), Some(&serde_json::json!("alice")));
		set_context(Some(Decision::allow(vec![])), Some(true));
		assert!(outer.is_done());
		assert_eq!(outer.decision().unwrap().action, Action::Allow);
		clear_context();
	}

	#[test]
	fn threads_get_independent_contexts() {
		clear_context();
		get_context().insert_metadata("k", serde_json::json!(1));
		let handle = std::thread::spawn(|| {
			let ctx = get_context();
			assert!(ctx.metadata().is_empty());
		});
		handle.join().unwrap();
		clear_context();
	}

	#[test]
	fn skip_guard_releases_on_drop() {
		clear_context();
		assert!(!is_llm_skip_active());
		{
			let _guard = skip_llm_guard();
			assert!(is_llm_skip_active());
			assert!(!is_mcp_skip_active());
		}
		assert!(!is_llm_skip_active());
		clear_context();
	}

	#[test]
	fn skip_guard_releases_on_panic() {
		clear_context();
		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			let _guard = skip_llm_guard();
			panic!("boom");
		}));
		assert!(result.is_err());
		assert!(!is_llm_skip_active());
		clear_context();
	}

	#[test]
	fn nested_skip_guards_restore_outer_state() {
		clear_context();
		let outer = skip_mcp_guard();
		{
			let _inner = skip_mcp_guard();
			assert!(is_mcp_skip_active());
		}
		// Inner guard restores the state the outer guard established.
		assert!(is_mcp_skip_active());
		drop(outer);
		assert!(!is_mcp_skip_active());
		clear_context();
	}

	#[tokio::test]
	async fn task_scope_wins_over_thread_slot() {
		let ctx = CallContext::new();
		ctx.insert_metadata("scoped", serde_json::json!(true));
		scope(ctx, async {
			let seen = get_context();
			assert_eq!(seen.metadata().get("scoped"), Some(&serde_json::json!(true)));
		})
		.await;
	}
}
