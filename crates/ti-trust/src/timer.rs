use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

pub type TimerToken = u64;

/// Token value that never belongs to a scheduled job; cancelling it is a
/// no-op. Lets callers keep a plain token field without an Option.
pub const NOT_A_JOB: TimerToken = 0;

/// Scheduler seam for delayed one-shot jobs. Production uses [`TokioTimer`];
/// tests can substitute a deterministic implementation.
pub trait Timer: Send + Sync {
	fn run_in(&self, delay: Duration, job: Box<dyn FnOnce() + Send + 'static>) -> TimerToken;
	fn cancel(&self, token: TimerToken);
}

#[derive(Default)]
pub struct TokioTimer {
	next_token: AtomicU64,
	jobs: Mutex<HashMap<TimerToken, tokio::task::JoinHandle<()>>>,
}

impl TokioTimer {
	pub fn new() -> Self {
		Self {
			next_token: AtomicU64::new(1),
			jobs: Mutex::new(HashMap::new()),
		}
	}
}

impl Timer for TokioTimer {
	fn run_in(&self, delay: Duration, job: Box<dyn FnOnce() + Send + 'static>) -> TimerToken {
		let token = self.next_token.fetch_add(1, Ordering::Relaxed);
		let handle = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			job();
		});
		self.jobs.lock().insert(token, handle);
		token
	}

	fn cancel(&self, token: TimerToken) {
		if token == NOT_A_JOB {
			return;
		}
		if let Some(handle) = self.jobs.lock().remove(&token) {
			handle.abort();
		}
	}
}

impl Drop for TokioTimer {
	fn drop(&mut self) {
		for (_, handle) in self.jobs.lock().drain() {
			handle.abort();
		}
	}
}
