use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use liverec_common::CaptureSink;

tokio::task_local! {
    static ACTIVE_SCOPE: Option<Arc<CaptureScope>>;
}

/// Knobs for the close-time drain of a recorded connection.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// Most bytes the drain will pull off the wire after the caller lets go
    /// of the response.
    pub drain_cap: usize,
    /// How long the drain waits for the server to finish or close.
    pub drain_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            drain_cap: 1024 * 1024,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// A capture scope: the sink that receives finished transactions plus the
/// drain settings, installed task-locally for a dynamic extent.
pub struct CaptureScope {
    sink: Arc<dyn CaptureSink>,
    settings: CaptureSettings,
    pending: AtomicUsize,
}

impl CaptureScope {
    pub fn new(sink: Arc<dyn CaptureSink>) -> Arc<CaptureScope> {
        CaptureScope::with_settings(sink, CaptureSettings::default())
    }

    pub fn with_settings(sink: Arc<dyn CaptureSink>, settings: CaptureSettings) -> Arc<CaptureScope> {
        Arc::new(CaptureScope {
            sink,
            settings,
            pending: AtomicUsize::new(0),
        })
    }

    /// Recordings bound to this scope that have not yet finished (or been
    /// discarded). Lets a driver wait for late finalization tasks.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn sink(&self) -> &dyn CaptureSink {
        self.sink.as_ref()
    }

    pub(crate) fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub(crate) fn register(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn complete(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs `fut` with `scope` installed as the current capture scope. The
/// previous scope is restored on every exit path, including panics
/// unwinding through the future; nested scopes compose.
pub async fn with_capture<F: Future>(scope: Arc<CaptureScope>, fut: F) -> F::Output {
    ACTIVE_SCOPE.scope(Some(scope), fut).await
}

/// Masks any enclosing capture scope for the extent of `fut`, so side calls
/// go unrecorded.
pub async fn without_capture<F: Future>(fut: F) -> F::Output {
    ACTIVE_SCOPE.scope(None, fut).await
}

/// The scope active on the current task, if any.
pub(crate) fn current() -> Option<Arc<CaptureScope>> {
    ACTIVE_SCOPE.try_with(|slot| slot.clone()).unwrap_or(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use liverec_common::FinishedCapture;

    struct NullSink;

    #[async_trait]
    impl CaptureSink for NullSink {
        async fn accept(&self, _capture: FinishedCapture) {}
    }

    #[tokio::test]
    async fn scopes_nest_and_restore() {
        assert!(current().is_none());

        let outer = CaptureScope::new(Arc::new(NullSink));
        let outer_clone = Arc::clone(&outer);

        with_capture(outer, async move {
            let seen = current().unwrap();
            assert!(Arc::ptr_eq(&seen, &outer_clone));

            without_capture(async {
                assert!(current().is_none());
            })
            .await;

            assert!(current().is_some());
        })
        .await;

        assert!(current().is_none());
    }

    #[tokio::test]
    async fn concurrent_tasks_see_their_own_scope() {
        let a = CaptureScope::new(Arc::new(NullSink));
        let b = CaptureScope::new(Arc::new(NullSink));

        let task_a = {
            let a = Arc::clone(&a);
            tokio::spawn(with_capture(Arc::clone(&a), async move {
                tokio::task::yield_now().await;
                assert!(Arc::ptr_eq(&current().unwrap(), &a));
            }))
        };
        let task_b = {
            let b = Arc::clone(&b);
            tokio::spawn(with_capture(Arc::clone(&b), async move {
                tokio::task::yield_now().await;
                assert!(Arc::ptr_eq(&current().unwrap(), &b));
            }))
        };

        task_a.await.unwrap();
        task_b.await.unwrap();
    }
}
