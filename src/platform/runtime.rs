use std::future::Future;
use std::time::Duration;

/// Spawns a background task on the current wasm event loop.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    #[cfg(feature = "wasm-web")]
    wasm_bindgen_futures::spawn_local(future);
    #[cfg(not(feature = "wasm-web"))]
    futures::executor::block_on(future);
}

/// Spawns a background task on the ambient tokio runtime.
///
/// Outside a runtime the task runs on a shared single-worker runtime owned by the
/// crate, so detached work is still driven when the caller is synchronous.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use std::sync::LazyLock;
    use tokio::runtime::{Builder, Handle, Runtime};

    static BACKGROUND_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("chat-state-background")
            .enable_all()
            .build()
            .ok()
    });

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else if let Some(runtime) = BACKGROUND_RUNTIME.as_ref() {
        runtime.spawn(future);
    } else {
        std::thread::spawn(move || futures::executor::block_on(future));
    }
}

/// Asynchronously waits for the provided duration in a platform-compatible way.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    sleep_impl(duration).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep_impl(duration: Duration) {
    use gloo_timers::future::sleep;
    sleep(duration).await;
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep_impl(duration: Duration) {
    use tokio::time::sleep;
    sleep(duration).await;
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[test]
    fn detached_task_runs_without_ambient_runtime() {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_detached(async move {
            sleep(Duration::from_millis(1)).await;
            let _ = tx.send(7u8);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[tokio::test]
    async fn detached_task_runs_on_current_runtime() {
        let (tx, rx) = async_channel::bounded(1);
        spawn_detached(async move {
            let _ = tx.send("done").await;
        });
        assert_eq!(rx.recv().await.unwrap(), "done");
    }
}
