//! Bridge from the synchronous engine into async futures.
//!
//! Steps run one after another on the calling thread. When a step resolves
//! to an operation that has to be awaited, it is driven to completion here
//! before the next step starts.

use std::future::Future;
use std::thread;

use anyhow::anyhow;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tokio::task;

/// Execute an async future from synchronous code and return its output.
///
/// # Notes
/// - Inside a multi-threaded Tokio runtime the current worker is handed over
///   with `block_in_place` and the future runs on the existing runtime.
/// - Inside a current-thread runtime blocking would deadlock, so the future
///   runs on a scoped thread that owns a fresh runtime.
/// - Outside Tokio a current-thread runtime is built for the call.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => task::block_in_place(|| handle.block_on(future)),
        Ok(_) => thread::scope(|scope| {
            scope
                .spawn(move || run_on_fresh_runtime(future))
                .join()
                .map_err(|_| anyhow!("async operation panicked"))?
        }),
        Err(_) => run_on_fresh_runtime(future),
    }
}

fn run_on_fresh_runtime<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| anyhow!(error))?
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_outside_of_tokio() {
        let value = block_on_future(async { Ok::<_, anyhow::Error>(21 * 2) }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn runs_inside_current_thread_runtime() {
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();
        let value = runtime.block_on(async { block_on_future(async { Ok::<_, anyhow::Error>("done") }) });
        assert_eq!(value.unwrap(), "done");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_inside_multi_thread_runtime() {
        let value = block_on_future(async { Ok::<_, anyhow::Error>(7) }).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn propagates_future_errors() {
        let error = block_on_future(async { Err::<(), _>(anyhow!("boom")) }).unwrap_err();
        assert_eq!(error.to_string(), "boom");
    }
}
