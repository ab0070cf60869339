use crate::config::EngineConfig;
use crate::engine::{parse_manifest, Engine};
use crate::host::{FetchError, Fetcher};
use async_trait::async_trait;
use futures::executor::LocalPool;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Pending exactly once, so concurrent callers really overlap
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// In-memory fetcher; unknown URLs answer 404
#[derive(Default)]
pub struct StubFetcher {
    responses: RefCell<HashMap<String, Result<String, FetchError>>>,
    calls: RefCell<HashMap<String, usize>>,
}

impl StubFetcher {
    pub fn serve(&self, url: &str, body: Value) {
        self.serve_raw(url, &body.to_string());
    }

    pub fn serve_raw(&self, url: &str, body: &str) {
        self.responses
            .borrow_mut()
            .insert(url.to_string(), Ok(body.to_string()));
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.responses.borrow_mut().insert(
            url.to_string(),
            Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
        );
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.borrow().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.borrow().values().sum()
    }
}

#[async_trait(?Send)]
impl Fetcher for StubFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        *self.calls.borrow_mut().entry(url.to_string()).or_default() += 1;
        yield_now().await;
        let response = self.responses.borrow().get(url).cloned();
        response.unwrap_or_else(|| {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        })
    }
}

pub struct Harness {
    pub pool: LocalPool,
    pub fetcher: Rc<StubFetcher>,
    pub engine: Engine,
}

pub fn harness_with_manifest(manifest: Value) -> Harness {
    let manifest = parse_manifest(&manifest.to_string()).unwrap();
    let pool = LocalPool::new();
    let fetcher = Rc::new(StubFetcher::default());
    let engine = Engine::new(
        manifest,
        EngineConfig::default(),
        fetcher.clone(),
        Rc::new(pool.spawner()),
    );
    Harness {
        pool,
        fetcher,
        engine,
    }
}

/// Engine over a bare-array manifest
pub fn harness(paths: &[&str]) -> Harness {
    harness_with_manifest(Value::from(
        paths.iter().map(|p| Value::from(*p)).collect::<Vec<_>>(),
    ))
}

/// Run `fut` to completion; background tasks only advance as far as it needs
pub fn drive<F: Future>(pool: &mut LocalPool, fut: F) -> F::Output {
    pool.run_until(fut)
}
