//! Built-in pollers for resource-producing and resource-less operations
//!
//! Both are stateless and parametric over the service's snapshot type; the
//! only schema they rely on is [`SnapshotView`].
//!
//! - [`WithResourcePoller`] fetches the resource named by the snapshot's
//!   response link once the operation finishes. Most create/update operations
//!   only return a link, and callers want the materialized resource.
//! - [`WithoutResourcePoller`] hands back the terminal snapshot itself. Use it
//!   for delete/cancel operations and for resources without a GET.

use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::PollError;
use crate::operation::{OperationRef, SnapshotView};
use crate::poller::Poller;

/// Service-side source of operation snapshots
#[async_trait]
pub trait OperationService: Send + Sync {
    type Snapshot: SnapshotView + Debug + Send + Sync;

    async fn get_operation(&self, operation: &OperationRef) -> Result<Self::Snapshot, PollError>;
}

/// Service-side GET of the resource an operation points at
#[async_trait]
pub trait ResourceFetcher<R>: Send + Sync {
    async fn fetch(&self, link: &str) -> Result<R, PollError>;
}

#[async_trait]
impl<R, F, Fut> ResourceFetcher<R> for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, PollError>> + Send + 'static,
    R: Send + 'static,
{
    async fn fetch(&self, link: &str) -> Result<R, PollError> {
        self(link.to_string()).await
    }
}

/// Poller that fetches the produced resource after completion
pub struct WithResourcePoller<S, F, R> {
    service: S,
    fetcher: F,
    _resource: PhantomData<fn() -> R>,
}

impl<S, F, R> WithResourcePoller<S, F, R>
where
    S: OperationService,
    F: ResourceFetcher<R>,
{
    pub fn new(service: S, fetcher: F) -> Self {
        Self {
            service,
            fetcher,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F, R> Poller for WithResourcePoller<S, F, R>
where
    S: OperationService,
    F: ResourceFetcher<R>,
    R: Send + 'static,
{
    type Snapshot = S::Snapshot;
    type Output = R;

    async fn poll(&self, operation: &OperationRef) -> Result<S::Snapshot, PollError> {
        self.service.get_operation(operation).await
    }

    async fn get_result(&self, snapshot: S::Snapshot) -> Result<R, PollError> {
        let link = snapshot.response_link().ok_or_else(|| {
            PollError::fatal("Operation finished without a link to the resulting resource")
        })?;
        tracing::debug!(link, "Fetching resource produced by operation");
        self.fetcher.fetch(link).await
    }
}

/// Poller whose result is the terminal snapshot
pub struct WithoutResourcePoller<S> {
    service: S,
}

impl<S: OperationService> WithoutResourcePoller<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: OperationService> Poller for WithoutResourcePoller<S> {
    type Snapshot = S::Snapshot;
    type Output = S::Snapshot;

    async fn poll(&self, operation: &OperationRef) -> Result<S::Snapshot, PollError> {
        self.service.get_operation(operation).await
    }

    async fn get_result(&self, snapshot: S::Snapshot) -> Result<S::Snapshot, PollError> {
        Ok(snapshot)
    }
}
