//! Per-request state: errors, quota, cancellation, custom data and metrics.
//!
//! A [`RequestContext`] is created for every request and for every
//! subscription publish. It is cheap to clone and is shared by all
//! concurrently executing operation fields of the request.

use crate::config::{RequestQuota, ServerOptions};
use crate::request::Variables;
use crate::subscription::SubscriptionRegistry;
use ngql_core::{ErrorCode, GraphQLError};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Signal that unwinds the current request. The reason is already recorded
/// as an error on the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request aborted")]
pub struct RequestAborted;

/// Which cancellation source fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancelReason {
    /// The request ran past its quota duration.
    Quota = 1,
    /// The caller cancelled through its own token.
    Caller = 2,
    /// Too many errors, a fatal engine error, or the output quota.
    Aborted = 3,
}

impl CancelReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Quota),
            2 => Some(Self::Caller),
            3 => Some(Self::Aborted),
            _ => None,
        }
    }
}

/// Type-keyed storage shared by all resolvers of a request.
#[derive(Default)]
pub struct CustomData {
    data: RwLock<FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl CustomData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.data.write().insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Gets a value by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let value = self.data.read().get(&TypeId::of::<T>()).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Gets a value by type, inserting one built by `init` if missing.
    pub fn get_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut data = self.data.write();
        if let Some(value) = data
            .get(&TypeId::of::<T>())
            .and_then(|v| Arc::clone(v).downcast::<T>().ok())
        {
            return value;
        }
        let value = Arc::new(init());
        data.insert(TypeId::of::<T>(), Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        value
    }

    pub fn remove<T: Send + Sync + 'static>(&self) -> bool {
        self.data.write().remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.data.read().contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for CustomData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomData")
            .field("data_count", &self.data.read().len())
            .finish()
    }
}

/// Caller-supplied settings for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the server's default quota.
    pub quota: Option<RequestQuota>,
    /// Caller cancellation; cancelling it ends the request with `CANCELLED`.
    pub cancellation: Option<CancellationToken>,
    /// Data bag handed to resolvers; a fresh one is used when absent.
    pub custom_data: Option<Arc<CustomData>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, quota: RequestQuota) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_custom_data(mut self, data: Arc<CustomData>) -> Self {
        self.custom_data = Some(data);
        self
    }
}

/// Counters collected while a request runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetrics {
    pub duration: Duration,
    pub resolver_calls: usize,
    pub output_objects: usize,
    pub waves: usize,
}

struct RequestState {
    quota: RequestQuota,
    options: ServerOptions,
    variables: OnceLock<Arc<Variables>>,
    errors: Mutex<Vec<GraphQLError>>,
    aborted: AtomicBool,
    cancel: CancellationToken,
    caller: Option<CancellationToken>,
    cancel_reason: AtomicU8,
    started: Instant,
    deadline: tokio::time::Instant,
    resolver_calls: AtomicUsize,
    output_objects: AtomicUsize,
    waves: AtomicUsize,
    custom_data: Arc<CustomData>,
    topic: Mutex<Option<String>>,
    subscriptions: Option<Arc<SubscriptionRegistry>>,
}

/// Per-request context.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<RequestState>,
}

impl RequestContext {
    /// Creates a context; the quota clock starts now.
    pub fn new(default_quota: &RequestQuota, options: ServerOptions, request: RequestOptions) -> Self {
        let quota = request.quota.unwrap_or_else(|| default_quota.clone());
        let cancel = request
            .cancellation
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let now = tokio::time::Instant::now();
        Self {
            inner: Arc::new(RequestState {
                deadline: now + quota.max_request_time,
                quota,
                options,
                variables: OnceLock::new(),
                errors: Mutex::new(Vec::new()),
                aborted: AtomicBool::new(false),
                cancel,
                caller: request.cancellation,
                cancel_reason: AtomicU8::new(0),
                started: Instant::now(),
                resolver_calls: AtomicUsize::new(0),
                output_objects: AtomicUsize::new(0),
                waves: AtomicUsize::new(0),
                custom_data: request.custom_data.unwrap_or_default(),
                topic: Mutex::new(None),
                subscriptions: None,
            }),
        }
    }

    /// Attaches the subscription registry resolvers publish to. Only valid
    /// before the context is shared.
    pub fn with_subscriptions(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.inner) {
            state.subscriptions = Some(registry);
        }
        self
    }

    pub fn quota(&self) -> &RequestQuota {
        &self.inner.quota
    }

    pub fn options(&self) -> ServerOptions {
        self.inner.options
    }

    pub(crate) fn set_variables(&self, variables: Variables) {
        let _ = self.inner.variables.set(Arc::new(variables));
    }

    /// Coerced variable values.
    pub fn variables(&self) -> Arc<Variables> {
        self.inner.variables.get().cloned().unwrap_or_default()
    }

    pub fn custom_data(&self) -> &Arc<CustomData> {
        &self.inner.custom_data
    }

    pub fn subscriptions(&self) -> Option<&Arc<SubscriptionRegistry>> {
        self.inner.subscriptions.as_ref()
    }

    /// Token resolvers poll for cooperative cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Records an error. Past the quota's error limit a single
    /// "too many errors" entry is appended and the request aborts.
    pub fn add_error(&self, error: GraphQLError) -> Result<(), RequestAborted> {
        let mut errors = self.inner.errors.lock();
        if self.is_aborted() {
            debug!(message = %error.message, "error dropped, request already aborted");
            return Err(RequestAborted);
        }
        errors.push(error);
        if errors.len() > self.inner.quota.max_errors {
            errors.push(GraphQLError::coded(
                ErrorCode::TooManyErrors,
                "Too many errors, request aborted.",
            ));
            drop(errors);
            warn!(max_errors = self.inner.quota.max_errors, "too many errors, request aborted");
            self.abort();
            return Err(RequestAborted);
        }
        Ok(())
    }

    /// Records several errors; stops at the first abort.
    pub fn add_errors(&self, errors: impl IntoIterator<Item = GraphQLError>) -> Result<(), RequestAborted> {
        errors.into_iter().try_for_each(|e| self.add_error(e))
    }

    /// Records a fatal engine error and aborts.
    pub(crate) fn fail_fatal(&self, message: impl Into<String>) -> RequestAborted {
        let message = message.into();
        tracing::error!(%message, "fatal execution error");
        let _ = self.add_error(GraphQLError::server_error(message));
        self.abort();
        RequestAborted
    }

    /// Aborts the request without recording anything.
    pub fn abort(&self) {
        let _ = self.inner.cancel_reason.compare_exchange(
            0,
            CancelReason::Aborted as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// True once any error was recorded.
    pub fn failed(&self) -> bool {
        !self.inner.errors.lock().is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.inner.errors.lock().len()
    }

    pub fn errors(&self) -> Vec<GraphQLError> {
        self.inner.errors.lock().clone()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        CancelReason::from_u8(self.inner.cancel_reason.load(Ordering::Acquire))
    }

    /// Cancels the request; only the first source records an error.
    fn cancel_with(&self, reason: CancelReason) {
        let won = self
            .inner
            .cancel_reason
            .compare_exchange(0, reason as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            let error = match reason {
                CancelReason::Quota => {
                    warn!(max_request_time = ?self.inner.quota.max_request_time, "request time exceeded quota");
                    Some(GraphQLError::coded(
                        ErrorCode::Quota,
                        format!(
                            "Request cancelled, request time exceeded max specified by quota ({} ms).",
                            self.inner.quota.max_request_time.as_millis()
                        ),
                    ))
                }
                CancelReason::Caller => {
                    debug!("request cancelled by caller");
                    Some(GraphQLError::coded(ErrorCode::Cancelled, "Request cancelled."))
                }
                CancelReason::Aborted => None,
            };
            if let Some(error) = error {
                let _ = self.add_error(error);
            }
        }
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.cancel.cancel();
    }

    /// Checks cancellation between waves.
    pub fn check_cancelled(&self) -> Result<(), RequestAborted> {
        if self.is_aborted() {
            return Err(RequestAborted);
        }
        if tokio::time::Instant::now() >= self.inner.deadline {
            self.cancel_with(CancelReason::Quota);
            return Err(RequestAborted);
        }
        if self.caller_cancelled() {
            self.cancel_with(CancelReason::Caller);
            return Err(RequestAborted);
        }
        Ok(())
    }

    fn caller_cancelled(&self) -> bool {
        self.inner.caller.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Runs a future until it completes, the deadline passes, or the
    /// request is cancelled. The future is dropped on cancellation.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, RequestAborted> {
        self.check_cancelled()?;
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {
                if !self.is_aborted() {
                    let reason = if self.caller_cancelled() { CancelReason::Caller } else { CancelReason::Aborted };
                    self.cancel_with(reason);
                }
                Err(RequestAborted)
            }
            () = tokio::time::sleep_until(self.inner.deadline) => {
                self.cancel_with(CancelReason::Quota);
                Err(RequestAborted)
            }
            out = fut => Ok(out),
        }
    }

    /// Counts one output object against the quota.
    pub(crate) fn count_output_object(&self) -> Result<(), RequestAborted> {
        let count = self.inner.output_objects.fetch_add(1, Ordering::AcqRel) + 1;
        let max = self.inner.quota.max_output_objects;
        if count > max {
            if count == max + 1 {
                let _ = self.add_error(GraphQLError::coded(
                    ErrorCode::Quota,
                    format!("Output object count exceeded max specified by quota ({max})."),
                ));
            }
            self.abort();
            return Err(RequestAborted);
        }
        Ok(())
    }

    pub(crate) fn count_resolver_call(&self) {
        self.inner.resolver_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_wave(&self) {
        self.inner.waves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> RequestMetrics {
        RequestMetrics {
            duration: self.inner.started.elapsed(),
            resolver_calls: self.inner.resolver_calls.load(Ordering::Relaxed),
            output_objects: self.inner.output_objects.load(Ordering::Relaxed),
            waves: self.inner.waves.load(Ordering::Relaxed),
        }
    }

    /// Binds the subscription topic; set by subscription root resolvers.
    pub(crate) fn set_topic(&self, topic: String) {
        *self.inner.topic.lock() = Some(topic);
    }

    pub(crate) fn take_topic(&self) -> Option<String> {
        self.inner.topic.lock().take()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("quota", &self.inner.quota)
            .field("options", &self.inner.options)
            .field("errors", &self.error_count())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(quota: RequestQuota) -> RequestContext {
        RequestContext::new(&quota, ServerOptions::default(), RequestOptions::default())
    }

    #[test]
    fn test_error_cap_appends_single_marker() {
        let ctx = context(RequestQuota::default().with_max_errors(2));

        assert!(ctx.add_error(GraphQLError::new("a")).is_ok());
        assert!(ctx.add_error(GraphQLError::new("b")).is_ok());
        assert_eq!(ctx.add_error(GraphQLError::new("c")), Err(RequestAborted));
        assert_eq!(ctx.add_error(GraphQLError::new("d")), Err(RequestAborted));

        let errors = ctx.errors();
        assert_eq!(errors.len(), 4);
        assert_eq!(errors[3].message, "Too many errors, request aborted.");
        assert!(errors[3].has_code(ErrorCode::TooManyErrors));
        assert!(ctx.is_aborted());
        assert_eq!(ctx.cancel_reason(), Some(CancelReason::Aborted));
    }

    #[tokio::test]
    async fn test_guard_deadline_records_quota_once() {
        let ctx = context(RequestQuota::default().with_max_request_time(Duration::from_millis(20)));

        let first = ctx.guard(std::future::pending::<()>()).await;
        let second = ctx.guard(async { 1 }).await;
        assert_eq!(first, Err(RequestAborted));
        assert_eq!(second, Err(RequestAborted));

        let errors = ctx.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].has_code(ErrorCode::Quota));
        assert_eq!(ctx.cancel_reason(), Some(CancelReason::Quota));
        assert!(ctx.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_caller_cancellation_is_distinguished() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(
            &RequestQuota::default(),
            ServerOptions::default(),
            RequestOptions::new().with_cancellation(token.clone()),
        );

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.guard(std::future::pending::<()>()).await })
        };
        token.cancel();
        assert_eq!(waiter.await.unwrap(), Err(RequestAborted));

        let errors = ctx.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].has_code(ErrorCode::Cancelled));
        assert_eq!(ctx.cancel_reason(), Some(CancelReason::Caller));
    }

    #[tokio::test]
    async fn test_check_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RequestContext::new(
            &RequestQuota::default(),
            ServerOptions::default(),
            RequestOptions::new().with_cancellation(token),
        );
        assert_eq!(ctx.check_cancelled(), Err(RequestAborted));
        assert_eq!(ctx.cancel_reason(), Some(CancelReason::Caller));
        assert_eq!(ctx.errors().len(), 1);
        assert!(ctx.errors()[0].has_code(ErrorCode::Cancelled));
    }

    #[tokio::test]
    async fn test_abort_is_not_reported_as_cancellation() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(
            &RequestQuota::default(),
            ServerOptions::default(),
            RequestOptions::new().with_cancellation(token.clone()),
        );
        ctx.abort();
        assert_eq!(ctx.guard(async { 1 }).await, Err(RequestAborted));
        assert!(!token.is_cancelled());
        assert_eq!(ctx.cancel_reason(), Some(CancelReason::Aborted));
        assert!(ctx.errors().is_empty());
    }

    #[tokio::test]
    async fn test_guard_passes_through_results() {
        let ctx = context(RequestQuota::default());
        assert_eq!(ctx.guard(async { 42 }).await, Ok(42));
        assert!(ctx.check_cancelled().is_ok());
        assert!(!ctx.failed());
    }

    #[test]
    fn test_output_object_quota() {
        let ctx = context(RequestQuota::default().with_max_output_objects(2));
        assert!(ctx.count_output_object().is_ok());
        assert!(ctx.count_output_object().is_ok());
        assert!(ctx.count_output_object().is_err());
        assert!(ctx.count_output_object().is_err());
        assert_eq!(ctx.error_count(), 1);
        assert!(ctx.errors()[0].has_code(ErrorCode::Quota));
    }

    #[test]
    fn test_custom_data() {
        struct Counter(AtomicUsize);

        let data = CustomData::new();
        assert!(data.get::<Counter>().is_none());
        let counter = data.get_or_insert_with(|| Counter(AtomicUsize::new(5)));
        counter.0.fetch_add(1, Ordering::Relaxed);
        let again = data.get_or_insert_with(|| Counter(AtomicUsize::new(0)));
        assert_eq!(again.0.load(Ordering::Relaxed), 6);
        assert!(data.contains::<Counter>());
        assert!(data.remove::<Counter>());
        assert!(!data.contains::<Counter>());
    }
}
