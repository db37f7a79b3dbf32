//! The server: a schema plus settings, executing requests and routing
//! subscription publishes.

use crate::error::ServerResult;
use crate::settings::ServerSettings;
use ngql_runtime::{
    execute_request, Entity, EventSender, GraphQLError, GraphQLRequest, RequestContext, RequestOptions, Response,
    Schema, SchemaBuilder, SubscriptionHandle, SubscriptionId, SubscriptionRegistry,
};
use std::sync::Arc;
use tracing::{debug, info};

pub struct GraphQLServer {
    schema: Arc<Schema>,
    settings: ServerSettings,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl GraphQLServer {
    pub fn new(schema: Schema) -> Self {
        Self::with_settings(schema, ServerSettings::default())
    }

    pub fn with_settings(schema: Schema, settings: ServerSettings) -> Self {
        let schema = Arc::new(schema);
        let subscriptions = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&schema),
            settings.quota.clone(),
            settings.options,
        ));
        info!(
            types = schema.types().count(),
            options = ?settings.options,
            "server created"
        );
        Self {
            schema,
            settings,
            subscriptions,
        }
    }

    /// Builds the schema and creates a server for it.
    pub fn build(builder: SchemaBuilder, settings: ServerSettings) -> ServerResult<Self> {
        Ok(Self::with_settings(builder.build()?, settings))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    pub async fn execute(&self, request: &GraphQLRequest) -> Response {
        self.execute_with(request, RequestOptions::default()).await
    }

    /// Executes a request with per-request quota, cancellation or custom data.
    pub async fn execute_with(&self, request: &GraphQLRequest, options: RequestOptions) -> Response {
        let ctx = RequestContext::new(&self.settings.quota, self.settings.options, options)
            .with_subscriptions(Arc::clone(&self.subscriptions));
        let response = execute_request(&self.schema, request, &ctx).await;
        debug!(
            operation = request.operation_name.as_deref().unwrap_or("<anonymous>"),
            duration_ms = u64::try_from(response.metrics.duration.as_millis()).unwrap_or(u64::MAX),
            resolver_calls = response.metrics.resolver_calls,
            output_objects = response.metrics.output_objects,
            errors = response.errors.len(),
            "request completed"
        );
        response
    }

    pub async fn subscribe(
        &self,
        request: &GraphQLRequest,
        sink: EventSender,
    ) -> Result<SubscriptionHandle, Vec<GraphQLError>> {
        self.subscriptions
            .subscribe(request, RequestOptions::default(), sink)
            .await
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Publishes a payload to a topic; returns the number of subscribers reached.
    pub async fn publish(&self, topic: &str, payload: Entity) -> usize {
        self.subscriptions.publish(topic, payload).await
    }
}
