use std::collections::HashMap;

use opentelemetry::trace::TracerProvider as TracerProviderTrait;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber for a meridian component.
///
/// `RUST_LOG` wins over `default_filter`. When `otlp_endpoint` is set, spans are
/// additionally exported over OTLP/HTTP (the exporter appends `/v1/traces`), with
/// `otlp_token` sent as a bearer token.
///
/// The returned provider must be kept alive and shut down before exit.
pub fn init_tracing(
    service_name: &str,
    default_filter: &str,
    otlp_endpoint: Option<&str>,
    otlp_token: Option<&str>,
) -> Option<TracerProvider> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let provider = otlp_endpoint.and_then(|endpoint| build_provider(service_name, endpoint, otlp_token));

    match provider {
        Some(provider) => {
            let otel_layer =
                tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
            tracing::info!(service_name, "OTLP span export enabled");
            Some(provider)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            None
        }
    }
}

fn build_provider(service_name: &str, endpoint: &str, token: Option<&str>) -> Option<TracerProvider> {
    let mut headers = HashMap::new();
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_headers(headers)
        .build()
    {
        Ok(e) => e,
        Err(err) => {
            // subscriber is not installed yet
            eprintln!("failed to create OTLP exporter for {endpoint}: {err}, logging to stdout only");
            return None;
        }
    };

    Some(
        TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(Resource::new([KeyValue::new(
                "service.name",
                service_name.to_string(),
            )]))
            .build(),
    )
}
