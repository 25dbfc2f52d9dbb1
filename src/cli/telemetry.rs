//! Log subscriber and optional OTLP span export.
//!
//! Export is switched on by `OTEL_EXPORTER_OTLP_ENDPOINT`; without it only the
//! local formatter runs.

use anyhow::{Context, Result, bail};
use once_cell::sync::OnceCell;
use opentelemetry::{
    KeyValue, global,
    propagation::TextMapCompositePropagator,
    trace::TracerProvider as _,
};
use opentelemetry_otlp::{Compression, SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Collector settings read from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct Collector {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl Collector {
    fn from_env() -> Option<Self> {
        let endpoint = env::var(ENDPOINT_ENV).ok()?;
        if let Ok(protocol) = env::var("OTEL_EXPORTER_OTLP_PROTOCOL")
            && protocol != "grpc"
        {
            debug!(%protocol, "Ignoring OTLP protocol, exporting over gRPC");
        }

        Some(Self {
            endpoint: with_scheme(&endpoint),
            headers: env::var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| header_pairs(&raw))
                .unwrap_or_default(),
            instance_id: env::var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        })
    }

    /// Host to verify the collector certificate against, for https endpoints.
    fn tls_domain(&self) -> Option<&str> {
        let authority = self.endpoint.strip_prefix("https://")?.split('/').next()?;
        authority.split(':').next().filter(|host| !host.is_empty())
    }

    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let key = key.to_ascii_lowercase();
            if key.ends_with("-bin") {
                bail!("binary OTLP header {key} is not supported");
            }
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid OTLP header name {key}"))?;
            let value = MetadataValue::<Ascii>::try_from(value.as_str())
                .with_context(|| format!("invalid OTLP header value for {key}"))?;
            metadata.insert(name, value);
        }
        Ok(metadata)
    }

    fn tracer(&self) -> Result<Tracer> {
        let mut exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_compression(Compression::Gzip)
            .with_timeout(EXPORT_TIMEOUT);

        if let Some(domain) = self.tls_domain() {
            exporter = exporter.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain.to_string())
                    .with_native_roots(),
            );
        }
        if !self.headers.is_empty() {
            exporter = exporter.with_metadata(self.metadata()?);
        }

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
            ])
            .build();

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter.build()?)
            .with_resource(resource)
            .build();

        let _ = PROVIDER.set(provider.clone());
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// `k1=v1,k2=v2`; malformed pairs are dropped.
fn header_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    for directive in ["hyper=error", "tokio=error", "sqlx=warn", "opentelemetry_sdk=warn"] {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Install the global subscriber.
///
/// # Errors
/// Fails if the exporter cannot be built or a subscriber is already set.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .pretty();
    let filter = env_filter(verbosity_level.unwrap_or(Level::ERROR))?;

    match Collector::from_env() {
        Some(collector) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(collector.tracer()?);
            tracing::subscriber::set_global_default(
                Registry::default().with(fmt_layer).with(otel_layer).with(filter),
            )?;
        }
        None => {
            tracing::subscriber::set_global_default(
                Registry::default().with(fmt_layer).with(filter),
            )?;
        }
    }

    Ok(())
}

/// Flush pending spans. No-op when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = PROVIDER.get() {
        debug!("Shutting down tracer provider");
        let _ = provider.shutdown();
    }
}
