// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use clap::Parser;
use kubvernor_router::configuration::{CommandArgs, Configuration};
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

const SERVICE_NAME: &str = "kubvernor-router";
const LOG_FILE: &str = "kubvernor-router.log";
const OTLP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Keeps the log writer alive and flushes exported spans when the router stops.
struct Telemetry {
    _appender: WorkerGuard,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                warn!("Unable to flush request spans {e}");
            }
        }
    }
}

fn env_filter(variable: &str, default: &str) -> EnvFilter {
    EnvFilter::new(std::env::var(variable).unwrap_or_else(|_| default.to_owned()))
}

/// Console gets events only, the log file also gets one line per finished HTTP request span.
fn init_tracing_logging(configuration: &Configuration) -> Telemetry {
    let (file_writer, appender) = tracing_appender::non_blocking(tracing_appender::rolling::never(".", LOG_FILE));
    let console_layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(env_filter("RUST_LOG", "info"));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .with_filter(env_filter("RUST_FILE_LOG", "debug"));
    let registry = Registry::default().with(console_layer).with(file_layer);

    let Some(endpoint) = &configuration.open_telemetry_endpoint else {
        registry.init();
        return Telemetry { _appender: appender, tracer_provider: None };
    };
    match opentelemetry_otlp::SpanExporter::builder().with_tonic().with_endpoint(endpoint).with_timeout(OTLP_TIMEOUT).build() {
        Ok(exporter) => {
            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_id_generator(RandomIdGenerator::default())
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(Resource::builder().with_attributes([KeyValue::new("service.name", SERVICE_NAME)]).build())
                .build();
            let spans = tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(SERVICE_NAME)).with_filter(env_filter("RUST_TRACE_LOG", "info"));
            registry.with(spans).init();
            Telemetry { _appender: appender, tracer_provider: Some(tracer_provider) }
        },
        Err(e) => {
            registry.init();
            warn!("OpenTelemetry exporter for {endpoint} unavailable, logging only {e}");
            Telemetry { _appender: appender, tracer_provider: None }
        },
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> kubvernor_router::Result<()> {
    let configuration = Configuration::load(CommandArgs::parse())?;
    let _telemetry = init_tracing_logging(&configuration);
    // kube and axum-server pull in different rustls backends, pick one for the whole process
    if rustls::crypto::aws_lc_rs::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }
    kubvernor_router::start(configuration).await
}
