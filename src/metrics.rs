// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

//! Prometheus metrics exported on `/metrics`.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::Result;

lazy_static! {
    pub static ref ROUTER_METRICS_REGISTRY: Registry = Registry::new();

    static ref HTTP_REQUESTS_TOTAL: IntCounterVec = {
        let opts = Opts::new("http_requests_total", "Total number of HTTP requests handled by the router API");
        let counter = IntCounterVec::new(opts, &["handler", "method", "code"]).expect("Failed to create counter");
        ROUTER_METRICS_REGISTRY.register(Box::new(counter.clone())).expect("Failed to register counter");
        counter
    };

    static ref HTTP_REQUEST_DURATION: HistogramVec = {
        let opts = HistogramOpts::new("http_request_duration_seconds", "Latency of HTTP requests handled by the router API");
        let histogram = HistogramVec::new(opts, &["handler", "method"]).expect("Failed to create histogram");
        ROUTER_METRICS_REGISTRY.register(Box::new(histogram.clone())).expect("Failed to register histogram");
        histogram
    };

    static ref ROUTER_OPERATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new("router_operations_total", "Total number of router operations by mode and result");
        let counter = IntCounterVec::new(opts, &["mode", "operation", "result"]).expect("Failed to create counter");
        ROUTER_METRICS_REGISTRY.register(Box::new(counter.clone())).expect("Failed to register counter");
        counter
    };
}

pub fn record_request(handler: &str, method: &str, code: u16, elapsed: Duration) {
    HTTP_REQUESTS_TOTAL.with_label_values(&[handler, method, &code.to_string()]).inc();
    HTTP_REQUEST_DURATION.with_label_values(&[handler, method]).observe(elapsed.as_secs_f64());
}

pub fn record_operation<T>(mode: &str, operation: &str, result: &Result<T>) {
    let outcome = if result.is_ok() { "success" } else { "error" };
    ROUTER_OPERATIONS_TOTAL.with_label_values(&[mode, operation, outcome]).inc();
}

/// Text exposition of every registered metric.
pub fn gather() -> Result<String> {
    // registers the families on first use
    let _ = (&*HTTP_REQUESTS_TOTAL, &*HTTP_REQUEST_DURATION, &*ROUTER_OPERATIONS_TOTAL);
    let mut buffer = vec![];
    TextEncoder::new().encode(&ROUTER_METRICS_REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
