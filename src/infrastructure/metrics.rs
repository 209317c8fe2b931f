// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::MetricsSettings;
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 启动 Prometheus 导出器并登记指标说明
///
/// 未启用或地址无效时只记录日志，不影响分类运行
pub fn init_metrics(settings: &MetricsSettings) {
    if !settings.enabled {
        return;
    }

    let addr: SocketAddr = match settings.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics address {}: {}", settings.listen_addr, e);
            return;
        }
    };

    // Ignore error if address is already in use (for development/testing)
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!("Failed to install Prometheus recorder: {}. This might happen if the port is already in use.", e);
        return;
    }

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
}

fn describe_metrics() {
    describe_counter!("classifier_domains_total", "Domains classified, by label");
    describe_counter!(
        "classifier_stage_attempts_total",
        "Fetch attempts, by stage and outcome"
    );
    describe_counter!("classifier_vision_calls_total", "Vision model calls, by outcome");
    describe_counter!(
        "classifier_budget_denied_total",
        "Metered calls refused because the run budget was spent"
    );
    describe_histogram!(
        "classifier_domain_duration_seconds",
        Unit::Seconds,
        "Wall time from fetch start to persisted result"
    );
}
