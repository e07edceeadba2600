// SPDX-FileCopyrightText: © 2026 Kubvernor authors
// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2026 Kubvernor authors.
//         This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, version 3.
//         This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//         You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
//
//

use std::{sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tracing::info;

use super::{create_router, AppState};
use crate::{cluster::ClusterBinder, configuration::Configuration, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Unable to listen for ctrl-c {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::warn!("Unable to listen for SIGTERM {e}");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutting down, waiting up to {}s for in-flight requests", SHUTDOWN_GRACE.as_secs());
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

pub async fn start(configuration: Configuration) -> Result<()> {
    let routers = configuration.build_routers()?;
    let default_mode = configuration.modes.first().cloned().unwrap_or_default();
    let state = AppState::builder()
        .routers(routers)
        .default_mode(default_mode)
        .binder(ClusterBinder::new(configuration.clusters.clone(), configuration.k8s_timeout))
        .deadline(configuration.request_deadline())
        .credentials(configuration.credentials.clone())
        .build();
    let app = create_router(Arc::new(state));

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    let address = configuration.listen_addr;
    if let Some((cert_file, key_file)) = &configuration.tls {
        let tls = RustlsConfig::from_pem_file(cert_file, key_file).await?;
        info!("Router API listening on https://{address} with modes {:?}", configuration.modes);
        axum_server::bind_rustls(address, tls).handle(handle).serve(app.into_make_service()).await?;
    } else {
        info!("Router API listening on http://{address} with modes {:?}", configuration.modes);
        axum_server::bind(address).handle(handle).serve(app.into_make_service()).await?;
    }
    info!("Router API stopped");
    Ok(())
}
