//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Supervisor (spec §4.9 K): loads the config document, builds one capture
//! loop per device, starts each device's HTTP router, awaits a termination
//! signal, and drains everything cleanly.

mod mqtt;
mod pipeline_builder;
mod signals;

use anyhow::{Context, Result};
use axum::Router;
use docopt::Docopt;
use log::{error, info};
use sentrymesh_capture::{CaptureLoop, RetinaSourceFactory};
use sentrymesh_core::{DeviceInfo, Termination};
use serde::Deserialize;
use std::sync::Arc;
use std::thread;

const USAGE: &str = "
sentrymesh-supervisor

Usage:
  sentrymesh-supervisor <config>
  sentrymesh-supervisor (-h | --help)

Options:
  -h --help     Show this message.
";

#[derive(Deserialize)]
struct Args {
    arg_config: String,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let root_config = sentrymesh_config::load(std::path::Path::new(&args.arg_config))
        .context("loading config document")?;

    let termination = Termination::new();
    signals::install(termination.clone()).context("installing signal handlers")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime for HTTP routers")?;

    let mut capture_threads = Vec::new();
    let mut http_servers = Vec::new();

    for device_cfg in &root_config.devices {
        let built = pipeline_builder::build(device_cfg)
            .with_context(|| format!("building pipeline for device '{}'", device_cfg.device.name))?;

        if let (Some(http_state), Some(service)) = (built.http_state.clone(), device_cfg.http_service.clone()) {
            let router: Router = sentrymesh_snapshot::router(http_state);
            let addr = format!("{}:{}", service.interface, service.port);
            http_servers.push((addr, router, device_cfg.device.name.clone()));
        }

        let device = DeviceInfo {
            name: device_cfg.device.name.clone(),
            uri: device_cfg.device.uri.clone(),
            expected_width: device_cfg.device.expected_frame_size.width,
            expected_height: device_cfg.device.expected_frame_size.height,
        };
        let factory: Arc<dyn sentrymesh_capture::VideoSourceFactory> = Arc::new(RetinaSourceFactory);
        let device_termination = termination.clone();

        capture_threads.push(
            thread::Builder::new()
                .name(format!("capture-{}", device.name))
                .spawn(move || {
                    let mut capture_loop =
                        CaptureLoop::new(device, factory, built.executor, device_termination);
                    capture_loop.run();
                })
                .with_context(|| format!("spawning capture thread for device '{}'", device_cfg.device.name))?,
        );
    }

    let termination_for_http = termination.clone();
    runtime.spawn(async move {
        let mut tasks = Vec::new();
        for (addr, router, name) in http_servers {
            let termination = termination_for_http.clone();
            tasks.push(tokio::spawn(async move {
                match tokio::net::TcpListener::bind(&addr).await {
                    Ok(listener) => {
                        info!("{name}: HTTP snapshot surface listening on {addr}");
                        let shutdown = async move {
                            while !termination.is_requested() {
                                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                            }
                        };
                        if let Err(e) = axum::serve(listener, router)
                            .with_graceful_shutdown(shutdown)
                            .await
                        {
                            error!("{name}: HTTP server error: {e}");
                        }
                    }
                    Err(e) => error!("{name}: failed to bind {addr}: {e}"),
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    });

    for handle in capture_threads {
        let _ = handle.join();
    }

    info!("all capture loops terminated, shutting down");
    Ok(())
}
