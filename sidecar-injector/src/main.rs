use crate::certificate::{generate_certificate, service_dns_names};
use crate::config::InjectorConfig;
use crate::injector::{deadline_handler, SidecarInjectorContext};
use crate::registrar::WebhookRegistrar;
use futures_util::stream::StreamExt;
use hyper::server::accept;
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use kube::Api;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use sidecar_common::constants::{SIDECAR_LOG_CONFIG_FILE, SIDECAR_LOG_CONFIG_FILE_ENV};
use sidecar_common::errors::SidecarServiceError;
use sidecar_common::kubernetes::get_k8s_client;
use sidecar_common::policy::load_policy;
use sidecar_macros::logger;
use std::convert::Infallible;
use std::error::Error;
use std::future::ready;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tls_listener::TlsListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tokio::time::timeout;

mod certificate;
mod config;
mod errors;
mod injector;
mod patch;
mod registrar;

pub type Acceptor = tokio_rustls::TlsAcceptor;

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(60);
const STDOUT_LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} [{t}] {m}{n}";

logger!("Main");

fn init_logger() {
    let log_config_file = std::env::var(SIDECAR_LOG_CONFIG_FILE_ENV)
        .unwrap_or_else(|_| SIDECAR_LOG_CONFIG_FILE.to_string());
    match log4rs::init_file(&log_config_file, Default::default()) {
        Ok(_) => debug!("Logger initialized from {}", log_config_file),
        Err(file_error) => {
            let stdout = ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new(STDOUT_LOG_PATTERN)))
                .build();
            let config = Config::builder()
                .appender(Appender::builder().build("stdout", Box::new(stdout)))
                .build(Root::builder().appender("stdout").build(LevelFilter::Info));
            match config.map(log4rs::init_config) {
                Ok(Ok(_)) => warn!(
                    "Unable to load logging configuration from {}, logging to stdout: {}",
                    log_config_file, file_error
                ),
                Ok(Err(e)) => eprintln!("Unable to initialize logger: {}", e),
                Err(e) => eprintln!("Unable to build logger configuration: {}", e),
            }
        }
    }
}

async fn shutdown_signal() -> Result<&'static str, std::io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r.map(|_| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

async fn register_webhook(
    config: &InjectorConfig,
    ca_pem: &str,
) -> Result<(), SidecarServiceError> {
    let k8s_client = get_k8s_client().await?;
    let api: Api<MutatingWebhookConfiguration> = Api::all(k8s_client);
    let registrar = WebhookRegistrar {
        service_name: config.service_name.clone(),
        service_namespace: config.namespace.clone(),
        inject_path: config.inject_path.clone(),
    };
    let outcome = timeout(REGISTRATION_TIMEOUT, registrar.reconcile(&api, ca_pem))
        .await
        .map_err(|_| {
            SidecarServiceError::from_string(format!(
                "Webhook registration did not finish in {:?}",
                REGISTRATION_TIMEOUT
            ))
            .with_component("WebhookRegistrar")
        })??;
    info!("Webhook registration: {:?}", outcome);
    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = InjectorConfig::from_env()?;
    info!("Starting with configuration: {:?}", config);

    let certificate_bundle = generate_certificate(
        &config.cert_organization,
        &service_dns_names(&config.service_name, &config.namespace),
        &config.common_name(),
    )?;
    let policy = load_policy(&config.policy_file)?;
    register_webhook(&config, &certificate_bundle.ca_pem).await?;

    let sidecar_context = Arc::new(SidecarInjectorContext::new(
        policy,
        config.inject_path.clone(),
        config.request_timeout,
    ));
    let ssl_config = certificate_bundle.server_config()?;
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let tls_acceptor: Acceptor = Arc::new(ssl_config).into();
    let make_service = make_service_fn(move |_conn| {
        let sidecar_context = sidecar_context.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                deadline_handler(req, sidecar_context.clone())
            }))
        }
    });
    let incoming = TlsListener::new(tls_acceptor, AddrIncoming::bind(&addr)?).filter(|c| {
        if let Err(e) = c {
            error!("Error accepting connection: {:?}", e);
            ready(false)
        } else {
            ready(true)
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = Server::builder(accept::from_stream(incoming))
        .serve(make_service)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });
    tokio::pin!(server);

    info!("Starting Sidecar Injector server on {}", addr);
    tokio::select! {
        result = &mut server => {
            result?;
            return Ok(());
        }
        signal = shutdown_signal() => {
            info!("Received {}, draining in-flight requests", signal?);
        }
    }

    shutdown_tx.send(()).ok();
    match timeout(config.shutdown_grace, server).await {
        Ok(result) => result?,
        Err(_) => warn!(
            "In-flight requests not finished after {:?}, exiting",
            config.shutdown_grace
        ),
    }
    info!("Sidecar Injector server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logger();
    if let Err(e) = run().await {
        error!("Unable to run Sidecar Injector: {}", e);
        return Err(e);
    }
    Ok(())
}
