//! Entry point for the Prodigy Remote In driver core.
//!
//! Wires C1-C8 together and runs until interrupted. The areaDetector asyn port
//! driver / parameter library this binary would normally sit inside of is out of
//! scope (§1); this binary stands in for it with a thin CLI front end: a
//! `--dry-run` flag exercises the whole stack against an in-process mock Prodigy
//! server instead of real hardware, the same "mock mode" idiom as `ScpiActor::mock`.

use std::sync::Arc;

use kameo::Actor;
use tracing::{info, warn};

use kreios_prodigy_driver::acquisition::{AcquisitionActor, AcquisitionDeps, StartAcquisition};
use kreios_prodigy_driver::broker::{self, Broker, ProdigyEndpoint};
use kreios_prodigy_driver::config::DriverConfig;
use kreios_prodigy_driver::data_reader::DataReader;
use kreios_prodigy_driver::model::RunMode;
use kreios_prodigy_driver::parameters::ParameterMirror;
use kreios_prodigy_driver::protocol::Transport;
use kreios_prodigy_driver::published_state::{LoggingFrameSink, PublishedState};
use kreios_prodigy_driver::spectrum::{SpectrumDefiner, SpectrumInputs};
use kreios_prodigy_driver::testing::mock_server::MockProdigyServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dry_run = std::env::args().any(|arg| arg == "--dry-run");
    let config = DriverConfig::load(std::env::var("PRODIGY_CONFIG").ok().as_deref())?;

    let mock_server_guard = if dry_run {
        info!("dry-run mode: wiring against an in-process mock Prodigy server");
        let server = MockProdigyServer::start(dry_run_script()).await;
        Some(server)
    } else {
        None
    };

    let (host, port) = if let Some(server) = &mock_server_guard {
        ("127.0.0.1".to_string(), server.port())
    } else {
        (config.host.clone(), config.port)
    };

    let transport = Transport::connect(
        &host,
        port,
        config.connect_timeout(),
        config.request_timeout(),
    )
    .await?;
    let broker = Broker::new(transport);
    info!(%host, port, "connected to Prodigy server");

    let (server_name, (major, minor)) = broker::connect(broker.as_ref()).await?;
    info!(server_name = %server_name, major, minor, "completed Prodigy handshake");

    let published_state = Arc::new(PublishedState::new(Arc::new(LoggingFrameSink::default())));
    published_state.connected.send_replace(true);
    published_state.server_name.send_replace(server_name);
    published_state.protocol_version.send_replace((major, minor));

    let parameters = Arc::new(ParameterMirror::new(broker.clone()));
    match parameters.enumerate().await {
        Ok(count) => info!(count, "enumerated analyzer parameters"),
        Err(err) => warn!(%err, "parameter enumeration failed, continuing with an empty mirror"),
    }

    let deps = Arc::new(AcquisitionDeps {
        endpoint: broker.clone() as Arc<dyn ProdigyEndpoint>,
        spectrum_definer: SpectrumDefiner::new(broker.clone()),
        data_reader: DataReader::new(broker.clone()),
        parameters: parameters.clone(),
        published_state: published_state.clone(),
        poll_interval: config.poll_interval(),
        max_values_per_read: config.max_values_per_read,
    });

    let actor_ref = AcquisitionActor::spawn(AcquisitionActor::new(deps));

    if dry_run {
        run_demo_session(&actor_ref).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Err(err) = broker::disconnect(broker.as_ref()).await {
        warn!(%err, "failed to cleanly disconnect from Prodigy server");
    }
    Ok(())
}

async fn run_demo_session(
    actor_ref: &kameo::actor::ActorRef<AcquisitionActor>,
) -> anyhow::Result<()> {
    actor_ref
        .ask(StartAcquisition {
            run_mode: RunMode::Fat,
            iterations_requested: 1,
            safe_after: true,
            inputs: SpectrumInputs {
                start_energy: 400.0,
                end_energy: 410.0,
                step_width: 0.5,
                pass_energy: 20.0,
                dwell_time: 0.05,
                lens_mode: "WideAngle".to_string(),
                scan_range: "Narrow".to_string(),
                ..Default::default()
            },
        })
        .await
        .map_err(|err| anyhow::anyhow!("dry-run demo session failed to start: {err}"))?;
    Ok(())
}

/// A canned reply script covering the happy-path FAT sequence (§8 scenario 1),
/// just enough to let `--dry-run` run end to end without real hardware.
fn dry_run_script() -> Vec<(String, String)> {
    vec![
        (
            "Connect".to_string(),
            "OK: ServerName:\"MockProdigy\" ProtocolVersion:1.22".to_string(),
        ),
        ("GetAllAnalyzerParameterNames".to_string(), "OK: Names:[]".to_string()),
        ("ClearSpectrum".to_string(), "OK".to_string()),
        ("DefineSpectrumFAT".to_string(), "OK".to_string()),
        (
            "ValidateSpectrum".to_string(),
            "OK: Samples:21 ValuesPerSample:1 NumberOfSlices:1".to_string(),
        ),
        ("ClearSpectrum".to_string(), "OK".to_string()),
        ("Start".to_string(), "OK".to_string()),
        (
            "GetAcquisitionStatus".to_string(),
            "OK: ControllerState:Finished NumberOfAcquiredPoints:21".to_string(),
        ),
        (
            "GetAcquisitionData".to_string(),
            format!(
                "OK: Data:[{}]",
                (0..21).map(|i| i.to_string()).collect::<Vec<_>>().join(",")
            ),
        ),
        ("Disconnect".to_string(), "OK".to_string()),
    ]
}
