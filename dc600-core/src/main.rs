//! `dc600d`: the DC600 telematics protocol daemon. Binds the main JT/T
//! 808 listener and the JT/T 1078 media-channel listener, and runs the
//! idle-session reaper alongside them.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use clap::Parser;
use dc600_proto::frame::{FrameCodec, RawFrame};
use dc600_proto::header::MessageHeader;
use dc600_proto::message_id::outbound;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;

use dc600_core::config::Config;
use dc600_core::dispatcher::{self, AckDecision, DispatchContext, Dispatcher};
use dc600_core::session;
use dc600_core::sinks::{
    DeviceDirectory, FsMediaStore, LoggingPositionSink, MediaStore, PositionSink, StaticDeviceDirectory,
};

/// CLI overrides for the environment-driven [`Config`].
#[derive(Parser, Debug)]
#[command(name = "dc600d", about = "DC600 telematics protocol daemon")]
struct Args {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    jt1078_port: Option<u16>,
    #[arg(long)]
    media_dir: Option<String>,
}

struct AppState {
    config: Config,
    registry: session::SessionRegistry,
    dispatcher: Dispatcher,
    directory: Box<dyn DeviceDirectory>,
    position_sink: Box<dyn PositionSink>,
    media_store: Box<dyn MediaStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("dc600_core=info,dc600_proto=info")
        }))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.dc600_port = port;
    }
    if let Some(port) = args.jt1078_port {
        config.jt1078_port = port;
    }
    if let Some(dir) = args.media_dir {
        config.media_dir = dir;
    }

    let state = Arc::new(AppState {
        position_sink: Box::new(LoggingPositionSink::new("positions.jsonl")),
        media_store: Box::new(FsMediaStore::new(config.media_dir.clone())),
        directory: Box::new(StaticDeviceDirectory),
        registry: session::SessionRegistry::new(),
        dispatcher: Dispatcher::new(),
        config,
    });

    tokio::spawn(reap_idle_sessions(state.clone()));

    let main_listener = TcpListener::bind(("0.0.0.0", state.config.dc600_port)).await?;
    tracing::info!(port = state.config.dc600_port, "dc600 listener bound");
    let media_listener = TcpListener::bind(("0.0.0.0", state.config.jt1078_port)).await?;
    tracing::info!(port = state.config.jt1078_port, "jt/1078 media-channel listener bound");

    let main_state = state.clone();
    let main_loop = tokio::spawn(async move {
        loop {
            match main_listener.accept().await {
                Ok((socket, addr)) => {
                    let state = main_state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, state).await {
                            tracing::warn!(%addr, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed on main listener"),
            }
        }
    });

    let media_state = state.clone();
    let media_loop = tokio::spawn(async move {
        loop {
            match media_listener.accept().await {
                Ok((socket, addr)) => {
                    let state = media_state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, state).await {
                            tracing::warn!(%addr, error = %e, "media-channel connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed on media-channel listener"),
            }
        }
    });

    let _ = tokio::join!(main_loop, media_loop);
    Ok(())
}

async fn reap_idle_sessions(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    let timeout = Duration::from_secs(state.config.idle_timeout_secs);
    loop {
        ticker.tick().await;
        state.registry.reap_idle(timeout).await;
    }
}

/// One task per accepted connection. Frames are read and dispatched
/// strictly in order — there is no fan-out within a single connection's
/// loop, so a device's messages are always handled in the order it sent
/// them.
async fn handle_connection(socket: tokio::net::TcpStream, state: Arc<AppState>) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, FrameCodec);
    let mut out_sequence: u16 = 0;
    let mut seen_device_id: Option<String> = None;

    while let Some(frame) = framed.next().await {
        let raw: RawFrame = match frame {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "frame codec error, closing connection");
                break;
            }
        };

        let (header, consumed) = match MessageHeader::parse(&raw.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "dropping frame with unparseable header");
                continue;
            }
        };
        let body = &raw.body[consumed..];
        seen_device_id = Some(header.device_id.clone());

        let session = state
            .registry
            .get_or_create(
                &header.device_id,
                state.config.max_subpackage_assemblies,
                state.config.max_buffered_bytes,
                state.config.max_correlations,
            )
            .await;

        let outcome = {
            let mut session = session.lock().await;
            session.correlations.maybe_sweep();
            let ctx = DispatchContext {
                config: &state.config,
                directory: state.directory.as_ref(),
                media_store: state.media_store.as_ref(),
            };
            state.dispatcher.dispatch(&mut session, &header, body, &ctx)
        };

        // Completed multimedia files are written to the store and their
        // paths stamped onto a Position inside the handler itself (it
        // already holds the session lock needed to join the file back to
        // its triggering alarm) — `outcome.positions` already carries
        // whatever that produced alongside any location-report positions.
        for position in &outcome.positions {
            state.position_sink.accept(&header.device_id, position);
        }

        let mut outbound_frames = outcome.commands;
        if let Some(AckDecision::Ack(result)) = outcome.ack {
            let body = dc600_proto::command::encode_general_response(header.sequence, header.message_id, result);
            outbound_frames.push(dispatcher::OutboundFrame {
                message_id: outbound::GENERAL_RESPONSE,
                body: body.freeze(),
            });
        }

        for frame in outbound_frames {
            out_sequence = out_sequence.wrapping_add(1);
            let encoded = encode_outbound(&header.device_id, out_sequence, frame.message_id, &frame.body);
            if let Err(e) = framed.send(encoded).await {
                tracing::warn!(error = %e, "failed to write outbound frame");
                break;
            }
        }
    }

    // A DeviceSession is destroyed when its connection closes, not just
    // after an idle timeout: drop it from the registry so its in-progress
    // sub-package buffers and correlation table are released unflushed
    // rather than lingering until the next idle-reaper tick.
    if let Some(device_id) = seen_device_id {
        state.registry.remove(&device_id).await;
    }
    Ok(())
}

fn encode_outbound(device_id: &str, sequence: u16, message_id: u16, body: &Bytes) -> RawFrame {
    let header = MessageHeader {
        message_id,
        body_properties: 0,
        device_id: device_id.to_string(),
        sequence,
        sub_package: None,
    };
    let mut encoded = BytesMut::new();
    header.encode(body.len(), &mut encoded).expect("outbound body always fits in the length field");
    encoded.extend_from_slice(body);
    RawFrame { mode: dc600_proto::frame::EscapeMode::Standard, body: encoded.to_vec() }
}
