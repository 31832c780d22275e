//! `dc600-sim`: drives a single simulated DC600 device through a real
//! TCP connection for manual testing — register, authenticate, report a
//! forward-collision alarm, and upload the snapshot it triggers.

use bytes::{BufMut, BytesMut};
use clap::Parser;
use dc600_proto::frame::{EscapeMode, FrameCodec, RawFrame};
use dc600_proto::header::{MessageHeader, PackageNo};
use dc600_proto::message_id::inbound;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dc600-sim", about = "DC600 device simulator")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:5999")]
    host: String,
    #[arg(long, default_value = "013800001122")]
    device_id: String,
    /// Also simulate the forward-collision alarm + snapshot upload scenario.
    #[arg(long)]
    alarm: bool,
}

fn build_frame(device_id: &str, message_id: u16, sequence: u16, sub_package: Option<PackageNo>, body: &[u8]) -> RawFrame {
    let header = MessageHeader {
        message_id,
        body_properties: 0,
        device_id: device_id.to_string(),
        sequence,
        sub_package,
    };
    let mut encoded = BytesMut::new();
    header.encode(body.len(), &mut encoded).expect("body fits in the length field");
    encoded.extend_from_slice(body);
    RawFrame { mode: EscapeMode::Standard, body: encoded.to_vec() }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "dc600_sim=info".into()))
        .init();

    let args = Args::parse();
    let socket = TcpStream::connect(&args.host).await?;
    let mut framed = Framed::new(socket, FrameCodec);
    let mut sequence: u16 = 0;

    sequence += 1;
    framed.send(build_frame(&args.device_id, inbound::REGISTER, sequence, None, b"")).await?;
    let register_response = framed.next().await.expect("connection closed before register response")?;
    info!(body_len = register_response.body.len(), "received register response");

    let auth_token = format!("tok-{}", args.device_id);
    sequence += 1;
    framed
        .send(build_frame(&args.device_id, inbound::AUTHENTICATE, sequence, None, auth_token.as_bytes()))
        .await?;
    let _auth_ack = framed.next().await.expect("connection closed before auth ack")?;
    let _provisioning = framed.next().await.expect("connection closed before provisioning command")?;
    info!("authenticated and provisioned");

    if args.alarm {
        run_alarm_scenario(&mut framed, &args.device_id, &mut sequence).await?;
    }

    Ok(())
}

async fn run_alarm_scenario(
    framed: &mut Framed<TcpStream, FrameCodec>,
    device_id: &str,
    sequence: &mut u16,
) -> anyhow::Result<()> {
    let alarm_id: u32 = 42;

    let mut body = fixed_location_block();
    body.push(0x64); // ADAS TLV
    body.push(7);
    body.extend_from_slice(&alarm_id.to_be_bytes());
    body.push(0); // status: start
    body.push(0x01); // forward collision warning, a real-alarm type
    body.push(2); // level

    *sequence += 1;
    framed.send(build_frame(device_id, inbound::LOCATION_REPORT, *sequence, None, &body)).await?;
    let _ack = framed.next().await.expect("connection closed before location ack")?;
    info!(alarm_id, "sent forward-collision location report");

    let attachment_request = framed.next().await.expect("connection closed before 0x9208")?;
    let (header, _) = MessageHeader::parse(&attachment_request.body)?;
    info!(message_id = format!("{:#06x}", header.message_id), "received attachment request");

    let file = b"fake-jpeg-bytes-from-the-simulator";
    let chunk_size = file.len() / 2;
    for (i, chunk) in file.chunks(chunk_size.max(1)).enumerate() {
        let package_no = (i + 1) as u16;
        let total_packages = file.len().div_ceil(chunk_size.max(1)) as u16;

        let mut upload_body = BytesMut::new();
        upload_body.extend_from_slice(&alarm_id.to_be_bytes()); // multimedia id == alarm id, by convention
        upload_body.put_u8(0); // image
        upload_body.put_u8(0); // jpeg
        upload_body.put_u8(1); // event item
        upload_body.put_u8(0); // channel
        upload_body.extend_from_slice(&fixed_location_block());
        upload_body.extend_from_slice(chunk);

        *sequence += 1;
        framed
            .send(build_frame(
                device_id,
                inbound::MULTIMEDIA_UPLOAD,
                *sequence,
                Some(PackageNo { total_packages, package_no }),
                &upload_body,
            ))
            .await?;
        let _ack = framed.next().await.expect("connection closed during upload")?;
    }
    info!("uploaded snapshot attachment in sub-packages");
    Ok(())
}

fn fixed_location_block() -> Vec<u8> {
    let mut block = Vec::with_capacity(28);
    block.extend_from_slice(&0u32.to_be_bytes()); // alarm bitmap: carried separately via the TLV above
    block.extend_from_slice(&0u32.to_be_bytes()); // status
    block.extend_from_slice(&31_230_000u32.to_be_bytes()); // latitude
    block.extend_from_slice(&121_470_000u32.to_be_bytes()); // longitude
    block.extend_from_slice(&15u16.to_be_bytes()); // altitude
    block.extend_from_slice(&420u16.to_be_bytes()); // speed: 42.0 km/h
    block.extend_from_slice(&90u16.to_be_bytes()); // direction
    block.extend_from_slice(&[0x25, 0x01, 0x01, 0x12, 0x00, 0x00]); // BCD timestamp
    block
}
