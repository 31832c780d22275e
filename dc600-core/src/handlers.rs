//! One function per message id this core understands, called through
//! [`crate::dispatcher::Dispatcher`]. A handler decodes its body, updates
//! the session, and hands back whatever positions, completed media, and
//! outbound commands resulted — it never writes to a socket directly.

use dc600_proto::command::{self, AlarmAttachmentRequest};
use dc600_proto::header::MessageHeader;
use dc600_proto::location::{self, AdasDsmEvent, AlarmClass, Position};
use dc600_proto::media;
use dc600_proto::message_id::{outbound, AckResult};

use crate::dispatcher::{DispatchContext, HandlerOutcome, OutboundFrame};
use crate::session::{AuthStatus, DeviceSession};

fn device_bcd(device_id: &str) -> [u8; 6] {
    dc600_proto::bcd::encode_device_id(device_id).unwrap_or([0u8; 6])
}

/// Human-legible label for an ADAS/DSM alarm, e.g. `"ADAS_01"` — what
/// gets stamped as `eventAlarmType` on a Position once the multimedia
/// file this alarm triggered finishes assembling.
fn adas_dsm_label(source: location::AdasDsmSource, alarm_type: u8) -> String {
    let prefix = match source {
        location::AdasDsmSource::Adas => "ADAS",
        location::AdasDsmSource::Dsm => "DSM",
    };
    format!("{prefix}_{alarm_type:02X}")
}

fn extension_for(format: media::MultimediaFormat) -> &'static str {
    match format {
        media::MultimediaFormat::Jpeg => "jpg",
        media::MultimediaFormat::Tif => "tif",
        media::MultimediaFormat::Mp3 => "mp3",
        media::MultimediaFormat::Wav => "wav",
        media::MultimediaFormat::Wmv => "wmv",
        media::MultimediaFormat::Unknown(_) => "bin",
    }
}

fn to_bcd_byte(value: u32) -> u8 {
    (((value / 10) % 10) as u8) << 4 | (value % 10) as u8
}

/// Builds the 16-byte alarm flag carried in a 0x9208 request: a 7-byte
/// device id (the 6-byte phone-number BCD left-padded with a leading zero
/// byte), a 6-byte BCD timestamp, the alarm id, the alarm type, and one
/// reserved byte — so the device has enough context to know unambiguously
/// which alarm is being asked for. `alarm_id`/`alarm_type` are truncated to
/// a single byte each to match the wire layout; real alarm ids and types
/// both fit in a byte in practice.
fn build_alarm_flag(
    device_id: &str,
    alarm_id: u32,
    alarm_type: u8,
    time: chrono::DateTime<chrono::Utc>,
) -> [u8; 16] {
    use chrono::Datelike;
    use chrono::Timelike;

    let mut flag = [0u8; 16];
    flag[1..7].copy_from_slice(&device_bcd(device_id));
    flag[7] = to_bcd_byte((time.year() as u32) % 100);
    flag[8] = to_bcd_byte(time.month());
    flag[9] = to_bcd_byte(time.day());
    flag[10] = to_bcd_byte(time.hour());
    flag[11] = to_bcd_byte(time.minute());
    flag[12] = to_bcd_byte(time.second());
    flag[13] = alarm_id as u8;
    flag[14] = alarm_type;
    // flag[15] reserved, left zero
    flag
}

fn attachment_request_frame(
    session: &mut DeviceSession,
    device_id: &str,
    alarm_id: u32,
    alarm_type: u8,
    time: chrono::DateTime<chrono::Utc>,
    ctx: &DispatchContext,
) -> Option<OutboundFrame> {
    let Some(server_ip) = ctx.config.attachment_ip.clone() else {
        tracing::warn!(device_id, "cannot emit 0x9208: no attachment IP configured");
        return None;
    };
    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let alarm_number = format!("ALM-{device_id}-{alarm_id}-{epoch_ms}");
    let request = AlarmAttachmentRequest {
        server_ip,
        tcp_port: ctx.config.attachment_port,
        udp_port: ctx.config.attachment_port,
        alarm_flag: build_alarm_flag(device_id, alarm_id, alarm_type, time),
        alarm_number: alarm_number.clone(),
    };
    session.correlations.set_alarm_number(alarm_id, alarm_number);
    let body = command::encode_alarm_attachment_request(&request);
    Some(OutboundFrame { message_id: outbound::ALARM_ATTACHMENT_REQUEST, body: body.freeze() })
}

/// Runs the alarm-gating and correlation logic shared by a single
/// location report and every entry of a batch upload: records each
/// ADAS/DSM event in the correlation table, requests attachments for the
/// ones that warrant it, and does the same for a bare 0x70 marker.
fn process_position_alarms(
    session: &mut DeviceSession,
    device_id: &str,
    position: &Position,
    ctx: &DispatchContext,
) -> Vec<OutboundFrame> {
    let mut commands = Vec::new();

    for event in &position.additional.adas_dsm_events {
        let AdasDsmEvent { source, alarm_id, alarm_type, class, .. } = *event;
        session.correlations.record_alarm(alarm_id, adas_dsm_label(source, alarm_type), class);
        if command::wants_attachment_request(class) {
            // A real alarm gets both an immediate snapshot (in case the
            // attachment the device already has isn't framed the way an
            // operator would want) and a request for whatever footage it
            // already recorded around the event. Channel 1 is the fixed
            // forward-facing channel this platform always shoots on.
            let snapshot = command::encode_camera_command(1);
            commands.push(OutboundFrame { message_id: outbound::CAMERA_COMMAND, body: snapshot.freeze() });

            if let Some(frame) = attachment_request_frame(session, device_id, alarm_id, alarm_type, position.time, ctx) {
                commands.push(frame);
            }
        }
    }

    if let Some(marker) = position.additional.multimedia_marker {
        if command::wants_attachment_request_for_marker(marker.multimedia_id) {
            session.correlations.record_alarm(marker.multimedia_id, "MARKER", AlarmClass::RealAlarm);
            session.correlations.attach_media(marker.multimedia_id, marker.multimedia_id);

            let snapshot = command::encode_camera_command(1);
            commands.push(OutboundFrame { message_id: outbound::CAMERA_COMMAND, body: snapshot.freeze() });

            if let Some(frame) =
                attachment_request_frame(session, device_id, marker.multimedia_id, 0x70, position.time, ctx)
            {
                commands.push(frame);
            }
        } else {
            tracing::debug!(device_id, "ignoring 0x70 marker with multimedia_id 0 (known device quirk)");
        }
    } else if commands.is_empty() {
        // No ADAS/DSM TLV and no multimedia marker — fall back to the
        // base JT/T 808 alarm bitmap. Only the handful of bits severe
        // enough to count as a real safety alarm (not overspeed, device
        // faults, or geofence crossings) get the same capture/attachment
        // treatment, using the bit index itself as the synthetic alarm id.
        if let Some(bit) = dc600_proto::alarm::lowest_real_safety_bit(position.alarm_bitmap) {
            session.correlations.record_alarm(bit, format!("BITMAP_{bit:02}"), AlarmClass::RealAlarm);

            let snapshot = command::encode_camera_command(1);
            commands.push(OutboundFrame { message_id: outbound::CAMERA_COMMAND, body: snapshot.freeze() });

            if let Some(frame) = attachment_request_frame(session, device_id, bit, 0, position.time, ctx) {
                commands.push(frame);
            }
        }
    }

    commands
}

pub fn handle_general_response(
    _session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    _ctx: &DispatchContext,
) -> HandlerOutcome {
    // Devices occasionally ack a platform-initiated command (e.g. the
    // 0x8801 camera command); there is nothing further to do but note it,
    // except for a negative ack of a prior 0x8103: some firmware rejects
    // an unrecognized parameter id, and the rest of the flow (0x70
    // fallback alarms included) still works without it, so this is logged
    // and otherwise ignored rather than treated as a session failure.
    if let Some(response) = command::decode_general_response(body) {
        if response.response_message_id == outbound::PARAMETER_SETTING
            && !matches!(response.result, AckResult::Success)
        {
            tracing::warn!(
                device_id = %header.device_id,
                result = ?response.result,
                "device rejected ADAS/DSM parameter provisioning, continuing degraded to 0x70 fallback"
            );
        }
    }
    HandlerOutcome { ack: None, ..Default::default() }
}

pub fn handle_heartbeat(
    session: &mut DeviceSession,
    _header: &MessageHeader,
    _body: &[u8],
    _ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    HandlerOutcome::ack(AckResult::Success)
}

pub fn handle_register(
    session: &mut DeviceSession,
    header: &MessageHeader,
    _body: &[u8],
    ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    let context = ctx.directory.resolve(&header.device_id);
    if !context.known {
        tracing::warn!(device_id = %header.device_id, "registration rejected: unknown device");
        let body = command::encode_register_response(header.sequence, AckResult::Failure, "");
        return HandlerOutcome {
            ack: None,
            commands: vec![OutboundFrame { message_id: outbound::REGISTER_RESPONSE, body: body.freeze() }],
            ..Default::default()
        };
    }

    session.auth = AuthStatus::Registered;
    tracing::info!(device_id = %header.device_id, "device registered");
    let body = command::encode_register_response(header.sequence, AckResult::Success, &context.auth_token);

    // 0x8103 goes out right behind the registration response too, not
    // just after authentication, so a freshly registered device has its
    // ADAS/DSM parameters even if it takes a while to authenticate.
    let provisioning_body = command::encode_parameter_setting(&command::default_adas_dsm_parameters());

    HandlerOutcome {
        ack: None,
        commands: vec![
            OutboundFrame { message_id: outbound::REGISTER_RESPONSE, body: body.freeze() },
            OutboundFrame { message_id: outbound::PARAMETER_SETTING, body: provisioning_body.freeze() },
        ],
        ..Default::default()
    }
}

pub fn handle_authenticate(
    session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    let presented = String::from_utf8_lossy(body).trim_end_matches('\0').to_string();
    let expected = ctx.directory.resolve(&header.device_id).auth_token;

    if presented != expected {
        tracing::warn!(device_id = %header.device_id, "authentication failed: token mismatch");
        return HandlerOutcome::ack(AckResult::Failure);
    }

    session.auth = AuthStatus::Authenticated;
    tracing::info!(device_id = %header.device_id, "device authenticated");

    // Provisioning is resent unconditionally on every successful
    // authentication — no "already provisioned" short-circuit, so a
    // device that lost its settings across a firmware reset is always
    // brought back up to the expected ADAS/DSM configuration.
    let params = command::default_adas_dsm_parameters();
    let provisioning_body = command::encode_parameter_setting(&params);
    session.provisioned = true;

    HandlerOutcome {
        ack: Some(crate::dispatcher::AckDecision::Ack(AckResult::Success)),
        commands: vec![OutboundFrame {
            message_id: outbound::PARAMETER_SETTING,
            body: provisioning_body.freeze(),
        }],
        ..Default::default()
    }
}

pub fn handle_location(
    session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    let out_of_order = if !matches!(session.auth, AuthStatus::Authenticated) {
        let err = crate::error::SessionError::NotAuthenticated(header.device_id.clone(), header.message_id);
        tracing::warn!(device_id = %header.device_id, error = %err, "location report before authentication, processing anyway");
        Some(err)
    } else {
        None
    };

    match location::decode_location(body, &ctx.config.timezone) {
        Ok(position) => {
            let commands = process_position_alarms(session, &header.device_id, &position, ctx);
            let result = out_of_order
                .as_ref()
                .map(crate::error::result_for_session_error)
                .unwrap_or(AckResult::Success);
            HandlerOutcome {
                positions: vec![position],
                ack: Some(crate::dispatcher::AckDecision::Ack(result)),
                commands,
                ..Default::default()
            }
        }
        Err(e) => {
            tracing::warn!(device_id = %header.device_id, error = %e, "failed to decode location report");
            HandlerOutcome::ack(AckResult::Failure)
        }
    }
}

pub fn handle_batch_upload(
    session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    let positions = location::decode_batch_upload(body, &ctx.config.timezone);
    let mut commands = Vec::new();
    for position in &positions {
        commands.extend(process_position_alarms(session, &header.device_id, position, ctx));
    }
    HandlerOutcome {
        positions,
        ack: Some(crate::dispatcher::AckDecision::Ack(AckResult::Success)),
        commands,
        ..Default::default()
    }
}

pub fn handle_multimedia_event(
    session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    match media::decode_event_announcement(body, &ctx.config.timezone) {
        Ok(prefix) => {
            tracing::info!(device_id = %header.device_id, multimedia_id = prefix.multimedia_id, "multimedia event announced");
            HandlerOutcome::ack(AckResult::Success)
        }
        Err(e) => {
            tracing::warn!(device_id = %header.device_id, error = %e, "failed to decode multimedia event announcement");
            HandlerOutcome::ack(AckResult::Failure)
        }
    }
}

pub fn handle_multimedia_upload(
    session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    let (package_no, total_packages) = header
        .sub_package
        .map(|p| (p.package_no, p.total_packages))
        .unwrap_or((1, 1));

    let chunk = match media::decode_upload_chunk(body, &ctx.config.timezone) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(device_id = %header.device_id, error = %e, "failed to decode multimedia upload chunk");
            return HandlerOutcome::ack(AckResult::Failure);
        }
    };

    let multimedia_id = chunk.prefix.multimedia_id;
    let result = session.feed_chunk(
        multimedia_id,
        package_no,
        total_packages,
        Some(chunk.prefix),
        chunk.data,
    );

    match result {
        Ok(Some(completed)) => {
            let prefix = completed.prefix.expect("prefix is set on first packet");
            let mut position = prefix.position.clone();

            match ctx.media_store.write(&header.device_id, &completed.bytes, extension_for(prefix.format)) {
                Ok(path) => {
                    match prefix.media_type {
                        media::MultimediaType::Image => position.image_path = Some(path.clone()),
                        media::MultimediaType::Video => position.video_path = Some(path.clone()),
                        media::MultimediaType::Audio => position.audio_path = Some(path.clone()),
                        media::MultimediaType::Unknown(_) => {}
                    }
                    if let Some(stamp) = session.correlations.mark_received(multimedia_id, path) {
                        tracing::info!(
                            device_id = %header.device_id,
                            alarm_id = stamp.alarm_id,
                            multimedia_id,
                            "correlated multimedia upload with prior alarm event"
                        );
                        position.event_alarm_id = Some(stamp.alarm_id);
                        position.event_alarm_type = Some(stamp.alarm_type_label);
                        position.event = Some("alarmMultimediaComplete");
                    }
                }
                Err(e) => {
                    tracing::warn!(device_id = %header.device_id, error = %e, "failed to persist completed multimedia file");
                }
            }

            HandlerOutcome {
                positions: vec![position],
                completed_media: vec![(prefix, completed.bytes)],
                ack: Some(crate::dispatcher::AckDecision::Ack(AckResult::Success)),
                ..Default::default()
            }
        }
        Ok(None) => HandlerOutcome::ack(AckResult::Success),
        Err(e) => {
            tracing::warn!(device_id = %header.device_id, error = %e, "multimedia reassembly failed");
            HandlerOutcome::ack(AckResult::Failure)
        }
    }
}

pub fn handle_camera_response(
    session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    _ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    let response = media::decode_camera_response(body);
    tracing::info!(device_id = %header.device_id, result = response.result, ids = ?response.multimedia_ids, "camera command response");

    // The response carries no alarm context of its own; join the media
    // ids it enumerates to whichever alarm most recently asked this
    // device to shoot footage.
    if let Some(alarm_id) = session.correlations.last_alarm_id() {
        for &multimedia_id in &response.multimedia_ids {
            session.correlations.attach_media(alarm_id, multimedia_id);
        }
    }

    HandlerOutcome::ack(AckResult::Success)
}

pub fn handle_attachment_file_list(
    session: &mut DeviceSession,
    header: &MessageHeader,
    body: &[u8],
    _ctx: &DispatchContext,
) -> HandlerOutcome {
    session.touch();
    match media::decode_attachment_file_list(body) {
        Some(list) => {
            tracing::info!(
                device_id = %header.device_id,
                alarm_number = %list.alarm_number,
                file_count = list.files.len(),
                "attachment file list received"
            );
            let expected_files: Vec<(String, u32)> =
                list.files.iter().map(|f| (f.file_name.clone(), f.file_size)).collect();
            if !session.correlations.record_expected_files(&list.alarm_number, expected_files) {
                tracing::debug!(
                    device_id = %header.device_id,
                    alarm_number = %list.alarm_number,
                    "attachment file list references an unknown or expired alarm number"
                );
            }
            HandlerOutcome::ack(AckResult::Success)
        }
        None => {
            tracing::warn!(device_id = %header.device_id, "failed to decode attachment file list");
            HandlerOutcome::ack(AckResult::Failure)
        }
    }
}
