//! Encoders for the outbound command bodies this core emits: the generic
//! ack (0x8001), registration response (0x8100), ADAS/DSM parameter
//! provisioning (0x8103), camera shot command (0x8801), and the
//! alarm-attachment request (0x9208) that points a device at the JT/T
//! 1078 media channel.

use bytes::{BufMut, BytesMut};

use crate::location::AlarmClass;
use crate::message_id::AckResult;

/// Whether an ADAS/DSM event's classification should trigger an
/// attachment request. Monitoring (0x00) and informational (0x10-0x1F)
/// events never do; real alarms (0x01-0x0F) always do; vendor-extension
/// ids are nonzero by construction (0x00 is reserved for monitoring), so
/// they always do too.
pub fn wants_attachment_request(class: AlarmClass) -> bool {
    matches!(class, AlarmClass::RealAlarm | AlarmClass::Vendor)
}

/// Whether a bare 0x70 multimedia-marker fallback (no ADAS/DSM alarm id
/// available) should trigger an attachment request. A `multimedia_id` of
/// zero is a known device-firmware quirk rather than a real event — see
/// the open-question resolution in `DESIGN.md` — so it is excluded here
/// rather than producing a spurious 0x9208.
pub fn wants_attachment_request_for_marker(multimedia_id: u32) -> bool {
    multimedia_id != 0
}

/// A decoded 0x0001 general response: which platform message the device
/// is acknowledging, and whether it accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralResponse {
    pub response_sequence: u16,
    pub response_message_id: u16,
    pub result: AckResult,
}

/// 0x0001: a device's ack of a platform-originated command. `None` if the
/// body is shorter than the fixed 5-byte layout, or the result byte isn't
/// one of the four known codes.
pub fn decode_general_response(body: &[u8]) -> Option<GeneralResponse> {
    if body.len() < 5 {
        return None;
    }
    let response_sequence = u16::from_be_bytes([body[0], body[1]]);
    let response_message_id = u16::from_be_bytes([body[2], body[3]]);
    let result = match body[4] {
        0 => AckResult::Success,
        1 => AckResult::Failure,
        2 => AckResult::WrongMessage,
        3 => AckResult::NotSupported,
        _ => return None,
    };
    Some(GeneralResponse { response_sequence, response_message_id, result })
}

/// 0x8001: acknowledges any inbound message by sequence + message id.
pub fn encode_general_response(
    response_sequence: u16,
    response_message_id: u16,
    result: AckResult,
) -> BytesMut {
    let mut body = BytesMut::with_capacity(5);
    body.put_u16(response_sequence);
    body.put_u16(response_message_id);
    body.put_u8(result as u8);
    body
}

/// 0x8100: registration response. `auth_code` is only meaningful when
/// `result` is `Success`; a failed registration carries no code.
pub fn encode_register_response(response_sequence: u16, result: AckResult, auth_code: &str) -> BytesMut {
    let mut body = BytesMut::with_capacity(3 + auth_code.len());
    body.put_u16(response_sequence);
    body.put_u8(result as u8);
    if matches!(result, AckResult::Success) {
        body.put_slice(auth_code.as_bytes());
    }
    body
}

/// One ADAS/DSM provisioning parameter: a 4-byte param id (0x0076,
/// 0x0077, 0x007E, 0x007F) and its raw wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub id: u32,
    pub value: Vec<u8>,
}

pub const PARAM_ADAS_CONFIG: u32 = 0x0076;
pub const PARAM_DSM_CONFIG: u32 = 0x0077;
pub const PARAM_ADAS_EXTENDED: u32 = 0x007E;
pub const PARAM_DSM_EXTENDED: u32 = 0x007F;

/// 0x8103: sets terminal parameters. Sent unconditionally on every
/// successful authentication — there is no "already provisioned"
/// short-circuit, so a device that loses its settings across a firmware
/// reset is always re-provisioned.
pub fn encode_parameter_setting(params: &[Parameter]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(params.len() as u8);
    for param in params {
        body.put_u32(param.id);
        body.put_u8(param.value.len() as u8);
        body.put_slice(&param.value);
    }
    body
}

/// The four ADAS/DSM parameters this core always provisions against the
/// ITS server profile: enable every ADAS and DSM alarm type, and turn on
/// TLV 0x64/0x65 upload in the location report.
pub fn default_adas_dsm_parameters() -> Vec<Parameter> {
    vec![
        Parameter { id: PARAM_ADAS_CONFIG, value: vec![0xFF] },
        Parameter { id: PARAM_DSM_CONFIG, value: vec![0xFF] },
        Parameter { id: PARAM_ADAS_EXTENDED, value: vec![0x01] },
        Parameter { id: PARAM_DSM_EXTENDED, value: vec![0x01] },
    ]
}

/// 0x8801: requests an immediate still capture on `channel_id`. Every
/// other field is a fixed platform default — there is no "stop" or
/// scheduled-capture variant this core needs to express.
pub fn encode_camera_command(channel_id: u8) -> BytesMut {
    let mut body = BytesMut::with_capacity(12);
    body.put_u8(channel_id);
    body.put_u8(0); // capture command: 0 = immediate
    body.put_u8(0); // timing: 0 = once
    body.put_u16(0); // interval
    body.put_u8(1); // save to device
    body.put_u8(1); // resolution
    body.put_u8(1); // quality
    body.put_u8(0x55); // brightness
    body.put_u8(0x55); // contrast
    body.put_u8(0x55); // saturation
    body.put_u8(0x55); // chroma
    body
}

/// 0x9208: requests the device push a specific alarm's attachments over
/// the JT/T 1078 media channel. `server_ip`/`tcp_port`/`udp_port` are the
/// media-channel listener's address, never the main protocol port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmAttachmentRequest {
    pub server_ip: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub alarm_flag: [u8; 16],
    pub alarm_number: String,
}

pub fn encode_alarm_attachment_request(req: &AlarmAttachmentRequest) -> BytesMut {
    const ALARM_NUMBER_LEN: usize = 32;
    const RESERVED_LEN: usize = 16;
    let mut number = req.alarm_number.clone().into_bytes();
    number.resize(ALARM_NUMBER_LEN, 0);

    let mut body = BytesMut::with_capacity(
        1 + req.server_ip.len() + 1 + 4 + 16 + ALARM_NUMBER_LEN + RESERVED_LEN,
    );
    body.put_u8(req.server_ip.len() as u8);
    body.put_slice(req.server_ip.as_bytes());
    body.put_u8(0); // NUL terminator on the IP string
    body.put_u16(req.tcp_port);
    body.put_u16(req.udp_port);
    body.put_slice(&req.alarm_flag);
    body.put_slice(&number);
    body.put_bytes(0, RESERVED_LEN);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::classify_alarm_type;

    #[test]
    fn real_alarm_and_vendor_want_attachment_request() {
        assert!(wants_attachment_request(classify_alarm_type(0x01)));
        assert!(wants_attachment_request(classify_alarm_type(0xE1)));
    }

    #[test]
    fn monitoring_and_informational_do_not() {
        assert!(!wants_attachment_request(classify_alarm_type(0x00)));
        assert!(!wants_attachment_request(classify_alarm_type(0x15)));
    }

    #[test]
    fn zero_multimedia_marker_is_excluded() {
        assert!(!wants_attachment_request_for_marker(0));
        assert!(wants_attachment_request_for_marker(9));
    }

    #[test]
    fn general_response_layout() {
        let body = encode_general_response(10, 0x0200, AckResult::Success);
        assert_eq!(&body[..], &[0x00, 0x0A, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn decodes_a_negative_ack_of_parameter_setting() {
        let body = encode_general_response(3, 0x8103, AckResult::Failure);
        let decoded = decode_general_response(&body).unwrap();
        assert_eq!(decoded.response_sequence, 3);
        assert_eq!(decoded.response_message_id, 0x8103);
        assert_eq!(decoded.result, AckResult::Failure);
    }

    #[test]
    fn general_response_too_short_fails_to_decode() {
        assert!(decode_general_response(&[0x00, 0x01]).is_none());
    }

    #[test]
    fn register_response_omits_code_on_failure() {
        let body = encode_register_response(1, AckResult::Failure, "should-not-appear");
        assert_eq!(&body[..], &[0x00, 0x01, 0x01]);
    }

    #[test]
    fn parameter_setting_encodes_count_prefix() {
        let body = encode_parameter_setting(&default_adas_dsm_parameters());
        assert_eq!(body[0], 4);
    }

    #[test]
    fn default_adas_dsm_parameters_match_provisioning_profile() {
        let params = default_adas_dsm_parameters();
        assert_eq!(params[0].value, vec![0xFF]); // PARAM_ADAS_CONFIG
        assert_eq!(params[1].value, vec![0xFF]); // PARAM_DSM_CONFIG
        assert_eq!(params[2].value, vec![0x01]); // PARAM_ADAS_EXTENDED
        assert_eq!(params[3].value, vec![0x01]); // PARAM_DSM_EXTENDED
    }

    #[test]
    fn camera_command_is_fixed_twelve_byte_capture() {
        let body = encode_camera_command(1);
        assert_eq!(body.len(), 12);
        assert_eq!(
            &body[..],
            &[1, 0, 0, 0x00, 0x00, 1, 1, 1, 0x55, 0x55, 0x55, 0x55]
        );
    }

    #[test]
    fn alarm_attachment_request_pads_number_to_32_bytes() {
        let req = AlarmAttachmentRequest {
            server_ip: "10.0.0.1".to_string(),
            tcp_port: 60001,
            udp_port: 60001,
            alarm_flag: [1u8; 16],
            alarm_number: "abc".to_string(),
        };
        let body = encode_alarm_attachment_request(&req);
        let ip_len = body[0] as usize;
        assert_eq!(ip_len, 8);
        let number_start = 1 + ip_len + 1 + 4 + 16;
        assert_eq!(&body[number_start..number_start + 3], b"abc");
        assert_eq!(body.len(), number_start + 32 + 16);
        assert!(body[number_start + 32..].iter().all(|&b| b == 0));
    }
}
