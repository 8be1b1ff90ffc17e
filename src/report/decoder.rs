//! # DS4 Input Report Decoder
//!
//! Turns raw transport buffers into [`Report`] values.
//!
//! After the framing prefix is trimmed every transport shares the same layout:
//!
//! | Offset | Content |
//! |--------|---------|
//! | 1-4    | left x, left y, right x, right y |
//! | 5      | d-pad nibble, square/cross/circle/triangle bits |
//! | 6      | L1 R1 L2 R2 share options L3 R3 bits |
//! | 7      | PS and trackpad bits, 6-bit timestamp |
//! | 8-9    | L2, R2 analog |
//! | 13-18  | motion y, x, z (i16 LE) |
//! | 19-24  | orientation roll, yaw, pitch (i16 LE) |
//! | 30     | battery nibble and plug bits |
//! | 35-42  | two touch points |

use super::protocol::{Framing, Report, TouchPoint, TransportKind};
use crate::error::ReportError;

/// Decode a raw buffer read from a transport of the given kind
///
/// # Arguments
///
/// * `buf` - Bytes returned by a single read, including the framing prefix
/// * `kind` - Transport the bytes came from
///
/// # Returns
///
/// * `Ok(Report)` - Decoded report
/// * `Err(ReportError::Disconnected)` - Zero-length read
/// * `Err(ReportError::Short | ReportError::BadId)` - Discard and keep reading
///
/// # Examples
///
/// ```
/// use ds4_bridge::report::decoder::decode;
/// use ds4_bridge::report::protocol::TransportKind;
///
/// let mut buf = [0u8; 64];
/// buf[0] = 0x01;
/// buf[5] = 0x28; // d-pad released, cross held
/// let report = decode(&buf, TransportKind::Usb).unwrap();
/// assert!(report.button_cross);
/// ```
pub fn decode(buf: &[u8], kind: TransportKind) -> Result<Report, ReportError> {
    decode_framed(buf, &Framing::for_kind(kind))
}

/// Decode a raw buffer with an explicit framing
///
/// Used directly by the hidraw Bluetooth transport, whose framing differs
/// from the L2CAP default for [`TransportKind::Bluetooth`].
pub fn decode_framed(buf: &[u8], framing: &Framing) -> Result<Report, ReportError> {
    if buf.is_empty() {
        return Err(ReportError::Disconnected);
    }

    if buf.len() < framing.size {
        return Err(ReportError::Short {
            len: buf.len(),
            expected: framing.size,
        });
    }

    let found = buf[framing.id_offset];
    if found != framing.report_id {
        return Err(ReportError::BadId {
            found,
            expected: framing.report_id,
        });
    }

    Ok(parse_report(&buf[framing.trim..]))
}

/// Parse the common report layout
///
/// `buf` must hold at least 43 bytes, which every validated framing guarantees.
fn parse_report(buf: &[u8]) -> Report {
    let dpad = buf[5] % 16;

    Report {
        left_analog_x: buf[1],
        left_analog_y: buf[2],
        right_analog_x: buf[3],
        right_analog_y: buf[4],
        l2_analog: buf[8],
        r2_analog: buf[9],

        // Clock positions: 0 is up, 2 right, 4 down, 6 left, 8 released
        dpad_up: matches!(dpad, 0 | 1 | 7),
        dpad_down: matches!(dpad, 3 | 4 | 5),
        dpad_left: matches!(dpad, 5 | 6 | 7),
        dpad_right: matches!(dpad, 1 | 2 | 3),

        button_square: buf[5] & 0x10 != 0,
        button_cross: buf[5] & 0x20 != 0,
        button_circle: buf[5] & 0x40 != 0,
        button_triangle: buf[5] & 0x80 != 0,

        button_l1: buf[6] & 0x01 != 0,
        button_r1: buf[6] & 0x02 != 0,
        button_l2: buf[6] & 0x04 != 0,
        button_r2: buf[6] & 0x08 != 0,
        button_share: buf[6] & 0x10 != 0,
        button_options: buf[6] & 0x20 != 0,
        button_l3: buf[6] & 0x40 != 0,
        button_r3: buf[6] & 0x80 != 0,

        button_ps: buf[7] & 0x01 != 0,
        button_trackpad: buf[7] & 0x02 != 0,
        timestamp: buf[7] >> 2,

        motion_y: read_i16(buf, 13),
        motion_x: read_i16(buf, 15),
        motion_z: read_i16(buf, 17),
        orientation_roll: -read_i16(buf, 19),
        orientation_yaw: read_i16(buf, 21),
        orientation_pitch: read_i16(buf, 23),

        trackpad_touch: [parse_touch(&buf[35..39]), parse_touch(&buf[39..43])],

        battery: buf[30] % 16,
        plug_usb: buf[30] & 0x10 != 0,
        plug_audio: buf[30] & 0x20 != 0,
        plug_mic: buf[30] & 0x40 != 0,
    }
}

/// Little-endian signed 16-bit read, widened so negation cannot overflow
fn read_i16(buf: &[u8], offset: usize) -> i32 {
    i32::from(i16::from_le_bytes([buf[offset], buf[offset + 1]]))
}

/// Parse one 4-byte touch point
///
/// Byte 0 holds the 7-bit id and an inverted active bit, bytes 1-3 pack
/// two 12-bit coordinates with the shared middle byte split by nibble.
fn parse_touch(bytes: &[u8]) -> TouchPoint {
    TouchPoint {
        id: bytes[0] & 0x7f,
        active: bytes[0] >> 7 == 0,
        x: (u16::from(bytes[2] & 0x0f) << 8) | u16::from(bytes[1]),
        y: (u16::from(bytes[3]) << 4) | (u16::from(bytes[2] & 0xf0) >> 4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::protocol::*;

    fn usb_buffer() -> [u8; USB_REPORT_SIZE] {
        let mut buf = [0u8; USB_REPORT_SIZE];
        buf[0] = USB_REPORT_ID;
        buf[5] = 0x08; // d-pad released
        buf[35] = 0x80; // touch 0 inactive
        buf[39] = 0x80; // touch 1 inactive
        buf
    }

    fn bt_buffer() -> [u8; BT_REPORT_SIZE] {
        let mut buf = [0u8; BT_REPORT_SIZE];
        buf[0] = 0xa1;
        buf[1] = BT_REPORT_ID;
        buf[2] = 0xc0;
        buf[8] = 0x08;
        buf
    }

    #[test]
    fn test_bluetooth_cross_scenario() {
        let mut buf = bt_buffer();
        buf[8] = 0x20;
        let report = decode(&buf, TransportKind::Bluetooth).unwrap();

        assert!(report.button_cross, "bit 0x20 of byte 8 is cross");
        assert!(!report.button_circle);
        assert!(!report.button_square);
        assert!(!report.button_triangle);
    }

    #[test]
    fn test_empty_read_is_disconnect() {
        assert_eq!(decode(&[], TransportKind::Usb), Err(ReportError::Disconnected));
        assert_eq!(decode(&[], TransportKind::Bluetooth), Err(ReportError::Disconnected));
    }

    #[test]
    fn test_short_read_is_invalid_not_disconnect() {
        let buf = usb_buffer();
        for len in 1..USB_REPORT_SIZE {
            let err = decode(&buf[..len], TransportKind::Usb).unwrap_err();
            assert!(err.is_invalid(), "len {} should be invalid, got {:?}", len, err);
        }

        let buf = bt_buffer();
        let err = decode(&buf[..40], TransportKind::Bluetooth).unwrap_err();
        assert_eq!(err, ReportError::Short { len: 40, expected: BT_REPORT_SIZE });
    }

    #[test]
    fn test_bad_report_id() {
        let mut buf = usb_buffer();
        buf[0] = 0x02;
        assert_eq!(
            decode(&buf, TransportKind::Usb),
            Err(ReportError::BadId { found: 0x02, expected: USB_REPORT_ID })
        );

        let mut buf = bt_buffer();
        buf[1] = 0x01;
        assert!(decode(&buf, TransportKind::Bluetooth).unwrap_err().is_invalid());
    }

    #[test]
    fn test_dpad_clock_positions() {
        // (nibble, up, down, left, right)
        let cases = [
            (0, true, false, false, false),
            (1, true, false, false, true),
            (2, false, false, false, true),
            (3, false, true, false, true),
            (4, false, true, false, false),
            (5, false, true, true, false),
            (6, false, false, true, false),
            (7, true, false, true, false),
            (8, false, false, false, false),
        ];

        for (nibble, up, down, left, right) in cases {
            let mut buf = usb_buffer();
            buf[5] = nibble;
            let r = decode(&buf, TransportKind::Usb).unwrap();
            assert_eq!(
                (r.dpad_up, r.dpad_down, r.dpad_left, r.dpad_right),
                (up, down, left, right),
                "nibble {}",
                nibble
            );
        }
    }

    #[test]
    fn test_dpad_never_contradicts() {
        for byte in 0..=255u8 {
            let mut buf = usb_buffer();
            buf[5] = byte;
            let r = decode(&buf, TransportKind::Usb).unwrap();
            assert!(!(r.dpad_up && r.dpad_down), "byte {:#04x}", byte);
            assert!(!(r.dpad_left && r.dpad_right), "byte {:#04x}", byte);
        }
    }

    #[test]
    fn test_buttons_and_analog() {
        let mut buf = usb_buffer();
        buf[1] = 10;
        buf[2] = 20;
        buf[3] = 30;
        buf[4] = 40;
        buf[5] = 0x08 | 0x10 | 0x80;
        buf[6] = 0x01 | 0x08 | 0x20 | 0x80;
        buf[7] = 0x02 | (42 << 2);
        buf[8] = 200;
        buf[9] = 255;

        let r = decode(&buf, TransportKind::Usb).unwrap();

        // ==== Analog ====
        assert_eq!((r.left_analog_x, r.left_analog_y), (10, 20));
        assert_eq!((r.right_analog_x, r.right_analog_y), (30, 40));
        assert_eq!((r.l2_analog, r.r2_analog), (200, 255));

        // ==== Face buttons ====
        assert!(r.button_square && r.button_triangle);
        assert!(!r.button_cross && !r.button_circle);

        // ==== Shoulder and meta ====
        assert!(r.button_l1 && r.button_r2 && r.button_options && r.button_r3);
        assert!(!r.button_r1 && !r.button_l2 && !r.button_share && !r.button_l3);
        assert!(r.button_trackpad);
        assert!(!r.button_ps);
        assert_eq!(r.timestamp, 42);
    }

    #[test]
    fn test_motion_and_orientation() {
        let mut buf = usb_buffer();
        buf[13..15].copy_from_slice(&(-2i16).to_le_bytes());
        buf[15..17].copy_from_slice(&1000i16.to_le_bytes());
        buf[17..19].copy_from_slice(&i16::MIN.to_le_bytes());
        buf[19..21].copy_from_slice(&i16::MIN.to_le_bytes());
        buf[21..23].copy_from_slice(&7i16.to_le_bytes());
        buf[23..25].copy_from_slice(&(-7i16).to_le_bytes());

        let r = decode(&buf, TransportKind::Usb).unwrap();
        assert_eq!(r.motion_y, -2);
        assert_eq!(r.motion_x, 1000);
        assert_eq!(r.motion_z, -32768);
        assert_eq!(r.orientation_roll, 32768, "roll is negated without overflow");
        assert_eq!(r.orientation_yaw, 7);
        assert_eq!(r.orientation_pitch, -7);
    }

    #[test]
    fn test_touch_points() {
        let mut buf = usb_buffer();
        // Touch 0 active, id 5, x = 0x123, y = 0x456
        buf[35] = 0x05;
        buf[36] = 0x23;
        buf[37] = 0x61;
        buf[38] = 0x45;
        // Touch 1 inactive, id 9
        buf[39] = 0x89;

        let r = decode(&buf, TransportKind::Usb).unwrap();
        let t0 = r.trackpad_touch[0];
        assert!(t0.active);
        assert_eq!(t0.id, 5);
        assert_eq!(t0.x, 0x123);
        assert_eq!(t0.y, 0x456);

        let t1 = r.trackpad_touch[1];
        assert!(!t1.active);
        assert_eq!(t1.id, 9);
    }

    #[test]
    fn test_battery_and_plugs() {
        let mut buf = usb_buffer();
        buf[30] = 0x10 | 0x40 | 0x0b;
        let r = decode(&buf, TransportKind::Usb).unwrap();
        assert_eq!(r.battery, 11);
        assert!(r.plug_usb);
        assert!(!r.plug_audio);
        assert!(r.plug_mic);
    }

    #[test]
    fn test_bluetooth_trim_offsets() {
        let mut buf = bt_buffer();
        buf[4] = 99; // left x after 3-byte trim
        buf[33] = 0x25; // battery byte after trim
        let r = decode(&buf, TransportKind::Bluetooth).unwrap();
        assert_eq!(r.left_analog_x, 99);
        assert_eq!(r.battery, 5);
        assert!(!r.plug_usb);
        assert!(r.plug_audio);
    }

    #[test]
    fn test_hidraw_bluetooth_framing() {
        let mut buf = [0u8; HIDRAW_BT_REPORT_SIZE];
        buf[0] = BT_REPORT_ID;
        buf[3] = 77; // left x after 2-byte trim
        buf[7] = 0x48; // circle held, d-pad released
        let r = decode_framed(&buf, &Framing::HIDRAW_BLUETOOTH).unwrap();
        assert_eq!(r.left_analog_x, 77);
        assert!(r.button_circle);
        assert!(!r.dpad_up);
    }
}
