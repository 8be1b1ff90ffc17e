//! # DS4 Output Report Encoder
//!
//! Serializes a [`ControlFrame`] into the output report for a transport.

use bytes::{Bytes, BytesMut};

use super::protocol::*;

/// Encode a control frame into a complete output report
///
/// The result starts with the report id. Bluetooth transports prepend the
/// HIDP transaction header themselves when sending.
///
/// # Arguments
///
/// * `frame` - Desired LED, flash and rumble state
/// * `kind` - Transport the report is written to
///
/// # Returns
///
/// * `Bytes` - 32 bytes for USB, 78 bytes for Bluetooth
///
/// # Examples
///
/// ```
/// use ds4_bridge::report::encoder::encode_control;
/// use ds4_bridge::report::protocol::{ControlFrame, TransportKind};
///
/// let report = encode_control(&ControlFrame::with_led(0, 0, 255), TransportKind::Usb);
/// assert_eq!(report[0], 0x05);
/// assert_eq!(report[8], 255);
/// ```
pub fn encode_control(frame: &ControlFrame, kind: TransportKind) -> Bytes {
    let (report_id, size, offset) = match kind {
        TransportKind::Usb => (USB_CONTROL_REPORT_ID, USB_CONTROL_SIZE, 0),
        TransportKind::Bluetooth => (BT_CONTROL_REPORT_ID, BT_CONTROL_SIZE, 2),
    };

    let mut report = BytesMut::zeroed(size + 1);
    report[0] = report_id;

    let pkt = &mut report[1..];
    match kind {
        TransportKind::Usb => {
            // Enable rumble and LED updates
            pkt[0] = 0xff;
        }
        TransportKind::Bluetooth => {
            // HID + CRC flags, then the same enable mask as USB
            pkt[0] = 0x80;
            pkt[2] = 0xff;
        }
    }

    pkt[offset + 3] = frame.rumble_strong;
    pkt[offset + 4] = frame.rumble_weak;
    pkt[offset + 5] = frame.led_red;
    pkt[offset + 6] = frame.led_green;
    pkt[offset + 7] = frame.led_blue;
    pkt[offset + 8] = frame.flash_on;
    pkt[offset + 9] = frame.flash_off;

    report.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::decoder::decode;

    fn sample_frame() -> ControlFrame {
        ControlFrame {
            led_red: 0x11,
            led_green: 0x22,
            led_blue: 0x33,
            flash_on: 0x44,
            flash_off: 0x55,
            rumble_strong: 0x66,
            rumble_weak: 0x77,
        }
    }

    #[test]
    fn test_usb_layout() {
        let report = encode_control(&sample_frame(), TransportKind::Usb);
        assert_eq!(report.len(), USB_CONTROL_SIZE + 1);
        assert_eq!(report[0], USB_CONTROL_REPORT_ID);
        assert_eq!(report[1], 0xff);
        assert_eq!(&report[4..11], &[0x66, 0x77, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert!(report[11..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bluetooth_layout() {
        let report = encode_control(&sample_frame(), TransportKind::Bluetooth);
        assert_eq!(report.len(), BT_CONTROL_SIZE + 1);
        assert_eq!(report[0], BT_CONTROL_REPORT_ID);
        assert_eq!(report[1], 0x80);
        assert_eq!(report[2], 0x00);
        assert_eq!(report[3], 0xff);
        assert_eq!(&report[6..13], &[0x66, 0x77, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert!(report[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let frame = sample_frame();
        for kind in [TransportKind::Usb, TransportKind::Bluetooth] {
            assert_eq!(encode_control(&frame, kind), encode_control(&frame, kind));
        }
    }

    #[test]
    fn test_decode_then_encode_default_frame() {
        // Any valid Bluetooth input leaves the default output frame untouched
        for fill in [0x00u8, 0x5a, 0xff] {
            let mut buf = [fill; BT_REPORT_SIZE];
            buf[1] = BT_REPORT_ID;
            assert!(decode(&buf, TransportKind::Bluetooth).is_ok());

            let frame = ControlFrame::with_led(0, 0, 255);
            let report = encode_control(&frame, TransportKind::Bluetooth);
            assert_eq!(report[6], 0, "strong rumble");
            assert_eq!(report[7], 0, "weak rumble");
            assert_eq!(&report[8..11], &[0, 0, 255], "led");
        }
    }
}
