use chrono::Local;
use renogy_modbus::registers::{self, BLOCKS, CONTROLLER_READ_00_22, DEVICE_MODEL, DEVICE_SERIAL, DEVICE_VERSION};
use renogy_modbus::{
    BatteryStatus, DcDcStatus, DecodeError, DeviceInfo, FieldValue, InverterStatus, Reading, RegisterBlock,
    RegisterField, Scale, decode,
};

const SOC_AND_VOLTAGE: RegisterBlock = RegisterBlock {
    tag: "soc_and_voltage",
    function_code: 0x03,
    start: 0x0100,
    count: 2,
    fields: &[
        RegisterField::unsigned("battery_soc", 0),
        RegisterField::unsigned("battery_voltage", 2).scaled(Scale::TENTH),
    ],
};

fn put_u16(payload: &mut [u8], offset: usize, value: u16) {
    payload[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u32(payload: &mut [u8], offset: usize, value: u32) {
    payload[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn ascii_payload(text: &str, len: usize, pad: u8) -> Vec<u8> {
    let mut payload = text.as_bytes().to_vec();
    payload.resize(len, pad);
    payload
}

fn realtime_payload() -> Vec<u8> {
    let mut p = vec![0u8; CONTROLLER_READ_00_22.payload_len()];
    put_u16(&mut p, 0, 85); // SOC %
    put_u16(&mut p, 2, 132); // 13.2 V
    put_u16(&mut p, 4, 250); // 2.50 A
    p[6] = 0x19; // controller 25 °C
    p[7] = 0xF6; // battery -10 °C
    put_u16(&mut p, 8, 131);
    put_u16(&mut p, 10, 100);
    put_u16(&mut p, 12, 13);
    put_u16(&mut p, 14, 185);
    put_u16(&mut p, 16, 178);
    put_u16(&mut p, 18, 33);
    put_u16(&mut p, 20, 1); // load on
    put_u16(&mut p, 22, 121);
    put_u16(&mut p, 24, 144);
    put_u16(&mut p, 42, 120);
    put_u32(&mut p, 48, 0x0001_0000);
    p[64] = 0x80;
    p[65] = 0x02; // MPPT
    put_u32(&mut p, 66, 0x0003_0000);
    p
}

#[cfg(test)]
mod decode_tests {
    use super::*;

    #[test]
    fn test_decode_soc_and_voltage() {
        let block = decode(&SOC_AND_VOLTAGE, &[0x00, 0x64, 0x00, 0xC8]).unwrap();

        assert_eq!(block.get("battery_soc"), Some(&FieldValue::Int(100)));
        assert_eq!(block.get("battery_voltage"), Some(&FieldValue::Float(20.0)));
        assert_eq!(block.len(), 2);
        assert_eq!(block.tag(), "soc_and_voltage");
    }

    #[test]
    fn test_decode_wrong_payload_length() {
        let result = decode(&SOC_AND_VOLTAGE, &[0x00, 0x64, 0x00]);
        assert!(matches!(
            result,
            Err(DecodeError::PayloadLength { block: "soc_and_voltage", expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_decode_values_follow_table_order() {
        let block = decode(&SOC_AND_VOLTAGE, &[0x00, 0x01, 0x00, 0x02]).unwrap();
        let names: Vec<_> = block.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["battery_soc", "battery_voltage"]);
    }

    #[test]
    fn test_signed_word() {
        const SIGNED: RegisterBlock = RegisterBlock {
            tag: "signed",
            function_code: 0x03,
            start: 0,
            count: 2,
            fields: &[
                RegisterField::signed("raw", 0),
                RegisterField::signed("current", 2).scaled(Scale::HUNDREDTH),
            ],
        };

        let block = decode(&SIGNED, &[0xFF, 0x9C, 0xFF, 0x9C]).unwrap();
        assert_eq!(block.int("raw").unwrap(), -100);
        assert_eq!(block.float("current").unwrap(), -1.0);
    }

    #[test]
    fn test_split_register_lanes() {
        let mut payload = vec![0u8; CONTROLLER_READ_00_22.payload_len()];
        payload[6] = 0x19;
        payload[7] = 0xF6;

        let block = CONTROLLER_READ_00_22.decode(&payload).unwrap();
        assert_eq!(block.int("controller_temperature").unwrap(), 25);
        assert_eq!(block.int("battery_temperature").unwrap(), -10);
    }

    #[test]
    fn test_unsigned_lane_is_not_sign_extended() {
        let payload = [0x02, 0xFE, 0, 0, 0x01, 0x07, 0, 0];

        let block = DEVICE_VERSION.decode(&payload).unwrap();
        assert_eq!(block.int("hardware_major").unwrap(), 2);
        assert_eq!(block.int("hardware_minor").unwrap(), 254);
        assert_eq!(block.int("software_major").unwrap(), 1);
        assert_eq!(block.int("software_minor").unwrap(), 7);
    }

    #[test]
    fn test_wide_field_is_big_endian() {
        let mut payload = vec![0u8; CONTROLLER_READ_00_22.payload_len()];
        put_u32(&mut payload, 48, 0x0001_0002);

        let block = CONTROLLER_READ_00_22.decode(&payload).unwrap();
        assert_eq!(block.int("total_charging_amp_hours").unwrap(), 65538);
    }

    #[test]
    fn test_ascii_trims_trailing_nulls_and_spaces() {
        let model = DEVICE_MODEL.decode(&ascii_payload("RNG-CTRL-RVR40", 16, 0)).unwrap();
        assert_eq!(model.text("model").unwrap(), "RNG-CTRL-RVR40");

        let mut serial = ascii_payload("1234567890", 14, b' ');
        serial.extend_from_slice(&[0, 0]);
        let serial = DEVICE_SERIAL.decode(&serial).unwrap();
        assert_eq!(serial.text("serial_number").unwrap(), "1234567890");
    }

    #[test]
    fn test_ascii_drops_non_ascii_bytes() {
        let mut payload = ascii_payload("RVR", 16, 0);
        payload[3] = 0xFF;

        let block = DEVICE_MODEL.decode(&payload).unwrap();
        assert_eq!(block.text("model").unwrap(), "RVR");
    }

    #[test]
    fn test_bitmap_keeps_raw_value() {
        let block = CONTROLLER_READ_00_22.decode(&realtime_payload()).unwrap();
        assert_eq!(block.get("fault_flags"), Some(&FieldValue::Int(0x0003_0000)));
        assert_eq!(block.int("load_status").unwrap(), 0x80);
    }

    #[test]
    fn test_malformed_block_is_an_error() {
        const OVERRUN: RegisterBlock = RegisterBlock {
            tag: "overrun",
            function_code: 0x03,
            start: 0,
            count: 1,
            fields: &[RegisterField::unsigned("x", 0).wide()],
        };

        let result = decode(&OVERRUN, &[0x00, 0x01]);
        assert!(matches!(result, Err(DecodeError::InvalidLayout { block: "overrun", .. })));
    }

    #[test]
    fn test_int_as_checks_range() {
        let block = decode(&SOC_AND_VOLTAGE, &[0x01, 0x2C, 0x00, 0xC8]).unwrap();

        assert_eq!(block.int_as::<u16>("battery_soc").unwrap(), 300);
        assert!(matches!(
            block.int_as::<u8>("battery_soc"),
            Err(DecodeError::FieldType { ref field, .. }) if field == "battery_soc"
        ));
    }

    #[test]
    fn test_typed_accessors_report_mismatches() {
        let block = decode(&SOC_AND_VOLTAGE, &[0x00, 0x64, 0x00, 0xC8]).unwrap();

        assert!(matches!(block.int("battery_voltage"), Err(DecodeError::FieldType { .. })));
        assert!(matches!(block.text("battery_soc"), Err(DecodeError::FieldType { .. })));
        assert!(matches!(block.int("missing"), Err(DecodeError::MissingField { .. })));
        // Integers widen.
        assert_eq!(block.float("battery_soc").unwrap(), 100.0);
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn test_all_blocks_are_valid() {
        for block in BLOCKS {
            assert!(block.validate().is_ok(), "block {} failed: {:?}", block.tag, block.validate());
        }
    }

    #[test]
    fn test_block_tags_are_unique() {
        for block in BLOCKS {
            assert_eq!(BLOCKS.iter().filter(|b| b.tag == block.tag).count(), 1, "{}", block.tag);
        }
    }

    #[test]
    fn test_block_lookup() {
        let block = registers::block("controller_read_00_22").unwrap();
        assert_eq!(block.start, 0x0100);
        assert_eq!(block.count, 0x23);
        assert!(registers::block("nope").is_none());
    }

    #[test]
    fn test_documented_addresses() {
        assert_eq!((DEVICE_MODEL.start, DEVICE_MODEL.count), (0x000C, 8));
        assert_eq!((DEVICE_VERSION.start, DEVICE_VERSION.count), (0x0014, 4));
        assert_eq!((DEVICE_SERIAL.start, DEVICE_SERIAL.count), (0x0018, 8));
        assert_eq!(registers::LOAD_SWITCH_REGISTER, 0x010A);
        assert!(BLOCKS.iter().all(|b| b.function_code == 0x03));
    }

    #[test]
    fn test_overlapping_fields_rejected() {
        const OVERLAP: RegisterBlock = RegisterBlock {
            tag: "overlap",
            function_code: 0x03,
            start: 0,
            count: 2,
            fields: &[RegisterField::unsigned("a", 0), RegisterField::unsigned("b", 0).low()],
        };
        assert!(matches!(OVERLAP.validate(), Err(DecodeError::InvalidLayout { block: "overlap", .. })));
    }

    #[test]
    fn test_field_past_end_rejected() {
        const PAST_END: RegisterBlock = RegisterBlock {
            tag: "past_end",
            function_code: 0x03,
            start: 0,
            count: 2,
            fields: &[RegisterField::unsigned("a", 2).wide()],
        };
        assert!(matches!(PAST_END.validate(), Err(DecodeError::InvalidLayout { .. })));
    }

    #[test]
    fn test_field_metadata() {
        let field = CONTROLLER_READ_00_22.field("battery_voltage").unwrap();
        assert_eq!(field.unit, "V");
        assert_eq!(field.scale, Scale::TENTH);
        assert_eq!(field.byte_range(), 2..4);
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn test_charging_state_labels() {
        assert_eq!(registers::charging_state_label(0), Some("Deactivated"));
        assert_eq!(registers::charging_state_label(2), Some("MPPT Charging"));
        assert_eq!(registers::charging_state_label(6), Some("Current Limiting"));
        assert_eq!(registers::charging_state_label(7), None);
    }

    #[test]
    fn test_battery_type_labels() {
        assert_eq!(registers::battery_type_label(4), Some("Lithium"));
        assert_eq!(registers::battery_type_label(9), None);
    }

    #[test]
    fn test_exception_messages() {
        assert_eq!(registers::exception_message(0x02), "Illegal Data Address");
        assert_eq!(registers::exception_message(0x7F), "Unknown Exception");
    }

    #[test]
    fn test_active_faults() {
        assert!(registers::active_faults(0).is_empty());
        assert_eq!(
            registers::active_faults(0x0003_0000),
            vec!["Battery over-discharge", "Battery over-voltage"]
        );
        // Low bits carry no faults.
        assert!(registers::active_faults(0x0000_FFFF).is_empty());
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;

    #[test]
    fn test_reading_from_realtime_block() {
        let block = CONTROLLER_READ_00_22.decode(&realtime_payload()).unwrap();
        let reading = Reading::from_realtime(&block, Local::now()).unwrap();

        assert_eq!(reading.battery.state_of_charge, 85);
        assert_eq!(reading.battery.voltage, 13.2);
        assert_eq!(reading.battery.current, 2.5);
        assert_eq!(reading.battery.temperature, -10);
        assert!((reading.battery.power() - 33.0).abs() < 1e-9);

        assert_eq!(reading.solar.voltage, 18.5);
        assert_eq!(reading.solar.current, 1.78);
        assert_eq!(reading.solar.power, 33);

        assert_eq!(reading.load.voltage, 13.1);
        assert_eq!(reading.load.current, 1.0);
        assert_eq!(reading.load.power, 13);
        assert!(reading.load.is_on);

        assert_eq!(reading.controller.temperature, 25);
        assert_eq!(reading.controller.charging_state, 2);
        assert_eq!(reading.controller.charging_state_text(), "MPPT Charging");
        assert_eq!(
            reading.controller.active_faults(),
            vec!["Battery over-discharge", "Battery over-voltage"]
        );

        let daily = reading.daily_stats.as_ref().unwrap();
        assert_eq!(daily.min_battery_voltage, 12.1);
        assert_eq!(daily.max_battery_voltage, 14.4);

        let history = reading.historical_stats.as_ref().unwrap();
        assert_eq!(history.total_operating_days, 120);
        assert_eq!(history.total_amp_hours_charged, 65536);

        assert_eq!(reading.device_info, DeviceInfo::default());
    }

    #[test]
    fn test_unknown_charging_state_text() {
        let mut payload = realtime_payload();
        payload[65] = 0x09;

        let block = CONTROLLER_READ_00_22.decode(&payload).unwrap();
        let reading = Reading::from_realtime(&block, Local::now()).unwrap();
        assert_eq!(reading.controller.charging_state_text(), "Unknown (9)");
    }

    #[test]
    fn test_out_of_range_soc_is_rejected() {
        let mut payload = realtime_payload();
        put_u16(&mut payload, 0, 300);

        let block = CONTROLLER_READ_00_22.decode(&payload).unwrap();
        let result = Reading::from_realtime(&block, Local::now());
        assert!(matches!(result, Err(DecodeError::FieldType { ref field, .. }) if field == "battery_soc"));
    }

    #[test]
    fn test_reading_from_wrong_block() {
        let block = decode(&SOC_AND_VOLTAGE, &[0x00, 0x64, 0x00, 0xC8]).unwrap();
        let result = Reading::from_realtime(&block, Local::now());
        assert!(matches!(result, Err(DecodeError::MissingField { .. })));
    }

    #[test]
    fn test_reading_to_json() {
        let block = CONTROLLER_READ_00_22.decode(&realtime_payload()).unwrap();
        let mut reading = Reading::from_realtime(&block, Local::now()).unwrap();
        reading.device_info.model = "RNG-CTRL-RVR40".to_string();

        let json = reading.to_json();
        assert_eq!(json["device"]["model"], "RNG-CTRL-RVR40");
        assert_eq!(json["battery"]["soc"], 85);
        assert_eq!(json["battery"]["temperature"], -10);
        assert_eq!(json["solar"]["power"], 33);
        assert_eq!(json["load"]["is_on"], true);
        assert_eq!(json["controller"]["charging_status"], 2);
        assert_eq!(json["controller"]["charging_status_text"], "MPPT Charging");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_device_info_from_blocks() {
        let model = DEVICE_MODEL.decode(&ascii_payload("RNG-CTRL-RVR40", 16, 0)).unwrap();
        let version = DEVICE_VERSION.decode(&[0x01, 0x02, 0, 0, 0x03, 0x04, 0, 0]).unwrap();
        let serial = DEVICE_SERIAL.decode(&ascii_payload("1234567890", 16, b' ')).unwrap();

        let info = DeviceInfo::from_blocks(&model, &version, &serial).unwrap();
        assert_eq!(info.model, "RNG-CTRL-RVR40");
        assert_eq!(info.serial_number, "1234567890");
        assert_eq!(info.hardware_version, "V1.2");
        assert_eq!(info.software_version, "V3.4");
        assert_eq!(info.to_string(), "RNG-CTRL-RVR40 (S/N: 1234567890)");
    }

    #[test]
    fn test_battery_status() {
        let mut payload = vec![0u8; 12];
        put_u16(&mut payload, 0, (-250i16) as u16);
        put_u16(&mut payload, 2, 132);
        put_u32(&mut payload, 4, 50_000);
        put_u32(&mut payload, 8, 100_000);

        let block = registers::BATTERY_READ_STATUS.decode(&payload).unwrap();
        let status = BatteryStatus::from_block(&block).unwrap();
        assert_eq!(status.current, -2.5);
        assert_eq!(status.voltage, 13.2);
        assert_eq!(status.remaining_capacity, 50.0);
        assert_eq!(status.total_capacity, 100.0);
        assert_eq!(status.state_of_charge(), Some(50.0));
    }

    #[test]
    fn test_battery_status_without_capacity() {
        assert_eq!(BatteryStatus::default().state_of_charge(), None);
    }

    #[test]
    fn test_inverter_status() {
        let mut payload = vec![0u8; 20];
        put_u16(&mut payload, 4, 1200);
        put_u16(&mut payload, 6, 150);
        put_u16(&mut payload, 8, 6000);
        put_u16(&mut payload, 12, (-55i16) as u16);

        let block = registers::INVERTER_READ_STATUS.decode(&payload).unwrap();
        let status = InverterStatus::from_block(&block).unwrap();
        assert_eq!(status.output_voltage, 120.0);
        assert_eq!(status.output_current, 1.5);
        assert_eq!(status.output_frequency, 60.0);
        assert_eq!(status.temperature, -5.5);
        assert_eq!(status.output_power(), 180.0);
    }

    #[test]
    fn test_dcdc_status() {
        let mut payload = vec![0u8; 20];
        put_u16(&mut payload, 0, 70);
        put_u16(&mut payload, 8, 141);
        put_u16(&mut payload, 10, 2000);
        put_u16(&mut payload, 12, 282);

        let block = registers::DCDC_READ_STATUS.decode(&payload).unwrap();
        let status = DcDcStatus::from_block(&block).unwrap();
        assert_eq!(status.battery.state_of_charge, 70);
        assert_eq!(status.alternator_voltage, 14.1);
        assert_eq!(status.alternator_current, 20.0);
        assert_eq!(status.alternator_power, 282);
    }
}
