//! Built-in block schemas every registry is seeded with.
//!
//! Layouts are big-endian register images. Fields marked provisional have
//! byte offsets proven from captures but an unconfirmed meaning order.

use crate::{
    bits::{BitRange, IntWidth},
    errors::ConstructionError,
    field::{ArrayElement, ArrayField, DerivedField, Field, PackedField, SubField},
    primitive::{EnumTable, PrimitiveType},
    schema::{BlockDef, BlockSchema},
    transform::{Pipeline, TransformStep},
};

pub const DEVICE_INFO: u16 = 100;
pub const GRID_TELEMETRY: u16 = 1100;
pub const BATTERY_STATUS: u16 = 1200;
pub const CHARGE_SCHEDULE: u16 = 1400;
pub const THERMAL: u16 = 1500;

/// Compiles every built-in schema.
pub fn schemas() -> Result<Vec<BlockSchema>, ConstructionError> {
    [
        device_info()?,
        grid_telemetry()?,
        battery_status()?,
        charge_schedule()?,
        thermal()?,
    ]
    .iter()
    .map(BlockSchema::compile)
    .collect()
}

fn device_info() -> Result<BlockDef, ConstructionError> {
    let chemistry = EnumTable::new([(1, "lfp"), (2, "nmc"), (3, "lto")])?.tolerant();

    Ok(BlockDef::new(DEVICE_INFO, "device_info", 26)
        .field(Field::new("model", 0, PrimitiveType::Ascii(12)))
        .field(Field::new("serial", 12, PrimitiveType::Ascii(8)))
        .field(Field::new("protocol_version", 20, PrimitiveType::U16))
        .field(Field::new("firmware", 22, PrimitiveType::U16).pipeline(Pipeline::scale(0.01)?))
        .field(Field::new(
            "battery_type",
            24,
            PrimitiveType::Enum(IntWidth::W16, chemistry),
        )))
}

fn grid_telemetry() -> Result<BlockDef, ConstructionError> {
    let grid_state = EnumTable::new([(0, "offline"), (1, "on_grid"), (2, "off_grid"), (3, "fault")])?;
    let tenth = Pipeline::scale(0.1)?;

    Ok(BlockDef::new(GRID_TELEMETRY, "grid_telemetry", 16)
        .field(
            Field::new("frequency", 0, PrimitiveType::U16)
                .pipeline(tenth.clone())
                .unit("Hz"),
        )
        .field(
            Field::new("voltage_a", 2, PrimitiveType::U16)
                .pipeline(tenth.clone())
                .unit("V"),
        )
        .field(
            Field::new("current_a", 4, PrimitiveType::I16)
                .pipeline(tenth)
                .unit("A"),
        )
        .field(Field::new("active_power", 6, PrimitiveType::I32).unit("W"))
        .field(Field::new("power_factor", 10, PrimitiveType::I16).pipeline(Pipeline::scale(0.001)?))
        .field(Field::new(
            "grid_state",
            12,
            PrimitiveType::Enum(IntWidth::W16, grid_state),
        ))
        .field(Field::new("grid_alarms", 14, PrimitiveType::Bitmap(IntWidth::W16)))
        .field(
            Field::new("reactive_power", 16, PrimitiveType::I16)
                .unit("var")
                .optional()
                .since(2),
        ))
}

fn battery_status() -> Result<BlockDef, ConstructionError> {
    let fault_action = EnumTable::new([(0, "continue"), (1, "shutdown")])?;

    let status = PackedField::new("status", 10, IntWidth::W16, 1)
        .sub(
            SubField::new("alarm_bits", BitRange::new(0, 16))
                .pipeline(Pipeline::new([TransformStep::ExpandBits(16)])?),
        )
        .sub(SubField::new("fan_on", BitRange::bit(3)))
        .sub(SubField::new("fault_action", BitRange::bit(15)).pipeline(Pipeline::enum_map(fault_action)));

    let cell = Field::new("cell_voltage", 0, PrimitiveType::U16)
        .pipeline(Pipeline::scale(0.001)?)
        .unit("V");

    Ok(BlockDef::new(BATTERY_STATUS, "battery_status", 12)
        .lenient()
        .field(Field::new("soc", 0, PrimitiveType::U16).unit("%"))
        .field(Field::new("soh", 2, PrimitiveType::U16).unit("%"))
        .field(
            Field::new("pack_voltage", 4, PrimitiveType::U16)
                .pipeline(Pipeline::scale(0.01)?)
                .unit("V"),
        )
        .field(
            Field::new("pack_current", 6, PrimitiveType::I16)
                .pipeline(Pipeline::scale(0.1)?)
                .unit("A"),
        )
        .field(
            Field::new("temperature", 8, PrimitiveType::U16)
                .pipeline(Pipeline::new([TransformStep::Scale(0.1), TransformStep::Minus(40.0)])?)
                .unit("°C"),
        )
        .field(status)
        .field(ArrayField::new("cell_voltages", 12, 16, 2, ArrayElement::Value(cell)).optional()))
}

fn charge_schedule() -> Result<BlockDef, ConstructionError> {
    let kind = EnumTable::new([(0, "charge"), (1, "discharge"), (2, "idle")])?;
    let mode = EnumTable::new([(0, "power"), (1, "current"), (2, "soc_target")])?.tolerant();

    // 80-bit entry: five words, most significant first.
    let entry = PackedField::new("entry", 0, IntWidth::W16, 5)
        .sub(SubField::new("time_of_day", BitRange::new(0, 17)).unit("s"))
        .sub(SubField::new("weekdays", BitRange::new(17, 7)))
        .sub(SubField::new("days", BitRange::new(24, 31)))
        .sub(SubField::new("months", BitRange::new(55, 12)))
        .sub(SubField::new("kind", BitRange::new(67, 2)).pipeline(Pipeline::enum_map(kind)))
        .sub(SubField::new("id", BitRange::new(69, 8)))
        .sub(SubField::new("mode", BitRange::new(77, 3)).pipeline(Pipeline::enum_map(mode)));

    Ok(BlockDef::new(CHARGE_SCHEDULE, "charge_schedule", 2)
        .lenient()
        .field(Field::new("entry_count", 0, PrimitiveType::U16))
        .field(ArrayField::new("entries", 2, 8, 10, ArrayElement::Packed(entry)).optional()))
}

fn thermal() -> Result<BlockDef, ConstructionError> {
    let tank = vec![
        Field::new("volume", 0, PrimitiveType::U8).unit("%").provisional(),
        Field::new("liquid", 1, PrimitiveType::U8).unit("%").provisional(),
    ];

    Ok(BlockDef::new(THERMAL, "thermal", 4)
        .lenient()
        .field(
            Field::new("coolant_temp", 0, PrimitiveType::I16)
                .pipeline(Pipeline::scale(0.1)?)
                .unit("°C"),
        )
        .field(Field::new("pump_word", 2, PrimitiveType::Bitmap(IntWidth::W16)))
        .field(DerivedField::new("pump_running", "pump_word", BitRange::bit(15)))
        .field(DerivedField::new("pump_level", "pump_word", BitRange::new(0, 8)).unit("%"))
        .field(ArrayField::new("tanks", 4, 4, 2, ArrayElement::Record(tank)).optional()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_builtins_compile() {
        let schemas = schemas().unwrap();
        let ids: Vec<u16> = schemas.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![DEVICE_INFO, GRID_TELEMETRY, BATTERY_STATUS, CHARGE_SCHEDULE, THERMAL]);
    }

    fn schema(id: u16) -> BlockSchema {
        schemas().unwrap().into_iter().find(|s| s.id() == id).unwrap()
    }

    #[test]
    fn test_device_info() {
        let mut data = Vec::new();
        data.extend_from_slice(b"ESS-200K\0\0\0\0");
        data.extend_from_slice(b"SN123   ");
        data.extend_from_slice(&[0x00, 0x02, 0x01, 0x2C, 0x00, 0x09]);

        let block = schema(DEVICE_INFO).parse(&data);
        assert!(block.is_valid());
        assert_eq!(block.get("model"), Some(&Value::Str("ESS-200K".to_string())));
        assert_eq!(block.get("serial"), Some(&Value::Str("SN123".to_string())));
        assert_eq!(block.get("firmware"), Some(&Value::Float(3.0)));
        // unknown chemistry passes through
        assert_eq!(block.get("battery_type"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_battery_status_overlapping_subfields() {
        let mut data = vec![0x00, 0x55, 0x00, 0x62, 0x14, 0xB4, 0xFF, 0xF6, 0x02, 0x8A];
        data.extend_from_slice(&[0x80, 0x08]);

        let schema = schema(BATTERY_STATUS);
        let block = schema.parse(&data);
        assert!(block.is_valid());
        assert_eq!(block.get("pack_current"), Some(&Value::Float(-1.0)));
        assert_eq!(block.get("fan_on"), Some(&Value::Int(1)));
        assert_eq!(block.get("fault_action"), Some(&Value::Tag("shutdown".to_string())));

        let alarms = block.get("alarm_bits").and_then(|v| v.as_list()).unwrap();
        assert_eq!(alarms.len(), 16);
        assert_eq!(alarms[3], Value::Bool(true));
        assert_eq!(alarms[15], Value::Bool(true));
        assert_eq!(alarms[0], Value::Bool(false));

        assert_eq!(block.validation().missing_optional, vec!["cell_voltages"]);
        assert_eq!(schema.unit_of("temperature"), Some("°C"));
    }

    #[test]
    fn test_thermal_provisional_tanks() {
        let schema = schema(THERMAL);
        assert_eq!(schema.provisional_fields(), vec!["tanks.volume", "tanks.liquid"]);

        let block = schema.parse(&[0x00, 0xFA, 0x80, 0x32, 10, 20, 11, 21]);
        assert_eq!(block.get("coolant_temp"), Some(&Value::Float(25.0)));
        assert_eq!(block.get("pump_running"), Some(&Value::Int(1)));
        assert_eq!(block.get("pump_level"), Some(&Value::Int(50)));
        let tanks = block.get("tanks").and_then(|v| v.as_list()).unwrap();
        assert_eq!(tanks.len(), 2);
        assert_eq!(tanks[1].get("liquid"), Some(&Value::Int(21)));
    }
}
