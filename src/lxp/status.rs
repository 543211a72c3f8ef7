//! Code-to-text tables for the status fields of the input banks.

pub struct StatusString;

impl StatusString {
    /// Highest code the inverter firmware defines.
    pub const MAX_CODE: u16 = 192;

    pub fn from_value(status: u16) -> String {
        if status > Self::MAX_CODE {
            return "Invalid Status".to_string();
        }

        match Self::lookup(status) {
            Some(text) => text.to_string(),
            None => format!("Unknown ({})", status),
        }
    }

    fn lookup(status: u16) -> Option<&'static str> {
        let text = match status {
            0 => "Standby",
            1 => "Error",
            2 => "Inverting",
            4 => "Solar > Load - Surplus > Grid",
            5 => "Float",
            7 => "Charger Off",
            8 => "Supporting",
            9 => "Selling",
            10 => "Pass Through",
            11 => "Offsetting",
            12 => "Solar > Battery Charging",
            16 => "Battery Discharging > LOAD - Surplus > Grid",
            17 => "Temperature Over Range",
            20 => "Solar + Battery Discharging > LOAD - Surplus > Grid",
            32 => "AC Battery Charging",
            40 => "Solar + Grid > Battery Charging",
            64 => "No Grid : Battery > EPS",
            136 => "No Grid : Solar > EPS - Surplus > Battery Charging",
            192 => "No Grid : Solar + Battery Discharging > EPS",
            // reserved, no text
            3 | 6 | 13..=15 | 18 | 19 => "",
            _ => return None,
        };
        Some(text)
    }
}

pub struct BatteryStatusString;

impl BatteryStatusString {
    pub fn from_value(status: u16) -> String {
        let text = match status {
            0 => "Charge Forbidden & Discharge Forbidden",
            2 => "Charge Forbidden & Discharge Allowed",
            3 => "Charge Allowed & Discharge Allowed",
            17 => "Charge Allowed & Discharge Forbidden",
            _ => return format!("Unknown ({})", status),
        };
        text.to_string()
    }
}

/// Set bits of a 32-bit bitmask, described and joined with `"; "`; `"OK"` when clear.
fn describe_bits(value: u32, from_bit: fn(u32) -> &'static str) -> String {
    if value == 0 {
        return "OK".to_string();
    }

    (0..32)
        .filter(|bit| value & (1 << bit) != 0)
        .map(from_bit)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct WarningCodeString;

impl WarningCodeString {
    pub fn from_value(value: u32) -> String {
        describe_bits(value, Self::from_bit)
    }

    fn from_bit(bit: u32) -> &'static str {
        match bit {
            0 => "W000: Battery communication failure",
            1 => "W001: AFCI communication failure",
            2 => "W002: AFCI high",
            3 => "W003: Meter communication failure",
            4 => "W004: Both charge and discharge forbidden by battery",
            5 => "W005: Auto test failed",
            7 => "W007: LCD communication failure",
            8 => "W008: FW version mismatch",
            9 => "W009: Fan stuck",
            11 => "W011: Parallel number out of range",
            12 => "W012: Bat On Mos",
            13 => "W013: Overtemperature (NTC reading is too high)",
            15 => "W015: Battery reverse connection",
            16 => "W016: Grid power outage",
            17 => "W017: Grid voltage out of range",
            18 => "W018: Grid frequency out of range",
            20 => "W020: PV insulation low",
            21 => "W021: Leakage current high",
            22 => "W022: DCI high",
            23 => "W023: PV short",
            25 => "W025: Battery voltage high",
            26 => "W026: Battery voltage low",
            27 => "W027: Battery open circuit",
            28 => "W028: EPS overload",
            29 => "W029: EPS voltage high",
            30 => "W030: Meter reverse connection",
            31 => "W031: DCV high",
            _ => "Reserved warning",
        }
    }
}

pub struct FaultCodeString;

impl FaultCodeString {
    pub fn from_value(value: u32) -> String {
        describe_bits(value, Self::from_bit)
    }

    fn from_bit(bit: u32) -> &'static str {
        match bit {
            0 => "E000: Internal communication fault 1",
            1 => "E001: Model fault",
            2 => "E002: BatOnMosFail",
            3 => "E003: CT Fail",
            8 => "E008: CAN communication error in parallel system",
            9 => "E009: master lost in parallel system",
            10 => "E010: multiple master units in parallel system",
            11 => "E011: AC input inconsistent in parallel system",
            12 => "E012: UPS short",
            13 => "E013: Reverse current on UPS output",
            14 => "E014: Bus short",
            15 => "E015: Phase error in three phase system",
            16 => "E016: Relay check fault",
            17 => "E017: Internal communication fault 2",
            18 => "E018: Internal communication fault 3",
            19 => "E019: Bus voltage high",
            20 => "E020: EPS connection fault",
            21 => "E021: PV voltage high",
            22 => "E022: Over current protection",
            23 => "E023: Neutral fault",
            24 => "E024: PV short",
            25 => "E025: Radiator temperature over range",
            26 => "E026: Internal fault",
            27 => "E027: Sample inconsistent between Main CPU and redundant CPU",
            31 => "E031: Internal communication fault 4",
            _ => "Reserved fault",
        }
    }
}
