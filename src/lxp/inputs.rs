use crate::prelude::*;

use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

// {{{ Bank
/// The five 40-register input banks polled in turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Bank {
    /// live power flows and today's energy
    Runtime = 0,
    /// lifetime energy, fault/warning bitmasks, temperatures
    Totals = 40,
    /// BMS limits and cell data
    Battery = 80,
    /// generator input and split-phase EPS
    Generator = 120,
    Load = 160,
}

impl Bank {
    pub const CYCLE: [Bank; 5] = [
        Bank::Runtime,
        Bank::Totals,
        Bank::Battery,
        Bank::Generator,
        Bank::Load,
    ];

    pub const REGISTER_COUNT: u16 = 40;

    pub fn register(self) -> u16 {
        self.into()
    }

    pub fn index(self) -> usize {
        self.register() as usize / Self::REGISTER_COUNT as usize
    }

    /// Smallest payload that covers every field decoded from this bank.
    pub fn min_payload_len(self) -> usize {
        match self {
            Bank::Runtime => 80,
            Bank::Totals => 62,
            Bank::Battery => 80,
            Bank::Generator => 72,
            Bank::Load => 80,
        }
    }

    fn check_len(self, values: &[u8]) -> Result<(), LxpError> {
        if values.len() < self.min_payload_len() {
            return Err(self.too_short(values));
        }
        Ok(())
    }

    fn too_short(self, values: &[u8]) -> LxpError {
        LxpError::PayloadTooShort {
            register: self.register(),
            required: self.min_payload_len(),
            actual: values.len(),
        }
    }
} // }}}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ReadInput {
    ReadInput1(ReadInput1),
    ReadInput2(ReadInput2),
    ReadInput3(ReadInput3),
    ReadInput4(ReadInput4),
    ReadInput5(ReadInput5),
}

impl ReadInput {
    /// Decodes the payload of `bank`. `scaling_factor` only affects the battery bank.
    pub fn decode(bank: Bank, values: &[u8], scaling_factor: f64) -> Result<Self, LxpError> {
        Ok(match bank {
            Bank::Runtime => Self::ReadInput1(ReadInput1::decode(values)?),
            Bank::Totals => Self::ReadInput2(ReadInput2::decode(values)?),
            Bank::Battery => Self::ReadInput3(ReadInput3::decode(values, scaling_factor)?),
            Bank::Generator => Self::ReadInput4(ReadInput4::decode(values)?),
            Bank::Load => Self::ReadInput5(ReadInput5::decode(values)?),
        })
    }

    pub fn bank(&self) -> Bank {
        match self {
            Self::ReadInput1(_) => Bank::Runtime,
            Self::ReadInput2(_) => Bank::Totals,
            Self::ReadInput3(_) => Bank::Battery,
            Self::ReadInput4(_) => Bank::Generator,
            Self::ReadInput5(_) => Bank::Load,
        }
    }
}

// {{{ ReadInput1
#[derive(Clone, Debug, Default, Serialize, Nom)]
#[nom(LittleEndian)]
pub struct ReadInput1 {
    pub status: u16,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_pv_1: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_pv_2: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_pv_3: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_bat: f64,

    pub soc: u8,
    pub soh: u8,

    pub internal_fault: u16,

    pub p_pv_1: u16,
    pub p_pv_2: u16,
    pub p_pv_3: u16,
    pub p_charge: u16,
    pub p_discharge: u16,

    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_ac_r: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_ac_s: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_ac_t: f64,
    #[nom(Parse = "Utils::le_u16_div100")]
    pub f_ac: f64,

    pub p_inv: u16,
    pub p_rec: u16,

    // current clamp, IinvRMS
    #[nom(Parse = "Utils::le_u16_div100")]
    pub i_ct: f64,
    #[nom(Parse = "Utils::le_u16_div1000")]
    pub pf: f64,

    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_eps_r: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_eps_s: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_eps_t: f64,
    #[nom(Parse = "Utils::le_u16_div100")]
    pub f_eps: f64,
    pub p_eps: u16,
    pub s_eps: u16,
    pub p_to_grid: u16,
    pub p_to_user: u16,

    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_pv_day_1: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_pv_day_2: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_pv_day_3: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_inv_day: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_rec_day: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_chg_day: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_dischg_day: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_eps_day: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_to_grid_day: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_to_user_day: f64,

    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_bus_1: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_bus_2: f64,

    #[nom(Ignore)]
    pub p_pv: u32,
    #[nom(Ignore)]
    pub v_ac: f64,
    /// negative while discharging
    #[nom(Ignore)]
    pub p_battery: f64,
    /// negative while importing
    #[nom(Ignore)]
    pub p_grid: f64,
    #[nom(Ignore)]
    pub p_home: i32,
    #[nom(Ignore)]
    pub e_pv_day: f64,
    #[nom(Ignore)]
    pub e_home_day: f64,
}

impl ReadInput1 {
    pub fn decode(values: &[u8]) -> Result<Self, LxpError> {
        Bank::Runtime.check_len(values)?;
        let (_, mut r) = Self::parse(values).map_err(|_| Bank::Runtime.too_short(values))?;
        r.calculate_derived_values();
        Ok(r)
    }

    fn calculate_derived_values(&mut self) {
        self.p_pv = self.p_pv_1 as u32 + self.p_pv_2 as u32 + self.p_pv_3 as u32;
        self.v_ac = Utils::round((self.v_ac_r + self.v_ac_s + self.v_ac_t) / 3.0, 1);

        self.p_battery = if self.p_discharge > 0 {
            -(self.p_discharge as f64)
        } else {
            self.p_charge as f64
        };

        self.p_grid = if self.p_to_user > 0 {
            -(self.p_to_user as f64)
        } else {
            self.p_to_grid as f64
        };

        self.p_home = self.p_to_user as i32 - self.p_rec as i32 + self.p_inv as i32
            - self.p_to_grid as i32;

        self.e_pv_day = Utils::round(self.e_pv_day_1 + self.e_pv_day_2 + self.e_pv_day_3, 1);
        self.e_home_day = Utils::round(
            self.e_to_user_day - self.e_rec_day + self.e_inv_day - self.e_to_grid_day,
            1,
        );
    }
}
// }}}

// {{{ ReadInput2
#[derive(Clone, Debug, Default, Serialize, Nom)]
#[nom(LittleEndian)]
pub struct ReadInput2 {
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_pv_all_1: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_pv_all_2: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_pv_all_3: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_inv_all: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_rec_all: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_chg_all: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_dischg_all: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_eps_all: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_to_grid_all: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_to_user_all: f64,

    pub fault_code: u32,
    pub warning_code: u32,

    pub t_inner: i16,
    pub t_rad_1: i16,
    pub t_rad_2: i16,
    pub t_bat: i16,

    /// seconds
    #[nom(SkipBefore(2))]
    pub runtime: u32,

    #[nom(Ignore)]
    pub e_pv_all: f64,
    #[nom(Ignore)]
    pub e_home_all: f64,
}

impl ReadInput2 {
    pub fn decode(values: &[u8]) -> Result<Self, LxpError> {
        Bank::Totals.check_len(values)?;
        let (_, mut r) = Self::parse(values).map_err(|_| Bank::Totals.too_short(values))?;

        r.e_pv_all = Utils::round(r.e_pv_all_1 + r.e_pv_all_2 + r.e_pv_all_3, 1);
        r.e_home_all = Utils::round(
            r.e_to_user_all - r.e_rec_all + r.e_inv_all - r.e_to_grid_all,
            1,
        );

        Ok(r)
    }
}
// }}}

// {{{ ReadInput3
#[derive(Clone, Debug, Default, Serialize, Nom)]
#[nom(LittleEndian)]
pub struct ReadInput3 {
    #[nom(SkipBefore(2))] // bat_brand, bat_com_type
    #[serde(skip)]
    max_chg_curr_raw: u16,
    #[serde(skip)]
    max_dischg_curr_raw: u16,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub charge_volt_ref: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub dischg_cut_volt: f64,

    #[nom(SkipBefore(20))] // bat_status_0..9
    pub bat_status_inv: u16,
    pub bat_count: u16,
    pub bat_capacity: u16,
    #[serde(skip)]
    bat_current_raw: u16,

    pub bms_event_1: u16,
    pub bms_event_2: u16,

    #[nom(Parse = "Utils::le_u16_div1000")]
    pub max_cell_voltage: f64,
    #[nom(Parse = "Utils::le_u16_div1000")]
    pub min_cell_voltage: f64,
    #[serde(skip)]
    max_cell_temp_raw: u16,
    #[serde(skip)]
    min_cell_temp_raw: u16,

    #[nom(SkipBefore(2))] // bms_fw_update_state
    pub cycle_count: u16,

    #[nom(SkipBefore(14))]
    pub p_load2: u16,

    #[nom(Ignore)]
    pub max_chg_curr: f64,
    #[nom(Ignore)]
    pub max_dischg_curr: f64,
    /// negative while discharging
    #[nom(Ignore)]
    pub bat_current: f64,
    #[nom(Ignore)]
    pub max_cell_temp: f64,
    #[nom(Ignore)]
    pub min_cell_temp: f64,
}

impl ReadInput3 {
    pub fn decode(values: &[u8], scaling_factor: f64) -> Result<Self, LxpError> {
        Bank::Battery.check_len(values)?;
        let (_, mut r) = Self::parse(values).map_err(|_| Bank::Battery.too_short(values))?;

        r.max_chg_curr = Utils::round(r.max_chg_curr_raw as f64 / scaling_factor, 2);
        r.max_dischg_curr = Utils::round(r.max_dischg_curr_raw as f64 / scaling_factor, 2);
        r.bat_current = Utils::twos_complement(r.bat_current_raw) as f64 / 10.0;
        r.max_cell_temp = Utils::twos_complement(r.max_cell_temp_raw) as f64 / 10.0;
        r.min_cell_temp = Utils::twos_complement(r.min_cell_temp_raw) as f64 / 10.0;

        Ok(r)
    }
}
// }}}

// {{{ ReadInput4
#[derive(Clone, Debug, Default, Serialize, Nom)]
#[nom(LittleEndian)]
pub struct ReadInput4 {
    #[nom(SkipBefore(2))]
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_gen: f64,
    #[nom(Parse = "Utils::le_u16_div100")]
    pub f_gen: f64,
    pub p_gen: u16,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_gen_day: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_gen_all: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_eps_l1: f64,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub v_eps_l2: f64,
    pub p_eps_l1: u16,
    pub p_eps_l2: u16,
}

impl ReadInput4 {
    /// Below this the generator reading is sensor noise.
    pub const GEN_POWER_FLOOR: u16 = 125;

    pub fn decode(values: &[u8]) -> Result<Self, LxpError> {
        Bank::Generator.check_len(values)?;
        let (_, mut r) = Self::parse(values).map_err(|_| Bank::Generator.too_short(values))?;

        if r.p_gen < Self::GEN_POWER_FLOOR {
            r.p_gen = 0;
        }

        Ok(r)
    }
}
// }}}

// {{{ ReadInput5
#[derive(Clone, Debug, Default, Serialize, Nom)]
#[nom(LittleEndian)]
pub struct ReadInput5 {
    #[nom(SkipBefore(20))]
    pub p_load_ongrid: u16,
    #[nom(Parse = "Utils::le_u16_div10")]
    pub e_load_day: f64,
    #[nom(Parse = "Utils::le_u32_div10")]
    pub e_load_all: f64,
}

impl ReadInput5 {
    pub fn decode(values: &[u8]) -> Result<Self, LxpError> {
        Bank::Load.check_len(values)?;
        let (_, r) = Self::parse(values).map_err(|_| Bank::Load.too_short(values))?;
        Ok(r)
    }
}
// }}}

// {{{ ReadInputs
/// Latest record per bank plus whether the most recent decode attempt produced it.
#[derive(Default, Clone, Debug)]
pub struct ReadInputs {
    read_input_1: Option<ReadInput1>,
    read_input_2: Option<ReadInput2>,
    read_input_3: Option<ReadInput3>,
    read_input_4: Option<ReadInput4>,
    read_input_5: Option<ReadInput5>,
    loaded: [bool; 5],
}

impl ReadInputs {
    pub fn reset_loaded(&mut self) {
        self.loaded = [false; 5];
    }

    pub fn is_loaded(&self, bank: Bank) -> bool {
        self.loaded[bank.index()]
    }

    pub fn store(&mut self, input: ReadInput) {
        self.loaded[input.bank().index()] = true;
        match input {
            ReadInput::ReadInput1(r) => self.read_input_1 = Some(r),
            ReadInput::ReadInput2(r) => self.read_input_2 = Some(r),
            ReadInput::ReadInput3(r) => self.read_input_3 = Some(r),
            ReadInput::ReadInput4(r) => self.read_input_4 = Some(r),
            ReadInput::ReadInput5(r) => self.read_input_5 = Some(r),
        }
    }

    pub fn read_input_1(&self) -> Option<&ReadInput1> {
        self.read_input_1.as_ref()
    }
    pub fn read_input_2(&self) -> Option<&ReadInput2> {
        self.read_input_2.as_ref()
    }
    pub fn read_input_3(&self) -> Option<&ReadInput3> {
        self.read_input_3.as_ref()
    }
    pub fn read_input_4(&self) -> Option<&ReadInput4> {
        self.read_input_4.as_ref()
    }
    pub fn read_input_5(&self) -> Option<&ReadInput5> {
        self.read_input_5.as_ref()
    }
}
// }}}
