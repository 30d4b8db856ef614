use std::path::Path;

use clap::{ArgGroup, Parser};
use luna_base_hsm::{Info, SlotInfo, TokenInfo};

use crate::{actions::load_hsm, error::result::SampleResult};

/// Display the general, slot and token information of the library
///
/// Without a slot ID, every slot holding a token is displayed.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
#[command(group(
    ArgGroup::new("what").required(true).multiple(true).args(["info", "slot", "token"])
))]
pub struct GetInfoAction {
    /// Get the general information
    #[clap(long)]
    pub info: bool,

    /// Get the slot information
    #[clap(long)]
    pub slot: bool,

    /// Get the information of the token in the slot
    #[clap(long)]
    pub token: bool,

    /// The slot to display, default all
    pub slot_id: Option<usize>,
}

impl GetInfoAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;

        if self.info {
            print!("{}", format_general_info(&hsm.get_info()?));
        }

        let slots = match self.slot_id {
            Some(slot_id) => vec![slot_id],
            None => hsm.get_slot_list(true)?,
        };
        for slot_id in slots {
            if self.slot {
                print!("{}", format_slot_info(&hsm.get_slot_info(slot_id)?));
            }
            if self.token {
                print!("{}", format_token_info(slot_id, &hsm.get_token_info(slot_id)?));
            }
        }
        Ok(())
    }
}

fn format_flags(names: &[&str]) -> String {
    if names.is_empty() {
        "<none>".to_owned()
    } else {
        names.join(" ")
    }
}

pub(crate) fn format_general_info(info: &Info) -> String {
    format!(
        "General Info\n   Cryptoki Version   :{}\n   Manufacturer       :{}\n   Library \
         Description:{}\n   Library Version    :{}\n",
        info.cryptoki_version, info.manufacturer_id, info.library_description, info.library_version
    )
}

pub(crate) fn format_slot_info(info: &SlotInfo) -> String {
    [
        format!("Slot ID {}", info.slot_id),
        format!("   Description     :{}", info.description),
        format!("   Manufacturer    :{}", info.manufacturer_id),
        format!("   Hardware Version:{}", info.hardware_version),
        format!("   Firmware Version:{}", info.firmware_version),
        format!("   Flags           :{}", format_flags(&info.flag_names())),
    ]
    .into_iter()
    .map(|line| line + "\n")
    .chain(["\n".to_owned()])
    .collect()
}

pub(crate) fn format_token_info(slot_id: usize, info: &TokenInfo) -> String {
    [
        format!("Token for Slot ID {slot_id}"),
        format!("   Label           :{}", info.label),
        format!("   Manufacturer    :{}", info.manufacturer_id),
        format!("   Model           :{}", info.model),
        format!("   Serial Number   :{}", info.serial_number),
        format!("   Hardware Version:{}", info.hardware_version),
        format!("   Firmware Version:{}", info.firmware_version),
        format!("   Clock (GMT)     :{}", info.utc_time),
        format!(
            "   Sessions        :{} out of {}",
            info.session_count, info.max_session_count
        ),
        format!(
            "   RW Sessions     :{} out of {}",
            info.rw_session_count, info.max_rw_session_count
        ),
        format!("   PIN Length      :{} to {}", info.min_pin_len, info.max_pin_len),
        format!(
            "   Public Memory   :{} free, {} total",
            info.free_public_memory, info.total_public_memory
        ),
        format!(
            "   Private Memory  :{} free, {} total",
            info.free_private_memory, info.total_private_memory
        ),
        format!(
            "   Flags           :{} (and maybe more)",
            format_flags(&info.flag_names())
        ),
    ]
    .into_iter()
    .map(|line| line + "\n")
    .chain(["\n".to_owned()])
    .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use cosmian_pkcs11_sys::{CK_ULONG, CKF_HW_SLOT, CKF_RNG, CKF_TOKEN_PRESENT};
    use luna_base_hsm::{Counter, Info, SlotInfo, TokenInfo, Version};

    use super::{GetInfoAction, format_general_info, format_slot_info, format_token_info};

    #[test]
    fn test_general_info() {
        let info = Info {
            cryptoki_version: Version { major: 2, minor: 20 },
            manufacturer_id: "SafeNet, Inc.".to_owned(),
            flags: 0,
            library_description: "Chrystoki".to_owned(),
            library_version: Version { major: 10, minor: 4 },
        };
        assert_eq!(
            format_general_info(&info),
            "General Info\n   Cryptoki Version   :2.20\n   Manufacturer       :SafeNet, \
             Inc.\n   Library Description:Chrystoki\n   Library Version    :10.04\n"
        );
    }

    #[test]
    fn test_slot_info_flags() {
        let mut info = SlotInfo {
            slot_id: 3,
            description: "Net Token Slot".to_owned(),
            manufacturer_id: "SafeNet".to_owned(),
            flags: CKF_TOKEN_PRESENT | CKF_HW_SLOT,
            hardware_version: Version { major: 1, minor: 0 },
            firmware_version: Version { major: 7, minor: 8 },
        };
        assert_eq!(
            format_slot_info(&info),
            "Slot ID 3\n   Description     :Net Token Slot\n   Manufacturer    :SafeNet\n   \
             Hardware Version:1.00\n   Firmware Version:7.08\n   Flags           \
             :TokenPresent Hardware\n\n"
        );

        info.flags = 0;
        assert!(format_slot_info(&info).contains("   Flags           :<none>\n"));
    }

    #[test]
    fn test_token_info() {
        let info = TokenInfo {
            label: "partition1".to_owned(),
            manufacturer_id: "SafeNet".to_owned(),
            model: "LunaSA".to_owned(),
            serial_number: "1234".to_owned(),
            flags: CKF_RNG,
            max_session_count: Counter(CK_ULONG::MAX),
            session_count: Counter(1),
            max_rw_session_count: Counter(100),
            rw_session_count: Counter(0),
            max_pin_len: 255,
            min_pin_len: 7,
            total_public_memory: Counter(1000),
            free_public_memory: Counter(900),
            total_private_memory: Counter(2000),
            free_private_memory: Counter(1500),
            hardware_version: Version::default(),
            firmware_version: Version::default(),
            utc_time: String::new(),
        };
        let text = format_token_info(5, &info);
        assert!(text.starts_with("Token for Slot ID 5\n"));
        assert!(text.contains("   Sessions        :1 out of unavailable\n"));
        assert!(text.contains("   PIN Length      :7 to 255\n"));
        assert!(text.contains("   Public Memory   :900 free, 1000 total\n"));
        assert!(text.contains("   Flags           :RNG (and maybe more)\n"));
    }

    #[test]
    fn test_at_least_one_flag() {
        assert!(GetInfoAction::try_parse_from(["get-info"]).is_err());
        assert!(GetInfoAction::try_parse_from(["get-info", "7"]).is_err());
        let action = GetInfoAction::try_parse_from(["get-info", "--slot", "--token", "7"]).unwrap();
        assert_eq!(action.slot_id, Some(7));
        assert!(!action.info);
    }
}
