use serde::{Deserialize, Serialize};

//Everything a charge point can be told to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChargePointCommand {
    SoftReset,
    Reboot,
    StartSession { card: String },
    StopSession,
    SetAvailable { on: bool },
    SetPublicCharging { on: bool },
    SetPlugAndCharge { on: bool },
}

impl ChargePointCommand {
    //vendor object name, as it comes back in acknowledgment messages
    pub fn object_name(&self) -> &'static str {
        match self {
            ChargePointCommand::SoftReset => "SOFT_RESET",
            ChargePointCommand::Reboot => "REBOOT",
            ChargePointCommand::StartSession { .. } => "START_SESSION",
            ChargePointCommand::StopSession => "STOP_SESSION",
            ChargePointCommand::SetAvailable { .. } => "AVAILABLE",
            ChargePointCommand::SetPublicCharging { .. } => "PUBLIC_CHARGING",
            ChargePointCommand::SetPlugAndCharge { .. } => "PLUG_AND_CHARGE",
        }
    }
}
